//! Message Bus (C3) — durable, typed, store-and-forward messaging between
//! the Floor Manager and the broker adapters it drives.

mod store;
mod types;

pub use store::MessageBus;
pub use types::{Heartbeat, Message, MessageType};

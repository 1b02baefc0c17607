//! The Floor Manager binary's library half: the Listener Daemon that
//! polls the bus and drives a single active task through `swarm-core`.

pub mod listener;

pub use listener::{Listener, QuestionPolicy};

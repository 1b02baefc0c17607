use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::contract::BreakerCounters;
use crate::error::CoreResult;
use crate::store::AtomicStore;

const SIDECAR_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SidecarEnvelope {
    schema_version: String,
    counters: BreakerCounters,
}

/// A mirror of `breaker` written next to the contract so a crash mid-write
/// doesn't leave the only copy of the counters half-applied. §4.5 requires
/// that loading distinguish three failure shapes: corrupt JSON (back up
/// and reinitialize), a schema mismatch (migrate), and anything else
/// (abort — counters are never silently zeroed).
pub struct BreakerSidecar {
    path: PathBuf,
}

/// What happened when a sidecar was loaded at startup.
#[derive(Debug)]
pub enum SidecarLoad {
    /// Loaded cleanly, counters usable as-is.
    Loaded(BreakerCounters),
    /// No sidecar existed yet; a fresh, armed set of counters was created.
    Initialized(BreakerCounters),
    /// The file was corrupt JSON; it was moved aside and counters were
    /// reinitialized. The backup path is included for the operator.
    RecoveredFromCorruption {
        counters: BreakerCounters,
        backup_path: PathBuf,
    },
    /// The file parsed but carried an older schema version; the counters
    /// were migrated forward (currently a no-op beyond version bump, since
    /// there has been exactly one schema so far).
    Migrated {
        counters: BreakerCounters,
        from_version: String,
    },
}

impl BreakerSidecar {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the sidecar, or initialize/recover it according to §4.5's
    /// rules. Any I/O error other than corrupt JSON aborts startup rather
    /// than silently treating the counters as fresh.
    pub fn load_or_init(&self) -> CoreResult<SidecarLoad> {
        let bytes = match AtomicStore::read(&self.path)? {
            None => {
                let counters = BreakerCounters::default();
                self.save(&counters)?;
                return Ok(SidecarLoad::Initialized(counters));
            }
            Some(bytes) => bytes,
        };

        match serde_json::from_slice::<SidecarEnvelope>(&bytes) {
            Ok(envelope) if envelope.schema_version == SIDECAR_SCHEMA_VERSION => {
                Ok(SidecarLoad::Loaded(envelope.counters))
            }
            Ok(envelope) => {
                let from_version = envelope.schema_version;
                self.save(&envelope.counters)?;
                Ok(SidecarLoad::Migrated {
                    counters: envelope.counters,
                    from_version,
                })
            }
            Err(parse_err) => {
                let backup_path = self.backup_corrupt(&bytes)?;
                tracing::warn!(
                    path = %self.path.display(),
                    backup = %backup_path.display(),
                    error = %parse_err,
                    "breaker sidecar was corrupt JSON; backed up and reinitialized"
                );
                let counters = BreakerCounters::default();
                self.save(&counters)?;
                Ok(SidecarLoad::RecoveredFromCorruption {
                    counters,
                    backup_path,
                })
            }
        }
    }

    pub fn save(&self, counters: &BreakerCounters) -> CoreResult<()> {
        let envelope = SidecarEnvelope {
            schema_version: SIDECAR_SCHEMA_VERSION.to_string(),
            counters: counters.clone(),
        };
        AtomicStore::write(&self.path, serde_json::to_string_pretty(&envelope)?.as_bytes())
    }

    fn backup_corrupt(&self, bytes: &[u8]) -> CoreResult<PathBuf> {
        let backup_path = sibling_with_suffix(&self.path, ".corrupt");
        AtomicStore::write(&backup_path, bytes)?;
        Ok(backup_path)
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sidecar".to_string());
    name.push_str(suffix);
    path.with_file_name(name)
}

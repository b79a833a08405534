use crate::codec::{Codec, Compression};
use crate::session::PeerRole;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 9;
pub const DEFAULT_UNCLAIMED_CAPACITY: usize = 64;
const MAX_UNCLAIMED_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub role: PeerRole,
    pub compression: Compression,
    pub compression_level: u32,
    /// Ask the transport to activate again after the session deactivates.
    pub reactivate_on_deactivation: bool,
    /// Hand new context subscribers the last context received from the peer.
    pub replay_context_on_subscribe: bool,
    pub unclaimed_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            role: PeerRole::Initiator,
            compression: Compression::Bzip2,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            reactivate_on_deactivation: true,
            replay_context_on_subscribe: true,
            unclaimed_capacity: DEFAULT_UNCLAIMED_CAPACITY,
        }
    }
}

impl SyncConfig {
    pub fn companion() -> Self {
        Self { role: PeerRole::Companion, ..Self::default() }
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=9).contains(&self.compression_level) {
            return Err(ConfigError::Invalid {
                field: "compression_level",
                reason: format!("{} is outside 1..=9", self.compression_level),
            });
        }
        if self.unclaimed_capacity > MAX_UNCLAIMED_CAPACITY {
            return Err(ConfigError::Invalid {
                field: "unclaimed_capacity",
                reason: format!("{} exceeds {MAX_UNCLAIMED_CAPACITY}", self.unclaimed_capacity),
            });
        }
        Ok(())
    }

    pub fn codec(&self) -> Codec {
        Codec::new(self.compression, self.compression_level)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, SyncConfig};
    use crate::codec::Compression;
    use crate::session::PeerRole;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(SyncConfig::from_toml("").expect("parse"), SyncConfig::default());
    }

    #[test]
    fn parses_companion_without_compression() {
        let config = SyncConfig::from_toml(
            r#"
role = "companion"
compression = "none"
reactivate_on_deactivation = false
"#,
        )
        .expect("parse");
        assert_eq!(config.role, PeerRole::Companion);
        assert_eq!(config.compression, Compression::None);
        assert!(!config.reactivate_on_deactivation);
        assert!(config.replay_context_on_subscribe);
    }

    #[test]
    fn rejects_out_of_range_level_and_unknown_keys() {
        let err = SyncConfig::from_toml("compression_level = 12").expect_err("level");
        assert!(matches!(err, ConfigError::Invalid { field: "compression_level", .. }));
        let err = SyncConfig::from_toml("retries = 3").expect_err("unknown key");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_path() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "unclaimed_capacity = 8").expect("write config");
        let config = SyncConfig::from_path(file.path()).expect("load");
        assert_eq!(config.unclaimed_capacity, 8);
        assert!(matches!(
            SyncConfig::from_path(file.path().with_extension("missing")),
            Err(ConfigError::Io(_))
        ));
    }
}

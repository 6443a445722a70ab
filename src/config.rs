//! Attack configuration.
use serde::{Deserialize, Serialize};
use std::{fs::File, path::Path};

use crate::Error;

/// Which text of each trace feeds the intermediate function.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// First round attacks
    Plaintext,
    /// Last round attacks
    #[default]
    Ciphertext,
}

/// Parameters of a key recovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    /// Number of key bytes to recover, starting from byte 0
    pub num_key_bytes: usize,
    /// Number of traces accumulated by one task before merging
    ///
    /// Each batch holds its own 256 partition accumulators, so memory grows with
    /// `num_traces / batch_size`.
    pub batch_size: usize,
    /// Text attacked by the hypothesis
    pub text_source: TextSource,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            num_key_bytes: 16,
            batch_size: 10_000,
            text_source: TextSource::Ciphertext,
        }
    }
}

impl AttackConfig {
    /// Check that the configuration can drive an attack.
    pub fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }

        Ok(())
    }

    /// Save the [`AttackConfig`] to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;

        Ok(())
    }

    /// Load an [`AttackConfig`] from a JSON file. Missing fields take their default value.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        let config: AttackConfig = serde_json::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }
}

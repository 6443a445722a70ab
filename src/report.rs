//! Human and machine readable summaries of a key recovery.
use serde::Serialize;
use std::{fmt, fs::File, path::Path};

use crate::{Error, attack::KeyRecovery};

/// Summary of a key recovery.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Recovered key, hex encoded
    pub key: String,
    pub bytes: Vec<ByteReport>,
}

/// Summary of one attacked key byte.
#[derive(Debug, Clone, Serialize)]
pub struct ByteReport {
    pub byte_index: usize,
    pub best_guess: u8,
    pub best_score: f64,
    pub conclusive: bool,
    /// Partial guessing entropy of the known key byte
    pub pge: Option<usize>,
    /// Candidates from the most to the least likely, with their score
    pub ranking: Vec<(u8, f64)>,
}

impl From<&KeyRecovery> for Report {
    fn from(recovery: &KeyRecovery) -> Self {
        Self {
            key: recovery.key().to_string(),
            bytes: recovery
                .bytes()
                .iter()
                .map(|byte| ByteReport {
                    byte_index: byte.byte_index(),
                    best_guess: byte.best_guess(),
                    best_score: byte.best_score(),
                    conclusive: byte.is_conclusive(),
                    pge: byte.pge().ok(),
                    ranking: byte
                        .ranking()
                        .iter()
                        .map(|&guess| (guess, byte.scores()[guess as usize]))
                        .collect(),
                })
                .collect(),
        }
    }
}

impl Report {
    /// Save the [`Report`] to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;

        Ok(())
    }

    /// Return the partial guessing entropy of every byte, if the key was known.
    pub fn pge(&self) -> Option<Vec<usize>> {
        self.bytes.iter().map(|byte| byte.pge).collect()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Best key guess: {}", self.key)?;
        for byte in &self.bytes {
            write!(
                f,
                "  byte {:2}: {:02x} (score {:.4})",
                byte.byte_index, byte.best_guess, byte.best_score
            )?;
            if !byte.conclusive {
                write!(f, " inconclusive")?;
            }
            writeln!(f)?;
        }

        if let Some(pge) = self.pge() {
            writeln!(f, "Partial guessing entropy:")?;
            for (byte_index, pge) in pge.iter().enumerate() {
                writeln!(f, "  byte {byte_index:2}: {pge}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Report;
    use crate::{attack::recover_key, config::AttackConfig, leakage_model::hw, trace::TraceCorpus};
    use ndarray::Array2;

    fn corpus() -> TraceCorpus<u8> {
        let ciphertexts =
            Array2::from_shape_fn((256, 2), |(i, j)| (i as u8).wrapping_mul(j as u8 * 2 + 1));
        let traces = Array2::from_shape_fn((256, 2), |(i, j)| hw(ciphertexts[[i, j]] ^ 0x21));
        TraceCorpus::new(traces, ciphertexts.clone(), ciphertexts).unwrap()
    }

    #[test]
    fn test_report() {
        let config = AttackConfig {
            num_key_bytes: 2,
            ..Default::default()
        };
        let recovery = recover_key(&corpus(), Some(&[0x21, 0x21]), config).unwrap();
        let report = Report::from(&recovery);

        assert_eq!(report.key, "2121");
        assert_eq!(report.pge(), Some(vec![0, 0]));
        assert_eq!(report.bytes[0].ranking.len(), 256);
        assert_eq!(report.bytes[0].ranking[0].0, 0x21);

        let text = report.to_string();
        assert!(text.contains("Best key guess: 2121"));
        assert!(text.contains("Partial guessing entropy:"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["bytes"][1]["best_guess"], 0x21);
    }

    #[test]
    fn test_report_without_known_key() {
        let config = AttackConfig {
            num_key_bytes: 1,
            ..Default::default()
        };
        let report = Report::from(&recover_key(&corpus(), None, config).unwrap());

        assert_eq!(report.pge(), None);
        assert!(!report.to_string().contains("Partial guessing entropy"));
    }
}

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed trace corpus: {0}")]
    MalformedCorpus(String),
    #[error("Degenerate hypothesis: every trace has the same modeled leakage")]
    DegenerateHypothesis,
    #[error("A known key is required to compute the partial guessing entropy")]
    MissingKnownKey,
    #[error("Known key has {actual} bytes, expected {expected}")]
    KeyLength { expected: usize, actual: usize },
    #[error("Key byte {byte_index} is out of range for {block_size}-byte blocks")]
    ByteIndexOutOfRange {
        byte_index: usize,
        block_size: usize,
    },
    #[error("Invalid attack configuration: {0}")]
    InvalidConfig(String),
    #[error("Key recovery was cancelled")]
    Cancelled,
    #[error("Line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("Failed to save/load corrkey data")]
    SaveLoadError(#[from] serde_json::Error),
    #[error(transparent)]
    IoError(#[from] io::Error),
    #[error(transparent)]
    NpyError(#[from] ndarray_npy::ReadNpyError),
    #[error(transparent)]
    HexError(#[from] hex::FromHexError),
}

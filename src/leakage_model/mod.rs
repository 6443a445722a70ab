//! Leakage hypotheses: which intermediate value is attacked and how it leaks.
//!
//! A [`Hypothesis`] pairs an [`Intermediate`] function with a [`LeakageModel`]. Since the
//! modeled leakage of a trace only depends on one text byte, a hypothesis is evaluated once per
//! possible byte value and guess, never once per trace.
pub mod intermediate;

pub use intermediate::{Intermediate, LastRoundXor};

use ndarray::Array1;

/// Number of values a key byte (and a text byte) can take.
pub const GUESS_RANGE: usize = 256;

const fn hamming_weight_table() -> [u8; GUESS_RANGE] {
    let mut table = [0u8; GUESS_RANGE];
    let mut value = 0;
    while value < GUESS_RANGE {
        table[value] = (value as u8).count_ones() as u8;
        value += 1;
    }
    table
}

static HW_TABLE: [u8; GUESS_RANGE] = hamming_weight_table();

/// Hamming weight of a byte, read from a precomputed table.
#[inline]
pub fn hw(value: u8) -> u8 {
    HW_TABLE[value as usize]
}

/// Maps an intermediate value to a leakage prediction.
pub trait LeakageModel: Send + Sync {
    fn leakage(&self, value: u8) -> f64;
}

impl<F> LeakageModel for F
where
    F: Fn(u8) -> f64 + Send + Sync,
{
    fn leakage(&self, value: u8) -> f64 {
        self(value)
    }
}

/// Hamming weight leakage model.
#[derive(Debug, Default, Clone, Copy)]
pub struct HammingWeight;

impl LeakageModel for HammingWeight {
    #[inline]
    fn leakage(&self, value: u8) -> f64 {
        hw(value) as f64
    }
}

/// The intermediate value itself is the leakage.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl LeakageModel for Identity {
    #[inline]
    fn leakage(&self, value: u8) -> f64 {
        value as f64
    }
}

/// Combines an [`Intermediate`] function and a [`LeakageModel`].
#[derive(Debug, Clone, Copy)]
pub struct Hypothesis<I, L> {
    intermediate: I,
    leakage_model: L,
}

impl Default for Hypothesis<LastRoundXor, HammingWeight> {
    /// Hamming weight of the last round's `text ^ key` value.
    fn default() -> Self {
        Self::new(LastRoundXor, HammingWeight)
    }
}

impl<I, L> Hypothesis<I, L>
where
    I: Intermediate,
    L: LeakageModel,
{
    pub fn new(intermediate: I, leakage_model: L) -> Self {
        Self {
            intermediate,
            leakage_model,
        }
    }

    /// Predicted leakage of a trace whose attacked text byte is `value`, under key guess `guess`.
    #[inline]
    pub fn predict(&self, value: u8, guess: u8) -> f64 {
        self.leakage_model
            .leakage(self.intermediate.intermediate(value, guess))
    }

    /// Return the predicted leakage of `guess` for every possible text byte value.
    ///
    /// The i-th element is the prediction for a trace whose attacked text byte equals `i`.
    pub fn modeled_leakages(&self, guess: u8) -> Array1<f64> {
        (0..GUESS_RANGE)
            .map(|value| self.predict(value as u8, guess))
            .collect()
    }
}

//! Correlation Power Analysis key recovery.
//!
//! Traces, texts and key bytes go in as a [`trace::TraceCorpus`]; [`attack::Attack`] ranks the 256
//! candidates of every key byte by peak Pearson correlation against a
//! [`leakage_model::Hypothesis`] and assembles the recovered key.
pub mod attack;
pub mod config;
pub mod distinguishers;
pub mod error;
pub mod leakage_model;
pub mod loader;
pub mod processors;
pub mod report;
pub mod trace;
pub mod util;

pub use crate::error::Error;

use num_traits::AsPrimitive;

/// A trace sample type.
///
/// Samples are converted to `f64` before any accumulation.
pub trait Sample: Copy + Send + Sync + AsPrimitive<f64> {}

impl Sample for u8 {}
impl Sample for i8 {}
impl Sample for u16 {}
impl Sample for i16 {}
impl Sample for u32 {}
impl Sample for i32 {}
impl Sample for f32 {}
impl Sample for f64 {}

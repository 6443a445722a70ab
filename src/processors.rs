//! Traces processing algorithms
use ndarray::{Array1, ArrayView1};
use std::{iter::zip, ops::Add};

use crate::Sample;

/// Processes traces to calculate mean and variance.
///
/// Uses Welford's running update so that long trace sets with a large DC offset do not lose
/// precision, and Chan's formula to merge two processors.
#[derive(Debug, Clone)]
pub struct MeanVar {
    /// Running mean of traces
    mean: Array1<f64>,
    /// Running sum of squared deviations from the mean
    m2: Array1<f64>,
    /// Number of traces processed
    count: usize,
}

impl MeanVar {
    /// Creates a new mean and variance processor.
    ///
    /// # Arguments
    ///
    /// * `size` - Number of samples per trace
    pub fn new(size: usize) -> Self {
        Self {
            mean: Array1::zeros(size),
            m2: Array1::zeros(size),
            count: 0,
        }
    }

    /// Processes an input trace to update internal accumulators.
    ///
    /// # Panics
    /// Panics in debug if the length of the trace is different form the size of [`MeanVar`].
    pub fn process<T: Sample>(&mut self, trace: ArrayView1<T>) {
        debug_assert!(trace.len() == self.size());

        self.count += 1;
        let inv_count = 1. / self.count as f64;

        for ((mean, m2), &x) in zip(zip(self.mean.iter_mut(), self.m2.iter_mut()), trace) {
            let x: f64 = x.as_();
            let delta = x - *mean;
            *mean += delta * inv_count;
            *m2 += delta * (x - *mean);
        }
    }

    /// Returns trace mean.
    pub fn mean(&self) -> ArrayView1<f64> {
        self.mean.view()
    }

    /// Returns the sum of squared deviations from the mean, for each sample.
    pub fn sum_squared_deviations(&self) -> ArrayView1<f64> {
        self.m2.view()
    }

    /// Calculates and returns traces (population) variance.
    pub fn var(&self) -> Array1<f64> {
        if self.count == 0 {
            return Array1::zeros(self.size());
        }

        self.m2.mapv(|m2| m2 / self.count as f64)
    }

    /// Returns the trace size handled.
    pub fn size(&self) -> usize {
        self.mean.len()
    }

    /// Returns the number of traces processed.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Determine if two [`MeanVar`] are compatible for addition.
    ///
    /// If they were created with the same parameters, they are compatible.
    fn is_compatible_with(&self, other: &Self) -> bool {
        self.size() == other.size()
    }
}

impl Add for MeanVar {
    type Output = Self;

    /// Merge computations of two [`MeanVar`]. Processors need to be compatible to be merged
    /// together, otherwise it can panic or yield incoherent result (see
    /// [`MeanVar::is_compatible_with`]).
    ///
    /// # Panics
    /// Panics in debug if the processors are not compatible.
    fn add(self, rhs: Self) -> Self::Output {
        debug_assert!(self.is_compatible_with(&rhs));

        if rhs.count == 0 {
            return self;
        }
        if self.count == 0 {
            return rhs;
        }

        let count = self.count + rhs.count;
        let weight = rhs.count as f64 / count as f64;
        let cross = (self.count as f64 * rhs.count as f64) / count as f64;

        let mut mean = self.mean;
        let mut m2 = self.m2;
        for i in 0..mean.len() {
            let delta = rhs.mean[i] - mean[i];
            mean[i] += delta * weight;
            m2[i] += rhs.m2[i] + delta * delta * cross;
        }

        Self { mean, m2, count }
    }
}

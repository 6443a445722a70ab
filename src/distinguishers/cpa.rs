use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rayon::prelude::{IntoParallelIterator, ParallelIterator};
use std::{
    iter::zip,
    ops::Add,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    Error, Sample,
    leakage_model::{GUESS_RANGE, Hypothesis, Intermediate, LeakageModel},
    processors::MeanVar,
    util::{max_abs_per_row, rank_candidates},
};

/// Compute the [`Cpa`] of the given traces using [`CpaProcessor`].
///
/// `values` holds the attacked text byte of each trace.
///
/// # Examples
/// ```
/// use corrkey::distinguishers::cpa::cpa;
/// use corrkey::leakage_model::Hypothesis;
/// use ndarray::array;
///
/// let traces = array![
///     [77, 137, 51, 91],
///     [72, 61, 91, 83],
///     [39, 49, 52, 23],
///     [26, 114, 63, 45],
///     [30, 8, 97, 91],
///     [13, 68, 7, 45],
///     [17, 181, 60, 34],
///     [43, 88, 76, 78],
///     [0, 36, 35, 0],
///     [93, 191, 49, 26],
/// ];
/// let ciphertext_bytes = array![1u8, 3, 1, 2, 3, 2, 2, 1, 3, 1];
/// let cpa = cpa(traces.view(), ciphertext_bytes.view(), &Hypothesis::default(), 2);
/// assert_eq!(cpa.corr().shape(), &[256, 4]);
/// ```
///
/// # Panics
/// - Panic if `traces.shape()[0] != values.shape()[0]`
/// - Panic if `batch_size` is 0.
pub fn cpa<T, I, L>(
    traces: ArrayView2<T>,
    values: ArrayView1<u8>,
    hypothesis: &Hypothesis<I, L>,
    batch_size: usize,
) -> Cpa
where
    T: Sample,
    I: Intermediate,
    L: LeakageModel,
{
    assert_eq!(traces.shape()[0], values.shape()[0]);
    assert!(batch_size > 0);

    match accumulate(traces, values, batch_size, None) {
        Ok(processor) => processor.finalize(hypothesis),
        Err(_) => unreachable!("accumulation without cancellation flag cannot fail"),
    }
}

/// Accumulate the traces into a [`CpaProcessor`], one batch per task.
///
/// Batch processors are merged in batch order, so the result does not depend on the thread
/// schedule. The optional `cancel` flag is checked before each batch.
///
/// # Panics
/// Panic in debug if `traces.shape()[0] != values.shape()[0]` or if `batch_size` is 0.
pub fn accumulate<T: Sample>(
    traces: ArrayView2<T>,
    values: ArrayView1<u8>,
    batch_size: usize,
    cancel: Option<&AtomicBool>,
) -> Result<CpaProcessor, Error> {
    debug_assert_eq!(traces.shape()[0], values.shape()[0]);
    debug_assert!(batch_size > 0);

    let num_samples = traces.shape()[1];
    let batches: Vec<_> = zip(
        traces.axis_chunks_iter(Axis(0), batch_size),
        values.axis_chunks_iter(Axis(0), batch_size),
    )
    .collect();

    let processors = batches
        .into_par_iter()
        .map(|(trace_batch, value_batch)| {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Err(Error::Cancelled);
            }

            let mut processor = CpaProcessor::new(num_samples);
            for (trace, &value) in zip(trace_batch.rows(), value_batch) {
                processor.update(trace, value);
            }

            Ok(processor)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(processors
        .into_iter()
        .fold(CpaProcessor::new(num_samples), |a, b| a + b))
}

/// Result of the CPA[^1] on some traces.
///
/// [^1]: <https://www.iacr.org/archive/ches2004/31560016/31560016.pdf>
#[derive(Debug)]
pub struct Cpa {
    /// Pearson correlation coefficients, one row per guess
    corr: Array2<f64>,
    /// Guesses whose modeled leakage does not vary over the traces
    degenerate: Array1<bool>,
}

impl Cpa {
    /// Rank guesses, most likely first.
    pub fn rank(&self) -> Array1<usize> {
        Array1::from_vec(rank_candidates(
            self.max_corr().view(),
            self.degenerate.view(),
        ))
    }

    /// Return the Pearson correlation coefficients.
    ///
    /// Rows of degenerate guesses are filled with zeros.
    pub fn corr(&self) -> ArrayView2<f64> {
        self.corr.view()
    }

    /// Return which guesses are degenerate.
    pub fn degenerate(&self) -> ArrayView1<bool> {
        self.degenerate.view()
    }

    /// Return the guess with the highest absolute Pearson correlation coefficient.
    pub fn best_guess(&self) -> usize {
        self.rank()[0]
    }

    /// Return the maximum absolute Pearson correlation coefficient for each guess.
    pub fn max_corr(&self) -> Array1<f64> {
        max_abs_per_row(self.corr.view())
    }
}

/// A processor that computes the [`Cpa`] of the given traces.
///
/// The modeled leakage of a trace only depends on the value of the attacked text byte, so
/// traces are partitioned on that value (see 4.3 in [^1]) and only the mean and variance of each
/// partition are kept. The Pearson sums over all traces are then rebuilt exactly from the
/// partition statistics, for any leakage model.
///
/// [^1]: <https://eprint.iacr.org/2013/794.pdf>
#[derive(Debug, Clone)]
pub struct CpaProcessor {
    /// Number of samples per trace
    num_samples: usize,
    /// Trace statistics per value of the attacked byte
    partitions: Vec<MeanVar>,
}

impl CpaProcessor {
    pub fn new(num_samples: usize) -> Self {
        Self {
            num_samples,
            partitions: (0..GUESS_RANGE)
                .map(|_| MeanVar::new(num_samples))
                .collect(),
        }
    }

    /// # Panics
    /// Panic in debug if `trace.shape()[0] != self.num_samples`.
    pub fn update<T: Sample>(&mut self, trace: ArrayView1<T>, value: u8) {
        debug_assert_eq!(trace.shape()[0], self.num_samples);

        self.partitions[value as usize].process(trace);
    }

    /// Returns the number of traces processed.
    pub fn num_traces(&self) -> usize {
        self.partitions.iter().map(MeanVar::count).sum()
    }

    /// Returns the number of samples per trace.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Compute the statistics shared by every guess.
    pub fn correlator(&self) -> Correlator {
        let counts: Array1<f64> = self
            .partitions
            .iter()
            .map(|partition| partition.count() as f64)
            .collect();

        let overall = self
            .partitions
            .iter()
            .cloned()
            .fold(MeanVar::new(self.num_samples), |a, b| a + b);

        let mut centered_means = Array2::zeros((GUESS_RANGE, self.num_samples));
        for (mut row, partition) in zip(centered_means.rows_mut(), &self.partitions) {
            if partition.count() > 0 {
                row.assign(&(&partition.mean() - &overall.mean()));
            }
        }

        Correlator {
            num_traces: overall.count(),
            counts,
            centered_means,
            sum_squares: overall.sum_squared_deviations().to_owned(),
        }
    }

    /// Finalize the calculation after feeding the overall traces.
    pub fn finalize<I, L>(&self, hypothesis: &Hypothesis<I, L>) -> Cpa
    where
        I: Intermediate,
        L: LeakageModel,
    {
        let correlator = self.correlator();

        let rows: Vec<Option<Array1<f64>>> = (0..GUESS_RANGE)
            .into_par_iter()
            .map(|guess| {
                correlator
                    .correlate(hypothesis.modeled_leakages(guess as u8).view())
                    .ok()
            })
            .collect();

        let mut corr = Array2::zeros((GUESS_RANGE, self.num_samples));
        let mut degenerate = Array1::from_elem(GUESS_RANGE, false);
        for (guess, row) in rows.into_iter().enumerate() {
            match row {
                Some(row) => corr.row_mut(guess).assign(&row),
                None => degenerate[guess] = true,
            }
        }

        Cpa { corr, degenerate }
    }

    /// Determine if two [`CpaProcessor`] are compatible for addition.
    ///
    /// If they were created with the same parameters, they are compatible.
    fn is_compatible_with(&self, other: &Self) -> bool {
        self.num_samples == other.num_samples
    }
}

impl Add for CpaProcessor {
    type Output = Self;

    /// Merge computations of two [`CpaProcessor`]. Processors need to be compatible to be merged
    /// together, otherwise it can panic or yield incoherent result (see
    /// [`CpaProcessor::is_compatible_with`]).
    ///
    /// # Panics
    /// Panics in debug if the processors are not compatible.
    fn add(self, rhs: Self) -> Self::Output {
        debug_assert!(self.is_compatible_with(&rhs));

        Self {
            num_samples: self.num_samples,
            partitions: zip(self.partitions, rhs.partitions)
                .map(|(a, b)| a + b)
                .collect(),
        }
    }
}

/// Guess-independent statistics of a [`CpaProcessor`].
///
/// Trace means and variances do not depend on the key guess; they are computed once and shared
/// by the correlation of every guess.
#[derive(Debug, Clone)]
pub struct Correlator {
    /// Number of traces
    num_traces: usize,
    /// Number of traces per value of the attacked byte
    counts: Array1<f64>,
    /// Mean trace of each partition minus the mean trace of the corpus
    centered_means: Array2<f64>,
    /// Sum of squared deviations of the traces from their mean, per sample
    sum_squares: Array1<f64>,
}

impl Correlator {
    /// Compute the Pearson correlation coefficient between the modeled leakages and each sample.
    ///
    /// `modeled_leakages[v]` is the predicted leakage of a trace whose attacked byte equals `v`
    /// (see [`Hypothesis::modeled_leakages`]). Samples that never vary get a coefficient of 0.
    ///
    /// Returns [`Error::DegenerateHypothesis`] if every trace has the same modeled leakage, in
    /// which case the coefficient is undefined.
    ///
    /// # Panics
    /// Panic in debug if `modeled_leakages.len() != 256`.
    pub fn correlate(&self, modeled_leakages: ArrayView1<f64>) -> Result<Array1<f64>, Error> {
        debug_assert_eq!(modeled_leakages.len(), GUESS_RANGE);

        let mut populated = zip(&self.counts, &modeled_leakages)
            .filter(|(count, _)| **count > 0.)
            .map(|(_, leakage)| *leakage);
        let constant = match populated.next() {
            Some(first) => populated.all(|leakage| leakage == first),
            None => true,
        };
        if constant {
            return Err(Error::DegenerateHypothesis);
        }

        // Deviations from the mean hypothesis, scaled by the number of traces. The scaling keeps
        // them exact for integer leakage models and does not change the coefficients.
        let num_traces = self.num_traces as f64;
        let sum_leakages = self.counts.dot(&modeled_leakages);
        let deviations = modeled_leakages.mapv(|leakage| num_traces * leakage - sum_leakages);

        let sum_squares_hypothesis: f64 = zip(&self.counts, &deviations)
            .map(|(count, deviation)| count * deviation * deviation)
            .sum();
        if !(sum_squares_hypothesis > 0.) {
            return Err(Error::DegenerateHypothesis);
        }

        let mut cov = Array1::zeros(self.centered_means.ncols());
        for (v, centered_mean) in self.centered_means.rows().into_iter().enumerate() {
            if self.counts[v] > 0. {
                cov.scaled_add(self.counts[v] * deviations[v], &centered_mean);
            }
        }

        let norm_hypothesis = sum_squares_hypothesis.sqrt();
        Ok(Zip::from(&cov)
            .and(&self.sum_squares)
            .map_collect(|&cov, &sum_squares| {
                if sum_squares > 0. {
                    (cov / (norm_hypothesis * sum_squares.sqrt())).clamp(-1., 1.)
                } else {
                    0.
                }
            }))
    }

    /// Returns the number of traces.
    pub fn num_traces(&self) -> usize {
        self.num_traces
    }
}

//! Key recovery: rank the candidates of each key byte and assemble the key.
//!
//! A recovery is a single pass over an immutable [`TraceCorpus`]: each key byte is attacked
//! independently, its traces are accumulated once, every candidate is correlated and reduced to a
//! score, and the scores are ranked. There is no intermediate state to retry or resume from;
//! running the same attack on the same corpus always yields the same result.
use ndarray::{Array1, ArrayView1};
use rayon::prelude::{IntoParallelIterator, ParallelIterator};
use serde::Serialize;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    Error, Sample,
    config::AttackConfig,
    distinguishers::cpa::{CpaProcessor, accumulate},
    leakage_model::{
        GUESS_RANGE, HammingWeight, Hypothesis, Intermediate, LastRoundXor, LeakageModel,
    },
    trace::TraceCorpus,
    util::{max_abs, rank_candidates},
};

#[cfg(feature = "progress_bar")]
use crate::util::progress_bar;

/// Recover the key with the default hypothesis, Hamming weight of `text ^ key`.
///
/// See [`Attack::recover_key`].
pub fn recover_key<T: Sample>(
    corpus: &TraceCorpus<T>,
    known_key: Option<&[u8]>,
    config: AttackConfig,
) -> Result<KeyRecovery, Error> {
    Attack::new(corpus, Hypothesis::default(), config).recover_key(known_key)
}

/// A CPA attack against the key bytes of one corpus.
pub struct Attack<'a, T, I = LastRoundXor, L = HammingWeight> {
    corpus: &'a TraceCorpus<T>,
    hypothesis: Hypothesis<I, L>,
    config: AttackConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, T, I, L> Attack<'a, T, I, L>
where
    T: Sample,
    I: Intermediate,
    L: LeakageModel,
{
    pub fn new(
        corpus: &'a TraceCorpus<T>,
        hypothesis: Hypothesis<I, L>,
        config: AttackConfig,
    ) -> Self {
        Self {
            corpus,
            hypothesis,
            config,
            cancel: None,
        }
    }

    /// Abort the attack with [`Error::Cancelled`] once `flag` is set.
    ///
    /// The flag is checked between trace batches and between candidates, never inside a
    /// correlation.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &AttackConfig {
        &self.config
    }

    /// Compute the correlation trace of one key byte candidate.
    ///
    /// This accumulates the whole corpus for a single candidate; use [`Attack::attack_byte`] to
    /// score all the candidates of a byte.
    pub fn correlate(&self, byte_index: usize, guess: u8) -> Result<Array1<f64>, Error> {
        self.config.validate()?;

        self.processor(byte_index)?
            .correlator()
            .correlate(self.hypothesis.modeled_leakages(guess).view())
    }

    /// Rank the 256 candidates of key byte `byte_index`.
    ///
    /// If `known_key_byte` is given, the result also holds its partial guessing entropy.
    pub fn attack_byte(
        &self,
        byte_index: usize,
        known_key_byte: Option<u8>,
    ) -> Result<ByteResult, Error> {
        self.config.validate()?;

        self.run_byte(byte_index, known_key_byte, &|| {})
    }

    /// Attack the first `num_key_bytes` key bytes in parallel and assemble the recovered key.
    ///
    /// `known_key`, when given, is only used to compute the partial guessing entropy of each
    /// byte. It may be longer than `num_key_bytes`, extra bytes are ignored. The corpus and the
    /// known key are checked before any correlation is computed.
    pub fn recover_key(&self, known_key: Option<&[u8]>) -> Result<KeyRecovery, Error> {
        self.config.validate()?;

        let num_key_bytes = self.config.num_key_bytes;
        if num_key_bytes > self.corpus.block_size() {
            return Err(Error::ByteIndexOutOfRange {
                byte_index: num_key_bytes - 1,
                block_size: self.corpus.block_size(),
            });
        }
        if let Some(key) = known_key {
            if key.len() < num_key_bytes {
                return Err(Error::KeyLength {
                    expected: num_key_bytes,
                    actual: key.len(),
                });
            }
        }

        tracing::info!(
            num_traces = self.corpus.num_traces(),
            num_samples = self.corpus.num_samples(),
            num_key_bytes,
            "starting key recovery"
        );

        #[cfg(feature = "progress_bar")]
        let bar = progress_bar(num_key_bytes * GUESS_RANGE);
        #[cfg(feature = "progress_bar")]
        let tick = || bar.inc(1);
        #[cfg(not(feature = "progress_bar"))]
        let tick = || {};

        let bytes = (0..num_key_bytes)
            .into_par_iter()
            .map(|byte_index| {
                self.run_byte(byte_index, known_key.map(|key| key[byte_index]), &tick)
            })
            .collect::<Result<Vec<_>, _>>()?;

        #[cfg(feature = "progress_bar")]
        bar.finish();

        Ok(KeyRecovery::new(bytes))
    }

    fn run_byte(
        &self,
        byte_index: usize,
        known_key_byte: Option<u8>,
        tick: &(dyn Fn() + Sync),
    ) -> Result<ByteResult, Error> {
        let correlator = self.processor(byte_index)?.correlator();

        let outcomes = (0..GUESS_RANGE)
            .into_par_iter()
            .map(|guess| {
                self.check_cancelled()?;

                let outcome = match correlator
                    .correlate(self.hypothesis.modeled_leakages(guess as u8).view())
                {
                    Ok(corr) => Some(max_abs(corr.view())),
                    Err(Error::DegenerateHypothesis) => {
                        tracing::debug!(byte_index, guess, "degenerate hypothesis");
                        None
                    }
                    Err(e) => return Err(e),
                };
                tick();

                Ok(outcome)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let scores: Array1<f64> = outcomes.iter().map(|score| score.unwrap_or(0.)).collect();
        let degenerate: Array1<bool> = outcomes.iter().map(Option::is_none).collect();
        let result = ByteResult::new(byte_index, scores, degenerate, known_key_byte);

        if result.is_conclusive() {
            tracing::info!(
                byte_index,
                best_guess = result.best_guess(),
                score = result.best_score(),
                pge = result.pge,
                "recovered key byte"
            );
        } else {
            tracing::warn!(byte_index, "every candidate is degenerate, byte is inconclusive");
        }

        Ok(result)
    }

    fn processor(&self, byte_index: usize) -> Result<CpaProcessor, Error> {
        let values = self
            .corpus
            .text_bytes(self.config.text_source, byte_index)?;

        accumulate(
            self.corpus.traces(),
            values,
            self.config.batch_size,
            self.cancel.as_deref(),
        )
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Candidate ranking of one key byte.
#[derive(Debug, Clone, Serialize)]
pub struct ByteResult {
    byte_index: usize,
    /// Peak absolute correlation of each candidate, 0 for degenerate candidates
    scores: Array1<f64>,
    /// Candidates whose hypothesis does not vary over the traces
    degenerate: Array1<bool>,
    /// Candidates from the most to the least likely
    ranking: Vec<u8>,
    /// Rank of the known key byte, if any
    pge: Option<usize>,
}

impl ByteResult {
    /// Rank scored candidates.
    ///
    /// # Panics
    /// Panic in debug if `scores` or `degenerate` does not hold 256 entries.
    pub fn new(
        byte_index: usize,
        scores: Array1<f64>,
        degenerate: Array1<bool>,
        known_key_byte: Option<u8>,
    ) -> Self {
        debug_assert_eq!(scores.len(), GUESS_RANGE);
        debug_assert_eq!(degenerate.len(), GUESS_RANGE);

        let ranking: Vec<u8> = rank_candidates(scores.view(), degenerate.view())
            .into_iter()
            .map(|guess| guess as u8)
            .collect();

        let mut result = Self {
            byte_index,
            scores,
            degenerate,
            ranking,
            pge: None,
        };
        result.pge = known_key_byte.map(|key_byte| result.rank_of(key_byte));

        result
    }

    pub fn byte_index(&self) -> usize {
        self.byte_index
    }

    /// Return the most likely candidate.
    pub fn best_guess(&self) -> u8 {
        self.ranking[0]
    }

    /// Return the score of the most likely candidate.
    pub fn best_score(&self) -> f64 {
        self.scores[self.best_guess() as usize]
    }

    /// Return the peak absolute correlation of each candidate.
    pub fn scores(&self) -> ArrayView1<f64> {
        self.scores.view()
    }

    pub fn degenerate(&self) -> ArrayView1<bool> {
        self.degenerate.view()
    }

    /// Return the candidates from the most to the least likely.
    pub fn ranking(&self) -> &[u8] {
        &self.ranking
    }

    /// Return the 0-based rank of `guess`.
    pub fn rank_of(&self, guess: u8) -> usize {
        self.ranking
            .iter()
            .position(|&candidate| candidate == guess)
            .unwrap_or(GUESS_RANGE)
    }

    /// Return the partial guessing entropy of the known key byte.
    pub fn pge(&self) -> Result<usize, Error> {
        self.pge.ok_or(Error::MissingKnownKey)
    }

    /// Returns `false` if no candidate could be distinguished from the others.
    pub fn is_conclusive(&self) -> bool {
        !self.degenerate[self.best_guess() as usize]
    }
}

/// The key bytes guessed by an attack, in key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveredKey(Vec<u8>);

impl RecoveredKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RecoveredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Result of [`Attack::recover_key`].
#[derive(Debug, Clone, Serialize)]
pub struct KeyRecovery {
    key: RecoveredKey,
    bytes: Vec<ByteResult>,
}

impl KeyRecovery {
    fn new(bytes: Vec<ByteResult>) -> Self {
        Self {
            key: RecoveredKey(bytes.iter().map(ByteResult::best_guess).collect()),
            bytes,
        }
    }

    pub fn key(&self) -> &RecoveredKey {
        &self.key
    }

    /// Return the ranking of every attacked byte.
    pub fn bytes(&self) -> &[ByteResult] {
        &self.bytes
    }

    /// Return the partial guessing entropy of every byte.
    ///
    /// Fails with [`Error::MissingKnownKey`] if the attack was run without a known key.
    pub fn pge(&self) -> Result<Vec<usize>, Error> {
        self.bytes.iter().map(ByteResult::pge).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Attack, recover_key};
    use crate::{
        Error,
        config::{AttackConfig, TextSource},
        leakage_model::{HammingWeight, Hypothesis, LastRoundXor, hw},
        trace::TraceCorpus,
    };
    use ndarray::{Array1, Array2};
    use ndarray_rand::{
        RandomExt,
        rand::{SeedableRng, rngs::StdRng},
        rand_distr::{Normal, Uniform},
    };
    use std::sync::{Arc, atomic::AtomicBool};

    /// Random texts and gaussian noise traces where `leak_point` leaks the Hamming weight of
    /// `ciphertext[b] ^ key[b]` for every key byte `b`, on consecutive samples.
    fn synthetic_corpus(
        num_traces: usize,
        num_samples: usize,
        key: &[u8],
        leak_point: usize,
        noise: f64,
        seed: u64,
    ) -> TraceCorpus<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let plaintexts = Array2::random_using(
            (num_traces, 16),
            Uniform::new_inclusive(0u8, 255u8),
            &mut rng,
        );
        let ciphertexts = Array2::random_using(
            (num_traces, 16),
            Uniform::new_inclusive(0u8, 255u8),
            &mut rng,
        );
        let mut traces = Array2::random_using(
            (num_traces, num_samples),
            Normal::new(0., 1.).unwrap(),
            &mut rng,
        );
        let leak_noise = Array2::random_using(
            (num_traces, key.len()),
            Normal::new(0., noise).unwrap(),
            &mut rng,
        );

        for i in 0..num_traces {
            for (b, &key_byte) in key.iter().enumerate() {
                traces[[i, leak_point + b]] =
                    hw(ciphertexts[[i, b]] ^ key_byte) as f64 + leak_noise[[i, b]];
            }
        }

        TraceCorpus::new(traces, plaintexts, ciphertexts).unwrap()
    }

    fn config(num_key_bytes: usize) -> AttackConfig {
        AttackConfig {
            num_key_bytes,
            batch_size: 128,
            text_source: TextSource::Ciphertext,
        }
    }

    #[test]
    fn test_perfect_model() {
        let corpus = synthetic_corpus(400, 8, &[0x2b], 4, 0., 1);
        let attack = Attack::new(&corpus, Hypothesis::default(), config(1));

        let result = attack.attack_byte(0, Some(0x2b)).unwrap();
        assert_eq!(result.best_guess(), 0x2b);
        assert_eq!(result.pge().unwrap(), 0);
        assert!((result.best_score() - 1.).abs() < 1e-12);
        assert!(result.is_conclusive());
    }

    #[test]
    fn test_end_to_end() {
        // Noise standard deviation is 5% of the Hamming weight spread.
        for seed in 0..5 {
            let corpus = synthetic_corpus(1000, 10, &[0x3c], 5, 0.4, seed);
            let recovery = recover_key(&corpus, Some(&[0x3c]), config(1)).unwrap();

            assert_eq!(recovery.key().as_bytes(), &[0x3c]);
            assert_eq!(recovery.pge().unwrap(), vec![0]);
        }
    }

    #[test]
    fn test_full_key() {
        let key = [
            0x88, 0x19, 0x2a, 0x3b, 0x4c, 0x5d, 0x6e, 0x7f, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55,
            0x66, 0x77,
        ];
        let corpus = synthetic_corpus(2000, 24, &key, 4, 0.4, 42);
        let recovery = recover_key(&corpus, Some(&key), config(16)).unwrap();

        // 0x88 ties with its complement 0x77 and loses on value.
        assert_eq!(recovery.bytes()[0].best_guess(), 0x77);
        assert_eq!(recovery.bytes()[0].pge().unwrap(), 1);
        assert_eq!(&recovery.key().as_bytes()[1..], &key[1..]);
        assert_eq!(recovery.pge().unwrap()[1..], [0; 15]);
        assert_eq!(recovery.key().len(), 16);
    }

    #[test]
    fn test_partial_recovery_with_full_known_key() {
        let key = [
            0x10, 0x21, 0x32, 0x43, 0x54, 0x65, 0x76, 0x07, 0x18, 0x29, 0x3a, 0x4b, 0x5c, 0x6d,
            0x7e, 0x0f,
        ];
        let corpus = synthetic_corpus(1000, 8, &key[..4], 2, 0.4, 21);
        let attack = Attack::new(&corpus, Hypothesis::default(), config(4));
        assert_eq!(attack.config().num_key_bytes, 4);

        let recovery = attack.recover_key(Some(&key)).unwrap();
        assert_eq!(recovery.key().as_bytes(), &key[..4]);
        assert_eq!(recovery.pge().unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_determinism() {
        let corpus = synthetic_corpus(600, 12, &[0x3c, 0x51], 3, 1., 9);
        let attack = Attack::new(&corpus, Hypothesis::default(), config(2));

        let first = attack.attack_byte(1, None).unwrap();
        let second = attack.attack_byte(1, None).unwrap();
        assert_eq!(first.scores(), second.scores());
        assert_eq!(first.ranking(), second.ranking());
        assert_eq!(first.best_guess(), second.best_guess());
    }

    #[test]
    fn test_byte_order_independence() {
        let corpus = synthetic_corpus(800, 12, &[0x3c, 0x51], 3, 0.5, 3);
        let attack = Attack::new(&corpus, Hypothesis::default(), config(2));

        let byte_1 = attack.attack_byte(1, Some(0x51)).unwrap();
        let byte_0 = attack.attack_byte(0, Some(0x3c)).unwrap();
        let recovery = attack.recover_key(Some(&[0x3c, 0x51])).unwrap();

        assert_eq!(recovery.bytes()[0].scores(), byte_0.scores());
        assert_eq!(recovery.bytes()[1].scores(), byte_1.scores());
        assert_eq!(recovery.key().as_bytes(), &[0x3c, 0x51]);

        // Swapping the ciphertext columns swaps the results and nothing else.
        let mut ciphertexts = corpus.ciphertexts().to_owned();
        let column_0 = ciphertexts.column(0).to_owned();
        let column_1 = ciphertexts.column(1).to_owned();
        ciphertexts.column_mut(0).assign(&column_1);
        ciphertexts.column_mut(1).assign(&column_0);
        let swapped = TraceCorpus::new(
            corpus.traces().to_owned(),
            corpus.plaintexts().to_owned(),
            ciphertexts,
        )
        .unwrap();
        let swapped_recovery = recover_key(&swapped, None, config(2)).unwrap();

        assert_eq!(swapped_recovery.bytes()[0].scores(), byte_1.scores());
        assert_eq!(swapped_recovery.bytes()[1].scores(), byte_0.scores());
    }

    #[test]
    fn test_degenerate_candidates() {
        // Ciphertext bytes are 0x00 or 0x03: half of the guesses predict the same Hamming
        // weight for every trace.
        let mut rng = StdRng::seed_from_u64(5);
        let choice = Array1::random_using(200, Uniform::new_inclusive(0u8, 1u8), &mut rng);
        let ciphertexts = Array2::from_shape_fn((200, 1), |(i, _)| choice[i] * 3);
        let mut traces = Array2::random_using((200, 4), Normal::new(0., 1.).unwrap(), &mut rng);
        for i in 0..200 {
            traces[[i, 2]] += 4. * hw(ciphertexts[[i, 0]]) as f64;
        }
        let corpus = TraceCorpus::new(traces, ciphertexts.clone(), ciphertexts).unwrap();
        let attack = Attack::new(&corpus, Hypothesis::default(), config(1));

        let result = attack.attack_byte(0, Some(0x00)).unwrap();
        assert!(result.degenerate()[0x01]);
        assert!(result.degenerate()[0x02]);
        assert_eq!(result.degenerate().iter().filter(|&&d| d).count(), 128);
        assert!(result.is_conclusive());
        assert_eq!(result.best_guess(), 0x00);
        assert_eq!(result.pge().unwrap(), 0);
        assert!(result.scores().iter().all(|score| score.is_finite()));
        assert!(
            result.ranking()[128..]
                .iter()
                .all(|&guess| result.degenerate()[guess as usize])
        );
        assert!(matches!(
            attack.correlate(0, 0x01),
            Err(Error::DegenerateHypothesis)
        ));
    }

    #[test]
    fn test_single_valued_byte_is_inconclusive() {
        let traces = Array2::from_shape_fn((20, 3), |(i, j)| (i * j) as f64);
        let texts = Array2::from_elem((20, 1), 0x42u8);
        let corpus = TraceCorpus::new(traces, texts.clone(), texts).unwrap();

        let result = Attack::new(&corpus, Hypothesis::default(), config(1))
            .attack_byte(0, None)
            .unwrap();
        assert!(!result.is_conclusive());
        assert_eq!(result.best_guess(), 0x00);
        assert!(matches!(result.pge(), Err(Error::MissingKnownKey)));
    }

    #[test]
    fn test_plaintext_source() {
        let corpus = synthetic_corpus(500, 8, &[0x17], 2, 0.2, 11);
        // Build a corpus where the plaintexts are the leaking texts.
        let swapped = TraceCorpus::new(
            corpus.traces().to_owned(),
            corpus.ciphertexts().to_owned(),
            corpus.plaintexts().to_owned(),
        )
        .unwrap();
        let attack = Attack::new(
            &swapped,
            Hypothesis::new(LastRoundXor, HammingWeight),
            AttackConfig {
                text_source: TextSource::Plaintext,
                ..config(1)
            },
        );

        assert_eq!(attack.attack_byte(0, None).unwrap().best_guess(), 0x17);
    }

    #[test]
    fn test_usage_errors() {
        let corpus = synthetic_corpus(50, 4, &[0x01], 0, 0.1, 0);

        assert!(matches!(
            recover_key(&corpus, Some(&[0x01]), config(2)),
            Err(Error::KeyLength {
                expected: 2,
                actual: 1
            })
        ));
        assert!(matches!(
            recover_key(&corpus, None, config(17)),
            Err(Error::ByteIndexOutOfRange {
                byte_index: 16,
                block_size: 16
            })
        ));
        assert!(matches!(
            recover_key(&corpus, None, config(1)).unwrap().pge(),
            Err(Error::MissingKnownKey)
        ));
        assert!(matches!(
            recover_key(
                &corpus,
                None,
                AttackConfig {
                    batch_size: 0,
                    ..config(1)
                }
            ),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_cancellation() {
        let corpus = synthetic_corpus(100, 4, &[0x01], 0, 0.1, 0);
        let flag = Arc::new(AtomicBool::new(true));
        let attack =
            Attack::new(&corpus, Hypothesis::default(), config(16)).with_cancel_flag(flag);

        assert!(matches!(attack.recover_key(None), Err(Error::Cancelled)));
    }
}

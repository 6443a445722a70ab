use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use num_traits::AsPrimitive;

use crate::{Error, Sample, config::TextSource};

/// An immutable set of side channel traces with their matching plaintexts and ciphertexts.
///
/// Row `i` of the trace matrix was captured while encrypting row `i` of the plaintexts into row
/// `i` of the ciphertexts. The three matrices are only ever handed out as read-only views, so
/// the pairing cannot be broken once the corpus is built.
#[derive(Debug, Clone)]
pub struct TraceCorpus<T> {
    /// Leakage waveforms, one trace per row
    traces: Array2<T>,
    /// Plaintext blocks, one block per row
    plaintexts: Array2<u8>,
    /// Ciphertext blocks, one block per row
    ciphertexts: Array2<u8>,
}

impl<T: Sample> TraceCorpus<T> {
    /// Build a corpus after checking that the traces and texts are consistent.
    ///
    /// Fails with [`Error::MalformedCorpus`] if the corpus is empty, if the texts are not
    /// aligned with the traces, if plaintexts and ciphertexts have different block sizes or if a
    /// sample is not finite.
    pub fn new(
        traces: Array2<T>,
        plaintexts: Array2<u8>,
        ciphertexts: Array2<u8>,
    ) -> Result<Self, Error> {
        let num_traces = traces.nrows();

        if num_traces == 0 {
            return Err(Error::MalformedCorpus("corpus contains no trace".into()));
        }
        if traces.ncols() == 0 {
            return Err(Error::MalformedCorpus("traces contain no sample".into()));
        }
        if plaintexts.nrows() != num_traces || ciphertexts.nrows() != num_traces {
            return Err(Error::MalformedCorpus(format!(
                "{num_traces} traces but {} plaintexts and {} ciphertexts",
                plaintexts.nrows(),
                ciphertexts.nrows()
            )));
        }
        if plaintexts.ncols() != ciphertexts.ncols() {
            return Err(Error::MalformedCorpus(format!(
                "plaintexts are {} bytes long but ciphertexts are {} bytes long",
                plaintexts.ncols(),
                ciphertexts.ncols()
            )));
        }
        if plaintexts.ncols() == 0 {
            return Err(Error::MalformedCorpus("texts are empty".into()));
        }
        if let Some(((trace, sample), _)) = traces
            .indexed_iter()
            .find(|(_, x)| !AsPrimitive::<f64>::as_(**x).is_finite())
        {
            return Err(Error::MalformedCorpus(format!(
                "sample {sample} of trace {trace} is not finite"
            )));
        }

        Ok(Self {
            traces,
            plaintexts,
            ciphertexts,
        })
    }

    /// Build a corpus from row vectors, rejecting ragged input.
    pub fn from_rows(
        traces: Vec<Vec<T>>,
        plaintexts: Vec<Vec<u8>>,
        ciphertexts: Vec<Vec<u8>>,
    ) -> Result<Self, Error> {
        Self::new(
            stack_rows(traces, "trace")?,
            stack_rows(plaintexts, "plaintext")?,
            stack_rows(ciphertexts, "ciphertext")?,
        )
    }
}

impl<T> TraceCorpus<T> {
    /// Returns the number of traces.
    pub fn num_traces(&self) -> usize {
        self.traces.nrows()
    }

    /// Returns the number of samples in each trace.
    pub fn num_samples(&self) -> usize {
        self.traces.ncols()
    }

    /// Returns the size of a text block in bytes.
    pub fn block_size(&self) -> usize {
        self.ciphertexts.ncols()
    }

    pub fn traces(&self) -> ArrayView2<T> {
        self.traces.view()
    }

    pub fn plaintexts(&self) -> ArrayView2<u8> {
        self.plaintexts.view()
    }

    pub fn ciphertexts(&self) -> ArrayView2<u8> {
        self.ciphertexts.view()
    }

    /// Returns the texts selected by `source`.
    pub fn texts(&self, source: TextSource) -> ArrayView2<u8> {
        match source {
            TextSource::Plaintext => self.plaintexts(),
            TextSource::Ciphertext => self.ciphertexts(),
        }
    }

    /// Returns byte `byte_index` of every text selected by `source`.
    pub fn text_bytes(
        &self,
        source: TextSource,
        byte_index: usize,
    ) -> Result<ArrayView1<u8>, Error> {
        if byte_index >= self.block_size() {
            return Err(Error::ByteIndexOutOfRange {
                byte_index,
                block_size: self.block_size(),
            });
        }

        Ok(self.texts(source).index_axis_move(Axis(1), byte_index))
    }
}

fn stack_rows<T: Clone>(rows: Vec<Vec<T>>, what: &str) -> Result<Array2<T>, Error> {
    let width = rows.first().map_or(0, Vec::len);
    if let Some(i) = rows.iter().position(|row| row.len() != width) {
        return Err(Error::MalformedCorpus(format!(
            "{what} {i} has {} elements, expected {width}",
            rows[i].len()
        )));
    }

    let height = rows.len();
    Array2::from_shape_vec((height, width), rows.concat())
        .map_err(|e| Error::MalformedCorpus(e.to_string()))
}

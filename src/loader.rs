//! Read traces and texts saved by an acquisition campaign.
//!
//! Traces are stored as 2-D numpy arrays, one trace per row, possibly split over several
//! files. Texts are stored in a text file with one encryption per line:
//!
//! ```text
//! <plaintext hex> <ciphertext hex>
//! ```
use itertools::Itertools;
use ndarray::{Array2, ArrayView2, Axis, concatenate};
use ndarray_npy::{ReadableElement, read_npy};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::{Error, Sample, trace::TraceCorpus};

/// Read a trace matrix from a `.npy` file.
pub fn read_traces<T, P>(path: P) -> Result<Array2<T>, Error>
where
    T: ReadableElement,
    P: AsRef<Path>,
{
    Ok(read_npy(path)?)
}

/// Read several `.npy` trace files and stack their traces in file order.
pub fn read_trace_files<T, P>(paths: &[P]) -> Result<Array2<T>, Error>
where
    T: ReadableElement + Clone,
    P: AsRef<Path>,
{
    let parts = paths
        .iter()
        .map(|path| read_traces(path))
        .collect::<Result<Vec<Array2<T>>, _>>()?;

    if let Some((a, b)) = parts
        .iter()
        .tuple_windows()
        .find(|(a, b)| a.ncols() != b.ncols())
    {
        return Err(Error::MalformedCorpus(format!(
            "trace files have different trace lengths ({} and {})",
            a.ncols(),
            b.ncols()
        )));
    }

    let views: Vec<ArrayView2<T>> = parts.iter().map(Array2::view).collect();
    concatenate(Axis(0), &views).map_err(|e| Error::MalformedCorpus(e.to_string()))
}

/// Parse plaintext/ciphertext pairs, one `"<plaintext hex> <ciphertext hex>"` pair per line.
///
/// Blank lines are skipped. Every block must have the same size.
pub fn parse_text_pairs<R: BufRead>(reader: R) -> Result<(Array2<u8>, Array2<u8>), Error> {
    let mut plaintexts = Vec::new();
    let mut ciphertexts = Vec::new();
    let mut block_size = None;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let number = i + 1;
        if line.trim().is_empty() {
            continue;
        }

        let Some((plaintext, ciphertext)) = line.split_whitespace().collect_tuple() else {
            return Err(Error::Parse {
                line: number,
                reason: "expected a plaintext and a ciphertext".into(),
            });
        };
        let plaintext = decode_block(plaintext, number)?;
        let ciphertext = decode_block(ciphertext, number)?;

        let expected = *block_size.get_or_insert(plaintext.len());
        if plaintext.len() != expected || ciphertext.len() != expected {
            return Err(Error::Parse {
                line: number,
                reason: format!("blocks must be {expected} bytes long"),
            });
        }

        plaintexts.extend(plaintext);
        ciphertexts.extend(ciphertext);
    }

    let block_size = block_size.unwrap_or(0);
    let num_pairs = if block_size == 0 {
        0
    } else {
        plaintexts.len() / block_size
    };

    Ok((
        Array2::from_shape_vec((num_pairs, block_size), plaintexts)
            .map_err(|e| Error::MalformedCorpus(e.to_string()))?,
        Array2::from_shape_vec((num_pairs, block_size), ciphertexts)
            .map_err(|e| Error::MalformedCorpus(e.to_string()))?,
    ))
}

/// Read plaintext/ciphertext pairs from a file (see [`parse_text_pairs`]).
pub fn read_text_pairs<P: AsRef<Path>>(path: P) -> Result<(Array2<u8>, Array2<u8>), Error> {
    parse_text_pairs(BufReader::new(File::open(path)?))
}

/// Parse a hex encoded key.
pub fn parse_key(key: &str) -> Result<Vec<u8>, Error> {
    Ok(hex::decode(key.trim())?)
}

/// Load the traces of `trace_paths` and the texts of `pairs_path` into a [`TraceCorpus`].
pub fn load_corpus<T, P, Q>(trace_paths: &[P], pairs_path: Q) -> Result<TraceCorpus<T>, Error>
where
    T: Sample + ReadableElement,
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let traces = read_trace_files(trace_paths)?;
    let (plaintexts, ciphertexts) = read_text_pairs(pairs_path)?;

    TraceCorpus::new(traces, plaintexts, ciphertexts)
}

fn decode_block(block: &str, line: usize) -> Result<Vec<u8>, Error> {
    hex::decode(block).map_err(|e| Error::Parse {
        line,
        reason: e.to_string(),
    })
}

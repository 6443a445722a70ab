use anyhow::{Context, Result};
use corrkey::{
    distinguishers::cpa::cpa, leakage_model::Hypothesis, loader::load_corpus, trace::TraceCorpus,
};
use gnuplot::{Figure, PlotOption::Caption};
use std::{env, path::PathBuf};

fn main() -> Result<()> {
    let traces_dir =
        PathBuf::from(env::var("TRACES_DIR").context("Missing TRACES_DIR environment variable")?);

    let mut trace_paths: Vec<PathBuf> = std::fs::read_dir(&traces_dir)
        .context("Failed to list TRACES_DIR")?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "npy")
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with("traces"))
        })
        .collect();
    trace_paths.sort();

    let corpus: TraceCorpus<f64> = load_corpus(&trace_paths, traces_dir.join("pairs.txt"))
        .context("Failed to load corpus")?;

    // Let's recover the first byte of the last round key
    let cpa = cpa(
        corpus.traces(),
        corpus.ciphertexts().column(0),
        &Hypothesis::default(),
        10_000,
    );

    let best_guess = cpa.best_guess();
    println!("Best subkey guess: {best_guess:02x}");

    // Let's plot correlation coefficients of the best guess
    let corr = cpa.corr();
    let corr_best_guess = corr.row(best_guess);

    let mut fg = Figure::new();
    fg.axes2d().lines(
        0..corr_best_guess.len(),
        corr_best_guess,
        &[Caption("Pearson correlation coefficient")],
    );
    fg.show()?;

    Ok(())
}

use anyhow::{Context, Result};
use corrkey::{
    attack::recover_key, config::AttackConfig, loader, report::Report, trace::TraceCorpus,
};
use std::{env, path::PathBuf};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let traces_dir =
        PathBuf::from(env::var("TRACES_DIR").context("Missing TRACES_DIR environment variable")?);

    // Capture campaigns are often split over several files, stack them in name order.
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

    let corpus: TraceCorpus<f64> = loader::load_corpus(&trace_paths, traces_dir.join("pairs.txt"))
        .context("Failed to load corpus")?;

    let known_key = env::var("KNOWN_KEY")
        .ok()
        .map(|key| loader::parse_key(&key))
        .transpose()
        .context("Invalid KNOWN_KEY")?;

    let config = match env::var("ATTACK_CONFIG") {
        Ok(path) => AttackConfig::load(path).context("Failed to load ATTACK_CONFIG")?,
        Err(_) => AttackConfig::default(),
    };

    let recovery = recover_key(&corpus, known_key.as_deref(), config)?;
    let report = Report::from(&recovery);
    println!("{report}");
    report
        .save(traces_dir.join("report.json"))
        .context("Failed to save report")?;

    Ok(())
}

//! meaning CLI: run one analysis or inspect the loaded knowledge.
//!
//! Usage:
//!   meaning analyze <features.json> [--metric cosine|kl_divergence|wasserstein]
//!   meaning check
//!
//! Configuration comes from `$MEANING_CONFIG` (default `config/meaning.toml`) and
//! `MEANING__*` environment overrides; `.env` is loaded first.

use meaning_core::{load_features, AnalysisRequest, EngineConfig, MeaningEngine, Metric};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn usage() {
    eprintln!("meaning: semantic matching and symbolic reasoning");
    eprintln!("  analyze <features.json> [--metric m]   Analyze extractor outputs and print the report as JSON");
    eprintln!("  check                                  Load configuration and print registry/library statistics");
    eprintln!();
    eprintln!("Config: $MEANING_CONFIG (default config/meaning.toml), overrides via MEANING__<KEY>.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let command = args.next();
    let mut features_path: Option<PathBuf> = None;
    let mut metric: Option<Metric> = None;

    while let Some(a) = args.next() {
        match a.as_str() {
            "--metric" => {
                if let Some(m) = args.next() {
                    metric = Some(m.parse()?);
                }
            }
            other if features_path.is_none() && !other.starts_with("--") => {
                features_path = Some(PathBuf::from(other));
            }
            other => warn!("Ignoring unknown argument {}", other),
        }
    }

    match command.as_deref() {
        Some("analyze") => {
            let Some(path) = features_path else {
                usage();
                return Err("analyze needs a features file".into());
            };
            let config = EngineConfig::load()?;
            let engine = MeaningEngine::from_config(&config)?;
            for w in engine.load_warnings() {
                warn!("{}", w);
            }
            let features = load_features(&path)?;
            info!("Analyzing {} extractor output(s) from {}", features.len(), path.display());
            let report = engine.analyze(AnalysisRequest { features, metric }).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some("check") => {
            let config = EngineConfig::load()?;
            let engine = MeaningEngine::from_config(&config)?;
            let snapshot = engine.snapshot().current();
            println!("# effective configuration");
            println!("{}", toml::to_string_pretty(engine.config())?);
            println!("# knowledge");
            println!("dimensions = {}", snapshot.registry.len());
            println!("layers = {:?}", snapshot.registry.layers());
            println!("rules = {}", snapshot.rulebase.len());
            println!("library_entries = {}", snapshot.library.len());
            println!("mission_profile = {}", snapshot.mission_profile.is_some());
            println!("load_warnings = {}", engine.load_warnings().len());
            for w in engine.load_warnings() {
                println!("  - {}", w);
            }
        }
        _ => usage(),
    }

    Ok(())
}

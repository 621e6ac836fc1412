mod ui;

use std::{
    path::Path,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kibitz_engine::UciEngine;
use kibitz_ops::{init_tracing, read_table, read_table_if_present, write_table};
use kibitz_sampler::{PgnCorpus, PositionSampler};
use kibitz_scorer::DeviationScorer;
use kibitz_session::{CsvLabelStore, LabelingSession};
use kibitz_types::{
    config::KibitzConfig,
    records::{LabelledRecord, PositionRecord},
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "kibitz.toml";
const LABEL_LOG_FILE: &str = "kibitz-label.log";

#[derive(Debug, Parser)]
#[command(name = "kibitz", version, about = "Collect and score human move choices")]
struct Cli {
    /// Configuration file; falls back to built-in defaults when unreadable.
    #[arg(long, global = true, env = "KIBITZ_CONFIG")]
    config: Option<String>,
    /// Overrides `ops.log_level`.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Draw one position per game from a PGN corpus.
    Sample(SampleArgs),
    /// Label positions interactively in the terminal.
    Label(LabelArgs),
    /// Score labelled moves with a UCI engine.
    Score(ScoreArgs),
}

#[derive(Debug, Args)]
struct SampleArgs {
    #[arg(long)]
    corpus: Option<String>,
    #[arg(long)]
    out: Option<String>,
    #[arg(long)]
    target: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
struct LabelArgs {
    #[arg(long)]
    positions: Option<String>,
    #[arg(long)]
    out: Option<String>,
}

#[derive(Debug, Args)]
struct ScoreArgs {
    #[arg(long)]
    labelled: Option<String>,
    #[arg(long)]
    out: Option<String>,
    /// Engine executable; overrides `engine.path`.
    #[arg(long)]
    engine: Option<String>,
    #[arg(long)]
    budget_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref());
    if let Some(level) = cli.log_level {
        config.ops.log_level = level;
    }

    match cli.command {
        Command::Sample(args) => {
            apply_sample_args(&mut config, args);
            config.validate()?;
            init_tracing(&config.ops)?;
            run_sample(&config)
        }
        Command::Label(args) => {
            apply_label_args(&mut config, args);
            config.validate()?;
            if config.ops.log_file.is_none() {
                config.ops.log_file = Some(LABEL_LOG_FILE.into());
            }
            init_tracing(&config.ops)?;
            run_label(&config)
        }
        Command::Score(args) => {
            apply_score_args(&mut config, args);
            config.validate()?;
            init_tracing(&config.ops)?;
            run_score(&config).await
        }
    }
}

fn load_config(from_args: Option<&str>) -> KibitzConfig {
    let path = from_args.unwrap_or(DEFAULT_CONFIG);
    match KibitzConfig::from_file(path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path
                );
                KibitzConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path
            );
            KibitzConfig::default()
        }
    }
}

fn apply_sample_args(config: &mut KibitzConfig, args: SampleArgs) {
    if let Some(corpus) = args.corpus {
        config.paths.corpus = corpus;
    }
    if let Some(out) = args.out {
        config.paths.positions = out;
    }
    if let Some(target) = args.target {
        config.sampler.target_count = target;
    }
    if args.seed.is_some() {
        config.sampler.seed = args.seed;
    }
}

fn apply_label_args(config: &mut KibitzConfig, args: LabelArgs) {
    if let Some(positions) = args.positions {
        config.paths.positions = positions;
    }
    if let Some(out) = args.out {
        config.paths.labelled = out;
    }
}

fn apply_score_args(config: &mut KibitzConfig, args: ScoreArgs) {
    if let Some(labelled) = args.labelled {
        config.paths.labelled = labelled;
    }
    if let Some(out) = args.out {
        config.paths.scored = out;
    }
    if let Some(engine) = args.engine {
        config.engine.path = engine;
    }
    if let Some(budget) = args.budget_ms {
        config.engine.time_budget_ms = budget;
    }
}

fn run_sample(config: &KibitzConfig) -> Result<()> {
    let seed = config.sampler.seed.unwrap_or_else(rand::random);
    info!("Sampling with seed {seed} (pass --seed {seed} to repeat this run)");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let corpus = PgnCorpus::open(&config.paths.corpus)?;
    let report = PositionSampler::new(&config.sampler).sample(
        corpus,
        config.sampler.target_count,
        &mut rng,
    );
    if report.positions.len() < config.sampler.target_count {
        warn!(
            "Corpus ran out after {} positions (target {})",
            report.positions.len(),
            config.sampler.target_count
        );
    }
    write_table(Path::new(&config.paths.positions), &report.positions)?;
    info!(
        "Wrote {} positions to {} ({} games checked, {} too short, {} without a usable ply, {} malformed)",
        report.positions.len(),
        config.paths.positions,
        report.games_seen,
        report.games_short,
        report.games_exhausted,
        report.games_malformed
    );
    Ok(())
}

fn run_label(config: &KibitzConfig) -> Result<()> {
    let positions: Vec<PositionRecord> = read_table(Path::new(&config.paths.positions))
        .with_context(|| format!("no position table at {}", config.paths.positions))?;
    let store = CsvLabelStore::new(&config.paths.labelled);
    let mut session = LabelingSession::resume(positions, store, Instant::now())?;

    if session.is_complete() {
        println!(
            "All {} positions are already labelled in {}",
            session.total(),
            session.store().path().display()
        );
        return Ok(());
    }
    ui::run(&mut session)?;

    let labelled = session.collected().len();
    println!(
        "Labelled {labelled}/{} positions; answers saved to {}",
        session.total(),
        session.store().path().display()
    );
    Ok(())
}

async fn run_score(config: &KibitzConfig) -> Result<()> {
    let records: Vec<LabelledRecord> =
        read_table_if_present(Path::new(&config.paths.labelled))?;
    if records.is_empty() {
        warn!("No labelled rows in {}", config.paths.labelled);
    }
    let engine = UciEngine::new(config.engine.clone());
    let budget = Duration::from_millis(config.engine.time_budget_ms);
    let mut scorer = DeviationScorer::new(engine, budget);

    let (scored, summary) = scorer.score_all(&records).await?;
    write_table(Path::new(&config.paths.scored), &scored)?;
    info!(
        "Wrote {} rows to {} ({} scored, {} engine failures, {} invalid)",
        scored.len(),
        config.paths.scored,
        summary.scored,
        summary.engine_failures,
        summary.invalid_rows
    );
    Ok(())
}

use clap::{Parser, Subcommand};
use huginn_afis::{
    AfisError, EngineConfig, FusionPolicy, HuginnAfis, ManifestSource, Matcher, MatcherError,
    Template,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Gallery manifest (partition|identity|label|hex-payload per line)
    #[arg(short = 'm', long)]
    manifest: String,

    /// Decision threshold
    #[arg(short = 't', long, default_value = "40")]
    threshold: f64,

    /// Log file path
    #[arg(short = 'l', long = "log-file")]
    log_file: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search a gallery partition for the probe
    Identify {
        /// Gallery partition key
        #[arg(short = 'p', long)]
        partition: String,

        /// Probe template as hex
        #[arg(long)]
        probe: String,

        /// Number of worker threads
        #[arg(short = 'w', long = "workers", default_value = "4")]
        workers: usize,

        /// Take the k-th best sample of each identity (1-based)
        #[arg(long = "take")]
        take: Option<usize>,

        /// Expected samples per identity, used with --take
        #[arg(long = "of", default_value = "1")]
        of: usize,

        /// Give up after this many milliseconds
        #[arg(long = "timeout-ms")]
        timeout_ms: Option<u64>,
    },
    /// Compare two templates
    Verify {
        /// Probe template as hex
        #[arg(long)]
        probe: String,

        /// Candidate template as hex
        #[arg(long)]
        candidate: String,
    },
}

/// Byte-overlap matcher, enough to exercise the engine from the command line.
struct OverlapMatcher;

impl Matcher for OverlapMatcher {
    fn score(&self, probe: &Template, candidate: &Template) -> Result<f64, MatcherError> {
        let same = probe
            .payload()
            .iter()
            .zip(candidate.payload())
            .filter(|(a, b)| a == b)
            .count();
        let len = probe.payload().len().max(candidate.payload().len());
        Ok(100.0 * same as f64 / len as f64)
    }
}

fn initialize_logging(log_file: Option<String>) {
    let console_writer = std::io::stdout.with_max_level(tracing::Level::INFO);

    let file_appender = if let Some(log_file) = log_file {
        RollingFileAppender::new(Rotation::NEVER, ".", log_file)
            .with_max_level(tracing::Level::INFO)
    } else {
        RollingFileAppender::new(Rotation::NEVER, ".", "default.log")
            .with_max_level(tracing::Level::INFO)
    };

    let writer = console_writer.and(file_appender);

    let subscriber = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(writer)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {e}");
        std::process::exit(1);
    }
}

fn parse_template(digits: &str) -> Result<Template, AfisError> {
    let payload =
        hex::decode(digits.trim()).map_err(|e| AfisError::InvalidTemplate(e.to_string()))?;
    Ok(Template::new(payload))
}

fn run(args: Args) -> Result<(), AfisError> {
    let mut config = EngineConfig::default().with_threshold(args.threshold);
    if let Commands::Identify { workers, take, of, timeout_ms, .. } = &args.command {
        config = config.with_workers(*workers);
        if let Some(take) = take {
            config = config.with_fusion(FusionPolicy::new(take.saturating_sub(1), *of));
        }
        if let Some(timeout_ms) = timeout_ms {
            config = config.with_search_timeout(Duration::from_millis(*timeout_ms));
        }
    }

    let source = Arc::new(ManifestSource::from_path(&args.manifest));
    let engine = HuginnAfis::new(Arc::new(OverlapMatcher), source, Some(config))?;
    debug!("Engine ready with manifest {}", args.manifest);

    match &args.command {
        Commands::Identify { partition, probe, .. } => {
            let probe = parse_template(probe)?;
            let decision = engine.identify(&probe, partition)?;
            info!("{}", decision);
            info!("{}", engine.pool_stats());
        }
        Commands::Verify { probe, candidate } => {
            let decision = engine.verify(&parse_template(probe)?, &parse_template(candidate)?)?;
            info!("{}", decision);
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    initialize_logging(args.log_file.clone());

    if let Err(e) = run(args) {
        error!("{e}");
        std::process::exit(1);
    }
}

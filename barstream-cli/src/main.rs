//! barstream CLI: replay recorded bars through a live series.
//!
//! Commands:
//! - `replay`: load bars from CSV, preload history, start the configured
//!   indicators with backfill, feed the remaining bars live and print the
//!   results as JSON
//! - `validate`: parse and validate a TOML config file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use barstream_core::config::{AppConfig, IndicatorConfig};
use barstream_core::data::load_bars_csv;
use barstream_core::domain::{Bar, Interval};
use barstream_core::indicators::{Indicator, IndicatorResult, PriceField, TechIndicator};
use barstream_core::scheduler::{Executor, LiveOutcome, StatsSnapshot};
use barstream_core::series::CircularSeries;

#[derive(Parser)]
#[command(
    name = "barstream",
    about = "barstream: live bar series with incremental indicators"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a CSV of bars through a series and its indicators.
    Replay {
        /// CSV file: begin_ms,end_ms,open,high,low,close,volume,finalized.
        #[arg(long)]
        bars: PathBuf,

        /// TOML config file. Flags below override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Series symbol.
        #[arg(long)]
        symbol: Option<String>,

        /// Bar interval (1m, 5m, 1h, 1d, ...).
        #[arg(long)]
        interval: Option<Interval>,

        /// Series capacity; 0 or less disables the series.
        #[arg(long, allow_hyphen_values = true)]
        capacity: Option<i64>,

        /// Bars loaded before the indicators start. Defaults to all.
        #[arg(long)]
        history: Option<usize>,

        /// Feed the remaining bars in realtime mode.
        #[arg(long, default_value_t = false)]
        realtime: bool,

        /// First position to backfill.
        #[arg(long)]
        backfill_from: Option<usize>,

        /// Add an SMA with this period (repeatable).
        #[arg(long)]
        sma: Vec<usize>,

        /// Add an EMA with this period (repeatable).
        #[arg(long)]
        ema: Vec<usize>,

        /// Write JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Parse and validate a config file.
    Validate {
        /// Path to a TOML config file.
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct ReplayReport {
    symbol: String,
    interval: Option<Interval>,
    bars_loaded: usize,
    history: usize,
    series_len: usize,
    indicators: Vec<IndicatorReport>,
}

#[derive(Serialize)]
struct IndicatorReport {
    name: String,
    outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    stats: StatsSnapshot,
    unstable: Option<Decimal>,
    results: Vec<IndicatorResult<Decimal>>,
}

struct ReplayArgs {
    bars: PathBuf,
    config: Option<PathBuf>,
    symbol: Option<String>,
    interval: Option<Interval>,
    capacity: Option<i64>,
    history: Option<usize>,
    realtime: bool,
    backfill_from: Option<usize>,
    sma: Vec<usize>,
    ema: Vec<usize>,
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("barstream=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            bars,
            config,
            symbol,
            interval,
            capacity,
            history,
            realtime,
            backfill_from,
            sma,
            ema,
            output,
        } => run_replay(ReplayArgs {
            bars,
            config,
            symbol,
            interval,
            capacity,
            history,
            realtime,
            backfill_from,
            sma,
            ema,
            output,
        }),
        Commands::Validate { config } => run_validate(&config),
    }
}

fn run_validate(path: &Path) -> Result<()> {
    let config = AppConfig::from_file(path)
        .with_context(|| format!("invalid config {}", path.display()))?;
    println!(
        "OK: {} indicator(s), max_size {:?}",
        config.indicators.len(),
        config.series.max_size
    );
    Ok(())
}

/// File config (or defaults) with command-line overrides applied.
fn resolve_config(args: &ReplayArgs) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AppConfig::default(),
    };

    if let Some(symbol) = &args.symbol {
        config.series.symbol = Some(symbol.clone());
    }
    if let Some(interval) = args.interval {
        config.series.interval = Some(interval);
    }
    if let Some(capacity) = args.capacity {
        config.series.max_size = Some(capacity);
    }
    if args.backfill_from.is_some() {
        config.scheduler.backfill_from = args.backfill_from;
    }
    config.indicators.extend(args.sma.iter().map(|&period| IndicatorConfig::Sma {
        period,
        field: PriceField::Close,
    }));
    config.indicators.extend(args.ema.iter().map(|&period| IndicatorConfig::Ema {
        period,
        field: PriceField::Close,
    }));

    config.validate().context("invalid configuration")?;
    if config.indicators.is_empty() {
        bail!("no indicators configured: pass --sma/--ema or a config with [[indicators]]");
    }
    Ok(config)
}

fn run_replay(args: ReplayArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    let bars: Vec<Bar> = load_bars_csv(&args.bars)
        .with_context(|| format!("failed to load bars from {}", args.bars.display()))?;
    let history = args.history.unwrap_or(bars.len()).min(bars.len());
    info!(path = %args.bars.display(), bars = bars.len(), history, "bars loaded");

    let series: Arc<CircularSeries<Bar>> = Arc::new(CircularSeries::new(config.series.clone()));
    series
        .add_or_update(false, bars[..history].iter().cloned())
        .context("failed to preload history")?;

    let executor = Executor::new(config.scheduler.clone());
    let mut running = Vec::with_capacity(config.indicators.len());
    for indicator_config in &config.indicators {
        let indicator = Arc::new(TechIndicator::from_config(
            indicator_config,
            Arc::clone(&series),
        ));
        let live = executor
            .start_configured(Arc::clone(&indicator))
            .with_context(|| format!("failed to start {}", indicator.name()))?;
        running.push((indicator, live));
    }

    series
        .add_or_update(args.realtime, bars[history..].iter().cloned())
        .context("failed to feed live bars")?;
    series.close();

    let mut indicators = Vec::with_capacity(running.len());
    for (indicator, live) in running {
        let counters = live.counters();
        let outcome = live.join();
        let stats = counters.snapshot();
        let (outcome, error) = match outcome {
            LiveOutcome::Closed => ("closed".to_string(), None),
            LiveOutcome::Failed(err) => {
                warn!(indicator = indicator.name(), error = %err, "indicator failed");
                ("failed".to_string(), Some(err.to_string()))
            }
        };
        info!(
            indicator = indicator.name(),
            finalized = stats.finalized,
            provisional = stats.provisional,
            dropped = stats.provisional_dropped,
            "indicator finished"
        );
        indicators.push(IndicatorReport {
            name: indicator.name().to_string(),
            outcome,
            error,
            stats,
            unstable: indicator.unstable_value(),
            results: indicator.results(),
        });
    }

    let report = ReplayReport {
        symbol: series.symbol().to_string(),
        interval: series.meta().interval,
        bars_loaded: bars.len(),
        history,
        series_len: series.len(),
        indicators,
    };
    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ReplayArgs {
        ReplayArgs {
            bars: PathBuf::from("bars.csv"),
            config: None,
            symbol: None,
            interval: None,
            capacity: None,
            history: None,
            realtime: false,
            backfill_from: None,
            sma: vec![],
            ema: vec![],
            output: None,
        }
    }

    #[test]
    fn flags_override_defaults() {
        let mut a = args();
        a.symbol = Some("BTCUSDT".into());
        a.interval = Some(Interval::H1);
        a.capacity = Some(500);
        a.backfill_from = Some(0);
        a.sma = vec![20];
        a.ema = vec![12, 26];
        let config = resolve_config(&a).unwrap();
        assert_eq!(config.series.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(config.series.interval, Some(Interval::H1));
        assert_eq!(config.series.max_size, Some(500));
        assert_eq!(config.scheduler.backfill_from, Some(0));
        assert_eq!(config.indicators.len(), 3);
    }

    #[test]
    fn demo_config_is_valid() {
        let config = AppConfig::from_toml_str(include_str!("../../demos/replay.toml")).unwrap();
        assert_eq!(config.series.interval, Some(Interval::M1));
        assert_eq!(config.indicators.len(), 2);
        assert_eq!(config.scheduler.backfill_from, Some(0));
    }

    #[test]
    fn no_indicators_is_an_error() {
        assert!(resolve_config(&args()).is_err());
    }

    #[test]
    fn cli_parses_replay() {
        let cli = Cli::try_parse_from([
            "barstream",
            "replay",
            "--bars",
            "b.csv",
            "--interval",
            "5m",
            "--capacity",
            "-1",
            "--sma",
            "3",
            "--sma",
            "5",
            "--realtime",
        ])
        .unwrap();
        match cli.command {
            Commands::Replay {
                interval,
                capacity,
                sma,
                realtime,
                ..
            } => {
                assert_eq!(interval, Some(Interval::M5));
                assert_eq!(capacity, Some(-1));
                assert_eq!(sma, vec![3, 5]);
                assert!(realtime);
            }
            Commands::Validate { .. } => panic!("expected replay"),
        }
    }
}

use anyhow::{Context, Result};
use backtester::{BacktestReport, Backtester, HistoricalData};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use configuration::{AnalyseMode, Config, load_config, load_optimizer_config};
use core_types::{CandleInterval, Instrument};
use database::CandleStore;
use optimizer::{Optimizer, RankedReport, generate_configs, write_json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Calendar days loaded ahead of the first replayed day per trading day of
/// corridor history, plus a week for weekends and holidays.
fn lookback_days(trading_days: u32) -> u32 {
    trading_days * 2 + 7
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be set.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _guard = init_tracing(&cli.log_dir)?;

    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let store = CandleStore::open(&config.storage.path)
        .await
        .with_context(|| format!("Failed to open the candle store at {}", config.storage.path))?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling.");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        Commands::Backtest(args) => handle_backtest(args, &config, &store, cancel).await,
        Commands::Optimize(args) => handle_optimize(args, &config, &store, cancel).await,
        Commands::Candles(args) => handle_candles(args, &store).await,
    }
}

/// Logs to stdout and to a daily rolling file. `RUST_LOG` overrides the
/// default `info` level.
fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    let appender = tracing_appender::rolling::daily(log_dir, "investbot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .context("Failed to install the tracing subscriber")?;
    Ok(guard)
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Strategy runtime tools: historical replays and parameter sweeps over the
/// local candle store.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, short, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Directory for the rolling log files.
    #[arg(long, default_value = "logs", global = true)]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the `[backtest]` configuration over a date range.
    Backtest(BacktestArgs),
    /// Sweep a parameter grid and rank the configurations.
    Optimize(OptimizeArgs),
    /// Print the stored candles of one instrument.
    Candles(CandlesArgs),
}

#[derive(Parser)]
struct BacktestArgs {
    /// First replayed day (format: YYYY-MM-DD). Defaults to `backtest.start_date`.
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Day after the last replayed one. Defaults to `backtest.end_date`.
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Overrides the corridor analysis mode.
    #[arg(long, value_enum)]
    analyse: Option<AnalyseMode>,

    /// Also write the full report as JSON.
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Parser)]
struct OptimizeArgs {
    /// The parameter grid definition.
    #[arg(long, default_value = "optimizer.toml")]
    grid: PathBuf,

    /// Worker threads. Defaults to the number of CPUs.
    #[arg(long)]
    threads: Option<usize>,

    /// Rows of the ranking shown. Defaults to `report.top`.
    #[arg(long)]
    top: Option<usize>,

    /// Where to write the full ranking as JSON. Defaults to `report.json_path`.
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Parser)]
struct CandlesArgs {
    /// Instrument UID.
    #[arg(long)]
    instrument: String,

    /// Candle interval key (1m, 5m, 15m, 1h, 1d).
    #[arg(long, default_value = "1m")]
    interval: CandleInterval,

    /// First day (format: YYYY-MM-DD).
    #[arg(long)]
    from: NaiveDate,

    /// Day after the last one.
    #[arg(long)]
    to: NaiveDate,
}

// ==============================================================================
// Command Logic
// ==============================================================================

fn backtest_instruments(config: &Config) -> Result<(&configuration::BacktestSettings, Vec<Instrument>)> {
    let settings = config
        .backtest
        .as_ref()
        .context("The configuration has no [backtest] section")?;
    let instruments = settings
        .instruments
        .iter()
        .map(|spec| spec.to_instrument())
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid instrument in [backtest]")?;
    Ok((settings, instruments))
}

async fn handle_backtest(
    args: BacktestArgs,
    config: &Config,
    store: &CandleStore,
    cancel: CancellationToken,
) -> Result<()> {
    let (settings, instruments) = backtest_instruments(config)?;
    let start = args.start.unwrap_or(settings.start_date);
    let end = args.end.unwrap_or(settings.end_date);
    let mut corridor = settings.corridor.clone();
    if let Some(analyse) = args.analyse {
        corridor.analyse = analyse;
    }

    let lookback = lookback_days(corridor.days_to_calculate_interval);
    let data = HistoricalData::load(store, instruments, start, end, lookback)
        .await
        .context("Failed to load historical candles")?;
    let backtester = Backtester::new(Arc::new(data), config.executor.clone(), settings.top_instruments_quantity)
        .with_progress(true);

    let report = tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("Backtest cancelled"),
        report = backtester.run(&corridor, start, end) => report.context("Backtest failed")?,
    };

    println!("{}", days_table(&report));
    println!(
        "Total profit: {}  Total percent: {}%  Trading days: {}  Average day: {}%",
        report.total_profit.round_dp(2),
        report.total_percent.round_dp(4),
        report.trading_days,
        report.average_day_percent.round_dp(4),
    );

    if let Some(path) = args.json {
        let file = std::fs::File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &report).context("Failed to write the report")?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

async fn handle_optimize(
    args: OptimizeArgs,
    config: &Config,
    store: &CandleStore,
    cancel: CancellationToken,
) -> Result<()> {
    let (settings, instruments) = backtest_instruments(config)?;
    let optimizer_config = load_optimizer_config(&args.grid)
        .with_context(|| format!("Failed to load the grid from {}", args.grid.display()))?;
    let configs = generate_configs(&optimizer_config.grid)?;
    println!("Sweeping {} configurations from {} to {}.", configs.len(), settings.start_date, settings.end_date);

    let lookback = lookback_days(optimizer_config.grid.days_max);
    let data = HistoricalData::load(store, instruments, settings.start_date, settings.end_date, lookback)
        .await
        .context("Failed to load historical candles")?;

    let mut optimizer = Optimizer::new(
        Arc::new(data),
        config.executor.clone(),
        settings.top_instruments_quantity,
        settings.start_date,
        settings.end_date,
    )
    .with_progress(true);
    if let Some(threads) = args.threads {
        optimizer = optimizer.with_threads(threads);
    }

    let ranked = optimizer.run(configs, cancel).await?;

    let top = args.top.unwrap_or(optimizer_config.report.top);
    println!("{}", ranking_table(&ranked, top));

    let json_path = args.json.or(optimizer_config.report.json_path.map(PathBuf::from));
    if let Some(path) = json_path {
        write_json(&path, &ranked)?;
        println!("Ranking written to {}", path.display());
    }
    Ok(())
}

async fn handle_candles(args: CandlesArgs, store: &CandleStore) -> Result<()> {
    let from = args.from.and_time(chrono::NaiveTime::MIN).and_utc();
    let to = args.to.and_time(chrono::NaiveTime::MIN).and_utc();
    let (candles, corruption) = store.load_consistent(&args.instrument, args.interval, from, to).await?;
    let watermark = store.watermark(&args.instrument, args.interval).await?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Time", "Open", "High", "Low", "Close", "Volume"]);
    for candle in &candles {
        table.add_row(vec![
            Cell::new(candle.time.format("%Y-%m-%d %H:%M")),
            Cell::new(candle.open).set_alignment(CellAlignment::Right),
            Cell::new(candle.high).set_alignment(CellAlignment::Right),
            Cell::new(candle.low).set_alignment(CellAlignment::Right),
            Cell::new(candle.close).set_alignment(CellAlignment::Right),
            Cell::new(candle.volume).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{table}");
    match watermark {
        Some(watermark) => println!("{} candles, last update {}", candles.len(), watermark),
        None => println!("{} candles, never updated", candles.len()),
    }
    if let Some(e) = corruption {
        println!("Stopped at a corrupt row: {e}");
    }
    Ok(())
}

fn days_table(report: &BacktestReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Date", "Selected", "Trades", "Profit", "Percent"]);
    for day in &report.days {
        table.add_row(vec![
            Cell::new(day.date),
            Cell::new(day.selected.join(", ")),
            Cell::new(day.trades).set_alignment(CellAlignment::Right),
            Cell::new(day.profit.round_dp(2)).set_alignment(CellAlignment::Right),
            Cell::new(day.percent.round_dp(4)).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

/// The `top` best rows of an ascending ranking, best last.
fn ranking_table(ranked: &[RankedReport], top: usize) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Rank", "Analyse", "Low/High %", "Min profit %", "Stop %", "Days", "Trading days",
            "Avg day %", "Total profit",
        ]);
    for row in &ranked[ranked.len().saturating_sub(top)..] {
        let config = &row.report.config;
        let percentiles = match config.analyse {
            AnalyseMode::MathStat => format!("{}/{}", config.low_percentile, config.high_percentile),
            AnalyseMode::BestWidth => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(row.rank),
            Cell::new(format!("{:?}", config.analyse)),
            Cell::new(percentiles),
            Cell::new(config.min_profit_pct),
            Cell::new(config.stop_loss_pct),
            Cell::new(config.days_to_calculate_interval),
            Cell::new(row.report.trading_days).set_alignment(CellAlignment::Right),
            Cell::new(row.report.average_day_percent.round_dp(4)).set_alignment(CellAlignment::Right),
            Cell::new(row.report.total_profit.round_dp(2)).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

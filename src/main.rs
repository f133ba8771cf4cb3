use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spotbot::api::{
    BinanceClient, Exchange, LogNotifier, LunarCrushClient, MarketDataProvider, Notifier, PaperExchange,
    TelegramNotifier,
};
use spotbot::backfill::{fetch_history, read_dataset, with_references, write_dataset};
use spotbot::backtest::{score_feature_rows, write_reports, BacktestConfig, BacktestRunner};
use spotbot::config::Settings;
use spotbot::discovery::check_symbol;
use spotbot::execution::{current_prices, liquidate_all, run_scheduled, DailyLoop, PortfolioView};
use spotbot::features::FeatureBuilder;
use spotbot::inference::ModelAdapter;
use spotbot::state::StateStore;
use spotbot::{BotError, QUOTE_ASSET};

#[derive(Parser)]
#[command(name = "spotbot", about = "Daily ML-driven spot trading bot", version)]
struct Cli {
    /// Configuration file (JSON or TOML)
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Debug-level logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Trace-level logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily loop on schedule until Ctrl+C
    Run,
    /// Run one daily cycle now
    Update,
    /// List the tradable universe after filtering
    Tokens,
    /// Show cash, holdings and mark-to-market equity
    Portfolio,
    /// Market-sell every non-quote asset and clear all positions
    Liquidate {
        /// Confirm the liquidation
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Download history and write the labelled feature matrix
    Dataset {
        /// Output CSV path
        #[arg(long, default_value = "data/features.csv")]
        out: PathBuf,

        /// Days of history; defaults to execution.lookback_days
        #[arg(long)]
        days: Option<u32>,
    },
    /// Score a feature CSV and replay the threshold grid
    Backtest {
        /// Feature matrix written by `dataset`
        #[arg(long, default_value = "data/features.csv")]
        features: PathBuf,

        /// Report directory; defaults to backtest.output_dir
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match Settings::load(&cli.config) {
        Ok(s) => s,
        Err(e) => {
            setup_logging(cli.verbose, cli.debug, None);
            tracing::error!("❌ {}", e);
            return ExitCode::from(2);
        }
    };
    setup_logging(cli.verbose, cli.debug, settings.logging.file.as_deref());

    match run(cli.command, &settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("❌ {:#}", e);
            match e.downcast_ref::<BotError>() {
                Some(BotError::ConfigMissing(_)) | Some(BotError::ConfigInvalid(_)) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn setup_logging(verbose: bool, debug: bool, file: Option<&Path>) {
    let filter = match (debug, verbose) {
        (true, _) => EnvFilter::new("spotbot=trace"),
        (false, true) => EnvFilter::new("spotbot=debug"),
        _ => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spotbot=info")),
    };

    let file_layer = file.and_then(|path| {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).ok()?;
        }
        let handle = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()?;
        Some(fmt::layer().with_ansi(false).with_writer(std::sync::Mutex::new(handle)))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .with(filter)
        .try_init()
        .ok();
}

async fn run(command: Commands, settings: &Settings) -> anyhow::Result<()> {
    let store = StateStore::new(&settings.execution.state_file, settings.capital.initial);
    let scheduled = matches!(command, Commands::Run);

    match command {
        Commands::Run | Commands::Update => {
            let model = ModelAdapter::load(&settings.ml.model_path)?;
            let provider = LunarCrushClient::new(&settings.lunarcrush, settings.execution.timeout_secs)?;
            let exchange = build_exchange(settings, &store, &provider).await?;
            let notifier = build_notifier(settings)?;
            let daily = DailyLoop::new(
                settings,
                exchange.as_ref(),
                &provider,
                &model,
                notifier.as_ref(),
                &store,
            );

            if scheduled {
                tracing::info!(
                    "🚀 spotbot starting: {} symbols, run hour {:02}:00 UTC{}",
                    settings.universe().len(),
                    settings.execution.run_hour_utc,
                    if settings.execution.paper { " (paper)" } else { "" }
                );
                run_scheduled(&daily, settings.execution.run_hour_utc).await?;
            } else {
                let now = Utc::now();
                let report = daily.run_cycle(now.date_naive(), now).await?;
                println!("{}", report.summary());
            }
        }

        Commands::Tokens => {
            let mut symbols: Vec<String> = settings
                .tokens_daily
                .iter()
                .chain(settings.extended_tokens_daily.iter())
                .map(|s| s.trim().to_uppercase())
                .collect();
            symbols.sort();
            symbols.dedup();

            println!("\n📋 Universe ({} configured)", symbols.len());
            println!("{}", "─".repeat(50));
            for symbol in &symbols {
                let (tradable, reason) = check_symbol(symbol);
                let mark = if tradable { "✅" } else { "⛔" };
                println!("{} {:<12} {}", mark, symbol, reason);
            }
            println!("\n{} tradable", settings.universe().len());
        }

        Commands::Portfolio => {
            let state = store.load()?;
            let prices = if settings.binance_api.api_key.is_empty() && !settings.execution.paper {
                // Offline: last known basis
                state
                    .positions
                    .iter()
                    .map(|(asset, p)| (asset.clone(), p.entry_px))
                    .collect()
            } else {
                let exchange = BinanceClient::new(
                    &settings.binance_api,
                    settings.execution.retry_count,
                    settings.execution.timeout_secs,
                )?;
                current_prices(&exchange, &state).await
            };
            PortfolioView::from_state(&state, &prices).print_report();
        }

        Commands::Liquidate { yes } => {
            if !yes {
                bail!("liquidation sells every holding; re-run with --yes to confirm");
            }
            if settings.execution.paper {
                bail!("liquidate is only meaningful against the live exchange");
            }
            let exchange = BinanceClient::new(
                &settings.binance_api,
                settings.execution.retry_count,
                settings.execution.timeout_secs,
            )?;
            tracing::warn!("🚨 Liquidating all holdings");

            let fills = liquidate_all(
                &exchange,
                &store,
                settings.execution.dust_notional,
                Utc::now().date_naive(),
            )
            .await?;
            for fill in &fills {
                println!(
                    "SOLD {} {:.6} @ {:.6} = {:.2} {}",
                    fill.asset, fill.qty, fill.avg_price, fill.quote_qty, QUOTE_ASSET
                );
            }
            let notifier = build_notifier(settings)?;
            if let Err(e) = notifier
                .notify(&format!("🚨 Liquidated {} holdings", fills.len()))
                .await
            {
                tracing::warn!("Notification failed: {}", e);
            }
        }

        Commands::Dataset { out, days } => {
            let provider = LunarCrushClient::new(&settings.lunarcrush, settings.execution.timeout_secs)?;
            let end = Utc::now().date_naive();
            let start = end - Duration::days(i64::from(days.unwrap_or(settings.execution.lookback_days)));
            let universe = settings.universe();

            let history = fetch_history(&provider, &with_references(&universe), start, end).await;
            for (symbol, e) in &history.skipped {
                tracing::warn!("⏭️  {} skipped: {}", symbol, e);
            }

            let builder = FeatureBuilder::new(history.bars_for("BTC"), history.bars_for("ETH"));
            let frames: BTreeMap<String, Vec<_>> = universe
                .iter()
                .map(|symbol| (symbol.clone(), history.bars_for(symbol).to_vec()))
                .filter(|(_, bars)| !bars.is_empty())
                .collect();
            let rows = builder.build(&frames);

            write_dataset(&out, &rows).with_context(|| format!("writing {}", out.display()))?;
            println!("✅ {} feature rows for {} symbols → {}", rows.len(), frames.len(), out.display());
        }

        Commands::Backtest { features, out } => {
            let rows = read_dataset(&features).with_context(|| format!("reading {}", features.display()))?;
            let model = ModelAdapter::load(&settings.ml.model_path)?;
            let scored = score_feature_rows(&model, &rows)?;

            let config = BacktestConfig {
                initial_capital: settings.capital.initial,
                params: settings.risk_params(),
                top_k: settings.ml.top_k,
                max_positions: settings.risk.max_positions,
                min_buy_notional: settings.execution.min_buy_notional,
                dust_notional: settings.execution.dust_notional,
                fee_rate: settings.backtest.fee_rate,
            };
            let results = BacktestRunner::new(config).run_grid(
                &scored,
                &settings.backtest.buy_thresholds,
                &settings.backtest.sell_thresholds,
            )?;
            for result in &results {
                result.metrics.print_report();
            }

            let dir = out.unwrap_or_else(|| settings.backtest.output_dir.clone());
            write_reports(&dir, &results)?;
            println!("✅ Reports written to {}", dir.display());
        }
    }

    Ok(())
}

// ============================================================================
// Collaborators
// ============================================================================

async fn build_exchange(
    settings: &Settings,
    store: &StateStore,
    provider: &dyn MarketDataProvider,
) -> anyhow::Result<Box<dyn Exchange>> {
    if !settings.execution.paper {
        if settings.binance_api.api_key.is_empty() || settings.binance_api.api_secret.is_empty() {
            return Err(BotError::ConfigInvalid("binance_api.api_key and api_secret are required".to_string()).into());
        }
        let client = BinanceClient::new(
            &settings.binance_api,
            settings.execution.retry_count,
            settings.execution.timeout_secs,
        )?;
        return Ok(Box::new(client));
    }

    // Paper book mirrors the persisted state, priced at the latest closes
    let paper = PaperExchange::new(settings.backtest.fee_rate);
    let state = store.load()?;
    paper.deposit(QUOTE_ASSET, state.capital).await;
    for (asset, position) in &state.positions {
        paper.deposit(asset, position.qty).await;
    }

    let end = Utc::now().date_naive();
    let mut symbols = settings.universe();
    symbols.extend(state.positions.keys().cloned());
    symbols.sort();
    symbols.dedup();
    let history = fetch_history(provider, &symbols, end - Duration::days(7), end).await;
    for symbol in &symbols {
        if let Some(close) = history.bars_for(symbol).iter().rev().find_map(|b| b.close) {
            paper.set_price(symbol, close).await;
        }
    }

    tracing::info!("📝 Paper exchange seeded with {:.2} {}", state.capital, QUOTE_ASSET);
    Ok(Box::new(paper))
}

fn build_notifier(settings: &Settings) -> anyhow::Result<Box<dyn Notifier>> {
    match &settings.telegrams {
        Some(telegram) => Ok(Box::new(TelegramNotifier::new(
            telegram,
            settings.execution.timeout_secs,
        )?)),
        None => Ok(Box::new(LogNotifier)),
    }
}

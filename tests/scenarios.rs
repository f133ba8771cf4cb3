use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use spotbot::api::{Exchange, LogNotifier, LunarCrushClient, MarketDataProvider, PaperExchange};
use spotbot::backtest::{
    momentum_model, score_feature_rows, write_closed_trades, BacktestConfig, BacktestRunner, MarketScenario,
    ScoredRow, SyntheticDataGenerator,
};
use spotbot::config::{LunarCrushSection, Settings};
use spotbot::execution::DailyLoop;
use spotbot::features::{FeatureBuilder, FEATURE_COLUMNS, FEATURE_COUNT};
use spotbot::inference::ModelAdapter;
use spotbot::state::{StateDocument, StateStore};
use spotbot::{BotError, DailyBar, Position, PositionMeta, TradeReason, QUOTE_ASSET};

// ============================================================================
// Fixtures
// ============================================================================

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
}

fn scored(d: u32, symbol: &str, close: f64, probability: f64) -> ScoredRow {
    ScoredRow {
        date: day(d),
        symbol: symbol.to_string(),
        close,
        probability,
    }
}

fn runner() -> BacktestRunner {
    BacktestRunner::new(BacktestConfig {
        initial_capital: 1000.0,
        top_k: 5,
        max_positions: 5,
        ..BacktestConfig::default()
    })
}

fn settings(symbols: &[&str], state_file: &std::path::Path) -> Settings {
    serde_json::from_value(json!({
        "tokens_daily": symbols,
        "capital": { "initial": 1000.0 },
        "execution": {
            "state_file": state_file,
            "lookback_days": 120,
            "max_feature_age_days": 2
        }
    }))
    .unwrap()
}

/// Logistic artifact that ignores its inputs and always scores `p`
fn constant_model(p: f64) -> ModelAdapter {
    let artifact = json!({
        "feature_names": FEATURE_COLUMNS.to_vec(),
        "model": {
            "kind": "logistic",
            "coefficients": vec![0.0; FEATURE_COUNT],
            "intercept": (p / (1.0 - p)).ln()
        }
    });
    ModelAdapter::from_json(&artifact.to_string()).unwrap()
}

struct EmptyProvider;

#[async_trait]
impl MarketDataProvider for EmptyProvider {
    async fn daily_bars(&self, _: &str, _: NaiveDate, _: NaiveDate) -> spotbot::Result<Vec<DailyBar>> {
        Ok(Vec::new())
    }
}

fn time_series_body(bars: &[DailyBar]) -> String {
    let data: Vec<serde_json::Value> = bars
        .iter()
        .map(|b| {
            json!({
                "time": b.date.and_time(NaiveTime::MIN).and_utc().timestamp(),
                "open": b.open,
                "close": b.close,
                "high": b.high,
                "low": b.low,
                "volume_24h": b.volume,
                "market_cap": b.market_cap,
                "galaxy_score": b.galaxy_score,
                "alt_rank": b.alt_rank,
                "sentiment": b.sentiment,
                "social_dominance": b.social_dominance,
                "market_dominance": b.market_dominance
            })
        })
        .collect();
    json!({ "data": data }).to_string()
}

// ============================================================================
// Scenario 1: pure stop-loss
// ============================================================================

#[test]
fn test_stop_loss_replay() {
    let rows = vec![scored(1, "X", 100.0, 0.9), scored(2, "X", 74.0, 0.5)];
    let result = runner().run(&rows, 0.7, 0.25).unwrap();

    assert_eq!(result.closed_trades.len(), 1);
    let trade = &result.closed_trades[0];
    assert_eq!(trade.reason, TradeReason::StopLoss);
    assert_eq!(trade.qty, 10.0);
    assert!((trade.pnl() + 260.0).abs() < 1e-9);
    assert!((result.final_state.capital - 740.0).abs() < 1e-9);
    assert_eq!(result.final_state.counters.losses_count, 1);
}

#[tokio::test]
async fn test_stop_loss_live_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let settings = settings(&["X"], &path);
    let store = StateStore::new(&path, 1000.0);

    let mut doc = StateDocument::fresh(1000.0);
    doc.capital = 0.0;
    doc.positions
        .insert("X".to_string(), Position { qty: 10.0, entry_px: 100.0 });
    doc.positions_meta
        .insert("X".to_string(), PositionMeta::new(100.0, day(1)));
    store.save(&doc).unwrap();

    let exchange = PaperExchange::new(0.0);
    exchange.deposit("X", 10.0).await;
    exchange.set_price("X", 74.0).await;

    let model = constant_model(0.5);
    let daily = DailyLoop::new(&settings, &exchange, &EmptyProvider, &model, &LogNotifier, &store);
    let now = Utc.with_ymd_and_hms(2024, 6, 2, 1, 0, 0).unwrap();
    let report = daily.run_cycle(day(2), now).await.unwrap();

    assert_eq!(report.trades.len(), 1);
    assert_eq!(report.trades[0].reason, TradeReason::StopLoss);
    assert!(report.buys.is_empty());

    let saved = store.load().unwrap();
    assert!(saved.positions.is_empty());
    assert!(saved.positions_meta.is_empty());
    assert!((saved.capital - 740.0).abs() < 1e-9);
    assert_eq!(saved.counters.losses_count, 1);
    assert_eq!(saved.last_run, Some(day(2)));

    let balances = exchange.balances().await.unwrap();
    assert!((balances[QUOTE_ASSET] - 740.0).abs() < 1e-9);
}

// ============================================================================
// Scenario 2: partial then trailing
// ============================================================================

#[test]
fn test_partial_then_trailing() {
    let rows = vec![
        scored(1, "Y", 100.0, 0.9),
        scored(2, "Y", 145.0, 0.5),
        scored(3, "Y", 200.0, 0.5),
        scored(4, "Y", 149.0, 0.5),
    ];
    let result = runner().run(&rows, 0.7, 0.25).unwrap();

    let reasons: Vec<TradeReason> = result.closed_trades.iter().map(|t| t.reason).collect();
    assert_eq!(reasons, vec![TradeReason::PartialSell, TradeReason::TrailingStop]);

    let partial = &result.closed_trades[0];
    assert!((partial.qty - 4.0).abs() < 1e-9);
    assert_eq!(partial.exit_date, day(2));

    let trailing = &result.closed_trades[1];
    assert!((trailing.qty - 6.0).abs() < 1e-9);
    assert_eq!(trailing.sell_price, 149.0);

    // Cash after day 2 is 580; the trailing exit adds 6 * 149
    assert!((result.equity_curve[1].cash - 580.0).abs() < 1e-9);
    assert!((result.final_state.capital - 1474.0).abs() < 1e-9);
}

// ============================================================================
// Scenario 3: big-gain skip
// ============================================================================

#[test]
fn test_big_gain_skip_then_model_sell() {
    let rows = vec![
        scored(1, "Z", 100.0, 0.9),
        scored(2, "Z", 210.0, 0.10),
        scored(3, "Z", 205.0, 0.10),
    ];
    let result = runner().run(&rows, 0.7, 0.25).unwrap();

    let exits: Vec<(NaiveDate, TradeReason)> = result
        .closed_trades
        .iter()
        .map(|t| (t.exit_date, t.reason))
        .collect();
    assert_eq!(
        exits,
        vec![(day(2), TradeReason::PartialSell), (day(3), TradeReason::SellLogic)]
    );
    assert!(result.final_state.positions.is_empty());
}

// ============================================================================
// Scenario 4: equal-weight allocation
// ============================================================================

#[test]
fn test_equal_weight_allocation() {
    let rows = vec![
        scored(1, "A", 10.0, 0.95),
        scored(1, "B", 20.0, 0.82),
        scored(1, "C", 50.0, 0.71),
        scored(1, "D", 5.0, 0.65),
        scored(2, "A", 10.0, 0.5),
        scored(2, "B", 20.0, 0.5),
        scored(2, "C", 50.0, 0.5),
        scored(2, "D", 5.0, 0.5),
    ];
    let result = runner().run(&rows, 0.70, 0.25).unwrap();

    let mut bought: Vec<&str> = result.buy_signals.iter().map(|s| s.asset.as_str()).collect();
    bought.sort();
    assert_eq!(bought, vec!["A", "B", "C"]);

    for trade in &result.closed_trades {
        assert!((trade.qty * trade.buy_price - 1000.0 / 3.0).abs() < 1e-6);
    }
    assert_eq!(result.equity_curve[0].open_positions, 3);
    assert!(result.equity_curve[0].cash.abs() < 1e-9);
}

// ============================================================================
// Scenario 5: provider outage
// ============================================================================

#[tokio::test]
async fn test_provider_outage_skips_symbol() {
    let mut server = mockito::Server::new_async().await;
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let days = 130;
    let today = start + Duration::days(days as i64 - 1);

    let mut generator = SyntheticDataGenerator::new(5);
    let mut mocks = Vec::new();
    let mut last_close = BTreeMap::new();
    for (symbol, scenario) in [
        ("BTC", MarketScenario::Sideways),
        ("ETH", MarketScenario::Sideways),
        ("AAA", MarketScenario::Volatile),
        ("BBB", MarketScenario::Uptrend),
    ] {
        let bars = generator.generate(scenario, start, days);
        last_close.insert(symbol, bars.last().and_then(|b| b.close).unwrap());
        mocks.push(
            server
                .mock("GET", format!("/public/coins/{}/time-series/v2", symbol).as_str())
                .match_query(mockito::Matcher::Any)
                .with_status(200)
                .with_body(time_series_body(&bars))
                .create_async()
                .await,
        );
    }
    let outage = server
        .mock("GET", "/public/coins/SSS/time-series/v2")
        .match_query(mockito::Matcher::Any)
        .with_status(429)
        .expect(3)
        .create_async()
        .await;

    let provider = LunarCrushClient::new(
        &LunarCrushSection {
            api_key: "k".to_string(),
            base_url: server.url(),
            requests_per_minute: 600,
            backoff_secs: 0,
        },
        5,
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let settings = settings(&["AAA", "BBB", "SSS"], &path);
    let store = StateStore::new(&path, 1000.0);

    let exchange = PaperExchange::new(0.0);
    exchange.deposit(QUOTE_ASSET, 1000.0).await;
    exchange.set_price("AAA", last_close["AAA"]).await;
    exchange.set_price("BBB", last_close["BBB"]).await;

    let model = constant_model(0.9);
    let daily = DailyLoop::new(&settings, &exchange, &provider, &model, &LogNotifier, &store);
    let now = today.and_hms_opt(1, 0, 0).unwrap().and_utc();
    let report = tokio_test::assert_ok!(daily.run_cycle(today, now).await);

    outage.assert_async().await;
    assert!(report.skipped.iter().any(|(symbol, _)| symbol == "SSS"));

    let mut bought: Vec<&str> = report.buys.iter().map(|f| f.asset.as_str()).collect();
    bought.sort();
    assert_eq!(bought, vec!["AAA", "BBB"]);

    let saved = store.load().unwrap();
    assert_eq!(saved.last_run, Some(today));
    assert_eq!(saved.positions.len(), 2);
    assert!(!saved.is_held("SSS"));
    assert!(saved.capital.abs() < 1e-6);
}

// ============================================================================
// Scenario 6: replay equivalence
// ============================================================================

#[test]
fn test_backtest_replay_equivalence() {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut generator = SyntheticDataGenerator::new(99);
    let btc = generator.generate(MarketScenario::Sideways, start, 150);
    let eth = generator.generate(MarketScenario::Sideways, start, 150);
    let frames = generator.universe(
        &[
            ("AAA", MarketScenario::Volatile),
            ("BBB", MarketScenario::Crash),
            ("CCC", MarketScenario::Uptrend),
        ],
        start,
        150,
    );

    let rows = FeatureBuilder::new(&btc, &eth).build(&frames);
    let scored = score_feature_rows(&momentum_model().unwrap(), &rows).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let first = runner().run(&scored, 0.6, 0.3).unwrap();
    let second = runner().run(&scored, 0.6, 0.3).unwrap();
    write_closed_trades(&dir.path().join("first.csv"), &first.closed_trades).unwrap();
    write_closed_trades(&dir.path().join("second.csv"), &second.closed_trades).unwrap();

    assert_eq!(
        std::fs::read(dir.path().join("first.csv")).unwrap(),
        std::fs::read(dir.path().join("second.csv")).unwrap()
    );
    assert_eq!(first.equity_curve, second.equity_curve);
}

// ============================================================================
// Live cycle edge paths
// ============================================================================

fn holding(store: &StateStore, asset: &str, qty: f64, entry_px: f64) {
    let mut doc = StateDocument::fresh(0.0);
    doc.positions.insert(asset.to_string(), Position { qty, entry_px });
    doc.positions_meta
        .insert(asset.to_string(), PositionMeta::new(entry_px, day(1)));
    store.save(&doc).unwrap();
}

#[tokio::test]
async fn test_stop_loss_with_lot_remainder_closes_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let settings = settings(&["ETHX"], &path);
    let store = StateStore::new(&path, 1000.0);
    holding(&store, "ETHX", 1.009, 700.0);

    let exchange = PaperExchange::new(0.0);
    exchange.deposit("ETHX", 1.009).await;
    exchange.set_price("ETHX", 500.0).await;
    exchange.set_lot_step("ETHX", Decimal::new(1, 2)).await;

    let model = constant_model(0.5);
    let daily = DailyLoop::new(&settings, &exchange, &EmptyProvider, &model, &LogNotifier, &store);

    let now = Utc.with_ymd_and_hms(2024, 6, 3, 1, 0, 0).unwrap();
    let report = daily.run_cycle(day(3), now).await.unwrap();
    assert_eq!(report.actions, vec![("ETHX".to_string(), "STOP_LOSS")]);
    assert_eq!(report.trades.len(), 1);
    assert!(report.skipped.is_empty());

    let saved = store.load().unwrap();
    assert!(!saved.is_held("ETHX"));
    assert!(saved.positions_meta.is_empty());
    assert!((saved.capital - 500.0).abs() < 1e-9);

    // The unsellable remainder is not taken over again
    let report = daily.run_cycle(day(4), now + Duration::days(1)).await.unwrap();
    assert!(report.actions.is_empty());
    assert!(report.trades.is_empty());
    assert!(report.skipped.is_empty());
    assert!(!store.load().unwrap().is_held("ETHX"));

    let balances = exchange.balances().await.unwrap();
    assert!((balances["ETHX"] - 0.009).abs() < 1e-9);
}

#[tokio::test]
async fn test_unknown_basis_holding_adopted_at_current_price() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let settings = settings(&["QNT"], &path);
    let store = StateStore::new(&path, 1000.0);
    store.save(&StateDocument::fresh(0.0)).unwrap();

    // Deposited by the operator, far below anything it traded at before
    let exchange = PaperExchange::new(0.0);
    exchange.deposit("QNT", 5.0).await;
    exchange.set_price("QNT", 2.0).await;

    let model = constant_model(0.5);
    let daily = DailyLoop::new(&settings, &exchange, &EmptyProvider, &model, &LogNotifier, &store);

    let now = Utc.with_ymd_and_hms(2024, 6, 2, 1, 0, 0).unwrap();
    let report = daily.run_cycle(day(2), now).await.unwrap();
    assert_eq!(report.actions, vec![("QNT".to_string(), "NO_OP")]);
    assert!(report.trades.is_empty());

    let saved = store.load().unwrap();
    assert_eq!(saved.positions["QNT"], Position { qty: 5.0, entry_px: 2.0 });
    let meta = &saved.positions_meta["QNT"];
    assert_eq!(meta.entry_px, 2.0);
    assert_eq!(meta.entry_date, day(2));
    assert!(!meta.partial_sold);

    // The adopted basis is what later exits are measured against
    exchange.set_price("QNT", 1.4).await;
    let report = daily.run_cycle(day(3), now + Duration::days(1)).await.unwrap();
    assert_eq!(report.actions, vec![("QNT".to_string(), "STOP_LOSS")]);
    assert!(!store.load().unwrap().is_held("QNT"));
}

#[tokio::test]
async fn test_invariant_violation_halts_until_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let settings = settings(&["X"], &path);
    let store = StateStore::new(&path, 1000.0);

    // Metadata without a position
    let mut doc = StateDocument::fresh(0.0);
    doc.positions_meta
        .insert("X".to_string(), PositionMeta::new(100.0, day(1)));
    store.save(&doc).unwrap();

    let exchange = PaperExchange::new(0.0);
    let model = constant_model(0.5);
    let daily = DailyLoop::new(&settings, &exchange, &EmptyProvider, &model, &LogNotifier, &store);

    let now = Utc.with_ymd_and_hms(2024, 6, 2, 1, 0, 0).unwrap();
    let err = daily.run_cycle(day(2), now).await.unwrap_err();
    assert!(matches!(err, BotError::InternalInvariant(_)));

    let saved = store.load().unwrap();
    let halt = saved.halt.clone().unwrap();
    assert_eq!(halt.at, now);
    assert!(saved.last_run.is_none());

    // Repaired by the operator, but still inside the cooldown
    let mut repaired = saved;
    repaired.positions_meta.clear();
    store.save(&repaired).unwrap();

    let report = daily.run_cycle(day(2), now + Duration::hours(2)).await.unwrap();
    assert!(report.halted);
    assert!(report.actions.is_empty());
    assert_eq!(store.load().unwrap().halt, Some(halt));

    let report = daily.run_cycle(day(3), now + Duration::hours(25)).await.unwrap();
    assert!(!report.halted);
    let saved = store.load().unwrap();
    assert!(saved.halt.is_none());
    assert_eq!(saved.last_run, Some(day(3)));
}

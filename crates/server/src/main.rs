//! tradelab — strategy backtesting and model metrics
//!
//! Usage:
//!   tradelab serve --port 3001                          — Launch the HTTP API
//!   tradelab backtest --symbol BTCUSDT --strategy sma   — Backtest a built-in strategy
//!   tradelab analyze --model-id m1 --data-file p.json   — Score a price history
//!   tradelab runs                                       — List saved backtest runs

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use engine::{
    audit_trades, closes_f64, default_rules, klines_from_closes, run_backtest, AuditFinding,
    BacktestConfig, BacktestResult, BinanceClient, ExitPolicy, FallbackMarketData,
    FinancialModelingService, JsonFileSource, Kline, KlineRequest, MetricsStore,
    SqliteMetricsStore, StatsMode, StrategyKind,
};
use persistence::repository::BacktestRunRepository;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("TRADELAB_GIT_HASH"));
const DEFAULT_DB_PATH: &str = "data/tradelab.db";

#[derive(Parser)]
#[command(name = "tradelab")]
#[command(about = "Strategy backtesting and financial model metrics", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where bars come from: a local JSON file first (if given), then Binance
#[derive(clap::Args, Clone)]
struct DataArgs {
    /// Trading pair
    #[arg(long, default_value = "BTCUSDT")]
    symbol: String,
    /// Kline interval
    #[arg(long, default_value = "1h")]
    interval: String,
    /// Number of bars
    #[arg(long, default_value_t = 500)]
    limit: u32,
    /// JSON file of klines or close prices, tried before the network
    #[arg(long)]
    data_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Backtest a built-in strategy
    Backtest {
        #[command(flatten)]
        data: DataArgs,
        /// sma_cross, rsi_reversion or volatility_breakout
        #[arg(long, default_value = "sma_cross")]
        strategy: String,
        /// Bars reserved for training
        #[arg(long, default_value_t = 50)]
        warmup: usize,
        #[arg(long, default_value = "10000")]
        capital: Decimal,
        /// Fraction of capital risked per trade
        #[arg(long, default_value = "0.02")]
        risk: Decimal,
        /// long_stop_short_target, take_profit or stop_loss
        #[arg(long, default_value = "long_stop_short_target")]
        exit_policy: String,
        /// Record the run in the database
        #[arg(long)]
        save: bool,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
    /// Compute and record risk metrics for a model's price history
    Analyze {
        /// Identifier the metrics are stored under
        #[arg(long)]
        model_id: String,
        #[command(flatten)]
        data: DataArgs,
        /// Fail on degenerate data instead of reporting NaN
        #[arg(long)]
        strict: bool,
    },
    /// List saved backtest runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Clone)]
struct AppState {
    db: Arc<persistence::Database>,
    market: Arc<FallbackMarketData>,
    metrics_store: Arc<dyn MetricsStore>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,tradelab=debug")
    } else {
        EnvFilter::new("info,engine=info,tradelab=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("TRADELAB_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

async fn open_db() -> anyhow::Result<persistence::Database> {
    let path = db_path();
    let db = persistence::Database::new(&path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", path);
    Ok(db)
}

fn binance_client() -> anyhow::Result<BinanceClient> {
    match std::env::var("TRADELAB_BINANCE_URL") {
        Ok(url) => BinanceClient::with_base_url(&url),
        Err(_) => BinanceClient::new(),
    }
}

fn market_data(data_file: Option<&PathBuf>) -> anyhow::Result<FallbackMarketData> {
    let mut chain = FallbackMarketData::new();
    if let Some(path) = data_file {
        chain = chain.with_source(Box::new(JsonFileSource::new(path)));
    }
    Ok(chain.with_source(Box::new(binance_client()?)))
}

fn parse_exit_policy(s: &str) -> anyhow::Result<ExitPolicy> {
    match s.to_lowercase().as_str() {
        "long_stop_short_target" | "literal" => Ok(ExitPolicy::LongStopShortTarget),
        "take_profit" | "target" => Ok(ExitPolicy::TakeProfit),
        "stop_loss" | "stop" => Ok(ExitPolicy::StopLoss),
        other => anyhow::bail!("Unknown exit policy: {}", other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
        Commands::Backtest {
            data,
            strategy,
            warmup,
            capital,
            risk,
            exit_policy,
            save,
            export,
        } => {
            let config = BacktestConfig {
                initial_capital: capital,
                risk_per_trade: risk,
                warmup,
                exit_policy: parse_exit_policy(&exit_policy)?,
            };
            cmd_backtest(data, &strategy, config, save, export).await?;
        }
        Commands::Analyze {
            model_id,
            data,
            strict,
        } => {
            cmd_analyze(&model_id, data, strict).await?;
        }
        Commands::Runs { limit } => {
            cmd_runs(limit).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command — Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("tradelab v{} starting...", APP_VERSION);

    let db = open_db().await?;
    let metrics_store: Arc<dyn MetricsStore> = Arc::new(SqliteMetricsStore::new(db.pool_clone()));

    let state = AppState {
        db: Arc::new(db),
        market: Arc::new(market_data(None)?),
        metrics_store,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/analyze", post(api_analyze))
        .route("/models/:model_id/metrics", get(api_model_metrics))
        .route("/backtest", post(api_backtest))
        .route("/runs", get(api_runs))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== tradelab v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health                  - Health check");
    println!("  POST /api/analyze                 - Score a price history");
    println!("  GET  /api/models/:id/metrics      - Stored metrics for a model");
    println!("  POST /api/backtest                - Run a backtest");
    println!("  GET  /api/runs                    - Saved backtest runs");
    println!("\n  Database: {}", db_path());
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tradelab",
        "version": APP_VERSION,
    }))
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    model_id: String,
    prices: Vec<f64>,
    #[serde(default)]
    strict: bool,
}

/// POST /api/analyze — compute, record and score a model's metrics
async fn api_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Json<serde_json::Value> {
    let mode = if request.strict {
        StatsMode::Strict
    } else {
        StatsMode::Lenient
    };
    let service = FinancialModelingService::new(state.metrics_store.clone()).with_mode(mode);

    match service
        .analyze_strategy(&request.model_id, &request.prices)
        .await
    {
        Ok(analysis) => Json(serde_json::json!({
            "success": true,
            "data": analysis,
        })),
        Err(e) => {
            warn!(model_id = %request.model_id, error = %e, "Analysis failed");
            Json(serde_json::json!({
                "success": false,
                "error": e.to_string(),
            }))
        }
    }
}

/// GET /api/models/:model_id/metrics
async fn api_model_metrics(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Json<serde_json::Value> {
    match state.metrics_store.metrics_for_model(&model_id).await {
        Ok(rows) => Json(serde_json::json!({
            "success": true,
            "data": rows,
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to load metrics: {}", e),
        })),
    }
}

#[derive(Deserialize)]
struct BacktestRequest {
    strategy: StrategyKind,
    #[serde(default)]
    config: BacktestConfig,
    #[serde(default = "default_symbol")]
    symbol: String,
    #[serde(default = "default_interval")]
    interval: String,
    #[serde(default = "default_limit")]
    limit: u32,
    /// Inline bars; when absent the market data chain is queried
    klines: Option<Vec<Kline>>,
    /// Inline close prices, used when `klines` is absent
    prices: Option<Vec<Decimal>>,
    #[serde(default)]
    save: bool,
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_interval() -> String {
    "1h".to_string()
}

fn default_limit() -> u32 {
    500
}

/// POST /api/backtest
async fn api_backtest(
    State(state): State<AppState>,
    Json(request): Json<BacktestRequest>,
) -> Json<serde_json::Value> {
    let klines = match (request.klines, request.prices) {
        (Some(klines), _) => klines,
        (None, Some(prices)) => klines_from_closes(&prices),
        (None, None) => {
            let fetch = KlineRequest::new(&request.symbol, &request.interval, request.limit);
            match state.market.fetch_klines(&fetch).await {
                Ok((_, klines)) => klines,
                Err(e) => {
                    return Json(serde_json::json!({
                        "success": false,
                        "error": format!("Failed to load market data: {}", e),
                    }))
                }
            }
        }
    };

    let history = request.save.then(|| state.db.pool());
    match run_backtest(
        &request.strategy,
        &request.config,
        &request.symbol,
        &klines,
        history,
    )
    .await
    {
        Ok((result, saved)) => {
            let findings = audit_trades(&default_rules(), &result.trades);
            Json(serde_json::json!({
                "success": true,
                "data": result,
                "audit": findings,
                "saved": saved,
            }))
        }
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": e.to_string(),
        })),
    }
}

/// GET /api/runs — saved backtest runs, newest first
async fn api_runs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit: i64 = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);

    let repo = BacktestRunRepository::new(state.db.pool());
    match repo.get_recent(limit).await {
        Ok(records) => Json(serde_json::json!({
            "success": true,
            "data": records,
            "limit": limit,
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to load runs: {}", e),
        })),
    }
}

// ============================================================================
// CLI commands
// ============================================================================

async fn load_klines(data: &DataArgs) -> anyhow::Result<Vec<Kline>> {
    let chain = market_data(data.data_file.as_ref())?;
    let request = KlineRequest::new(&data.symbol, &data.interval, data.limit);
    let (source, klines) = chain.fetch_klines(&request).await?;
    println!("Data: {} bars of {} from {}", klines.len(), data.symbol, source);
    Ok(klines)
}

async fn cmd_backtest(
    data: DataArgs,
    strategy: &str,
    config: BacktestConfig,
    save: bool,
    export: Option<String>,
) -> anyhow::Result<()> {
    println!("\n=== tradelab v{} ===", APP_VERSION);

    let kind = StrategyKind::from_name(strategy)
        .ok_or_else(|| anyhow::anyhow!("Unknown strategy: {}", strategy))?;
    let klines = load_klines(&data).await?;

    let db = if save { Some(open_db().await?) } else { None };
    let (result, saved) = run_backtest(
        &kind,
        &config,
        &data.symbol,
        &klines,
        db.as_ref().map(|d| d.pool()),
    )
    .await?;

    let findings = audit_trades(&default_rules(), &result.trades);
    print_backtest(&result, &findings);

    if save {
        println!(
            "\nRun {}",
            if saved { "saved" } else { "already recorded" }
        );
    }

    if let Some(path) = export {
        let body = serde_json::json!({
            "version": APP_VERSION,
            "symbol": data.symbol,
            "strategy": kind,
            "config": config,
            "result": result,
            "audit": findings,
        });
        std::fs::write(&path, serde_json::to_string_pretty(&body)?)?;
        println!("Exported to {}", path);
    }

    Ok(())
}

fn print_backtest(result: &BacktestResult, findings: &[AuditFinding]) {
    let m = &result.metrics;
    println!("\nStrategy:        {}", result.strategy);
    println!("Initial capital: {}", result.initial_capital);
    println!("Final capital:   {}", result.final_capital.round_dp(2));
    println!("Total PnL:       {}", m.total_pnl.round_dp(2));
    println!(
        "Trades:          {} ({} won, {} lost)",
        m.total_trades, m.winning_trades, m.losing_trades
    );
    println!("Win rate:        {:.1}%", m.win_rate);
    println!("Profit factor:   {}", m.profit_factor.round_dp(2));
    println!("Max drawdown:    {:.2}%", m.max_drawdown_pct);
    println!("Sharpe ratio:    {:.3}", m.sharpe_ratio);
    println!("ROI:             {:.2}%", m.roi * 100.0);

    if !findings.is_empty() {
        println!("\nAudit findings:");
        for f in findings {
            println!(
                "  [{:?}] {} on trade #{} (bar {}): {} > {}",
                f.severity,
                f.rule,
                f.trade_index,
                f.bar_index,
                f.observed.round_dp(2),
                f.limit
            );
        }
    }
}

async fn cmd_analyze(model_id: &str, data: DataArgs, strict: bool) -> anyhow::Result<()> {
    println!("\n=== tradelab v{} ===", APP_VERSION);

    let klines = load_klines(&data).await?;
    let prices = closes_f64(&klines);

    let db = open_db().await?;
    let store: Arc<dyn MetricsStore> = Arc::new(SqliteMetricsStore::new(db.pool_clone()));
    let mode = if strict {
        StatsMode::Strict
    } else {
        StatsMode::Lenient
    };
    let service = FinancialModelingService::new(store).with_mode(mode);
    let analysis = service.analyze_strategy(model_id, &prices).await?;

    println!("\nModel:          {}", analysis.model_id);
    println!("Samples:        {}", analysis.sample_size);
    println!("Sharpe ratio:   {:.4}", analysis.sharpe_ratio);
    println!("Sortino ratio:  {:.4}", analysis.sortino_ratio);
    println!("Max drawdown:   {:.2}%", analysis.max_drawdown * 100.0);
    println!("ROI:            {:.2}%", analysis.roi * 100.0);
    println!("Confidence:     {:.1}", analysis.confidence);
    println!("Recommendation: {}", analysis.recommendation);

    Ok(())
}

async fn cmd_runs(limit: i64) -> anyhow::Result<()> {
    let db = open_db().await?;
    let repo = BacktestRunRepository::new(db.pool());
    let runs = repo.get_recent(limit).await?;

    if runs.is_empty() {
        println!("No saved runs in {}", db_path());
        return Ok(());
    }

    println!(
        "{:<6} {:<20} {:<10} {:>6} {:>8} {:>14} {:>10}",
        "id", "strategy", "symbol", "bars", "trades", "final", "max dd %"
    );
    for run in runs {
        println!(
            "{:<6} {:<20} {:<10} {:>6} {:>8} {:>14} {:>10}",
            run.id.unwrap_or_default(),
            run.strategy_name,
            run.symbol,
            run.bars,
            run.total_trades,
            run.final_capital,
            run.max_drawdown_pct
                .map(|d| format!("{:.2}", d))
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    Ok(())
}

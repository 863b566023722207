//! CLI command implementations

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, FeedSource};
use crate::engine::TradingEngine;
use crate::feed::{DexScreenerFeed, PriceSource, SimulatedMarket, TokenFeed};
use crate::persistence::SnapshotStore;
use crate::report::{Reporter, StatsReport};
use crate::scheduler::TickScheduler;

/// Build the feed and price source for `source`
fn build_feed(
    config: &Config,
    source: FeedSource,
) -> Result<(Arc<dyn TokenFeed>, Arc<dyn PriceSource>)> {
    match source {
        FeedSource::Simulated => {
            let market = Arc::new(SimulatedMarket::new(config.feed.simulation_seed));
            let feed: Arc<dyn TokenFeed> = market.clone();
            let prices: Arc<dyn PriceSource> = market;
            Ok((feed, prices))
        }
        FeedSource::Dexscreener => {
            let client = Arc::new(DexScreenerFeed::new(&config.feed)?);
            let feed: Arc<dyn TokenFeed> = client.clone();
            let prices: Arc<dyn PriceSource> = client;
            Ok((feed, prices))
        }
    }
}

/// Run the trading loop until Ctrl-C or `ticks` ticks
pub async fn run(config: &Config, ticks: Option<u64>, source: Option<FeedSource>) -> Result<()> {
    let source = source.unwrap_or(config.feed.source);
    info!("Starting simulated trader (feed: {:?})", source);
    info!(
        "Capital ${}, ${} per position, max {} positions, TP {}%, SL {}%",
        config.trading.initial_capital_usd,
        config.trading.position_size_usd,
        config.trading.max_positions,
        config.exits.take_profit_pct * 100.0,
        config.exits.stop_loss_pct * 100.0
    );

    let (feed, prices) = build_feed(config, source)?;

    let store = SnapshotStore::new(&config.persistence.path);
    let mut engine = TradingEngine::new(config, Utc::now())?;
    // Never start over (and later overwrite) a snapshot we could not read
    let snapshot = store
        .load()
        .await
        .context("Refusing to start: existing snapshot is unreadable")?;
    if let Some(snapshot) = snapshot {
        engine.restore(snapshot);
    }
    let engine = engine.into_shared();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        signal.cancel();
    });

    let mut scheduler = TickScheduler::new(engine.clone(), feed, prices, store, config);
    scheduler.run(shutdown, ticks).await?;

    let report = Reporter::new(engine).stats_report().await;
    print_stats(&report);
    Ok(())
}

/// Show stats from the snapshot file
pub async fn status(config: &Config) -> Result<()> {
    let reporter = reporter(config).await?;
    print_stats(&reporter.stats_report().await);
    Ok(())
}

/// Show open positions from the snapshot file
pub async fn positions(config: &Config) -> Result<()> {
    let reporter = reporter(config).await?;
    let positions = reporter.open_positions(Utc::now()).await;

    println!("\n=== OPEN POSITIONS ===\n");
    if positions.is_empty() {
        println!("No open positions.");
        return Ok(());
    }

    for view in positions {
        let p = &view.position;
        println!(
            "{} ({}) {}\n  Buy: ${:.8}  Now: ${:.8}  High: ${:.8}  Low: ${:.8}\n  Invested: ${:.4}  Value: ${:.4}  P&L: ${:.4} ({:+.2}%)  Age: {:.0}s  Checks: {}",
            p.name,
            p.symbol,
            p.pair_id,
            p.buy_price,
            p.current_price,
            p.highest_price_seen,
            p.lowest_price_seen,
            p.invested_amount,
            view.current_value,
            view.unrealized_pnl,
            view.unrealized_profit_pct * 100.0,
            view.age_secs,
            p.check_count
        );
    }
    Ok(())
}

/// Show recent trades, or trades per hour
pub async fn trades(config: &Config, limit: usize, hourly: bool) -> Result<()> {
    let reporter = reporter(config).await?;

    if hourly {
        println!("\n=== HOURLY ===\n");
        let buckets = reporter.hourly().await;
        if buckets.is_empty() {
            println!("No trades yet.");
        }
        for bucket in buckets {
            println!(
                "{}  trades: {:>3}  wins: {:>3} ({:.0}%)  net: ${:+.4}",
                bucket.hour.format("%Y-%m-%d %H:00"),
                bucket.trades,
                bucket.wins,
                bucket.win_rate() * 100.0,
                bucket.net_profit
            );
        }
        return Ok(());
    }

    println!("\n=== RECENT TRADES ===\n");
    let trades = reporter.recent_trades(limit).await;
    if trades.is_empty() {
        println!("No trades yet.");
    }
    for trade in trades {
        println!(
            "{}  {:<6} {:<14} ${:.8} -> ${:.8}  net ${:+.4} ({:+.1}%)  {:.0}s  {:?}",
            trade.sell_timestamp.format("%Y-%m-%d %H:%M:%S"),
            trade.position.symbol,
            trade.exit_reason.to_string(),
            trade.position.buy_price,
            trade.sell_price,
            trade.realized_net_profit,
            trade.profit_pct() * 100.0,
            trade.duration_seconds,
            trade.outcome
        );
    }
    Ok(())
}

/// Show current configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

async fn reporter(config: &Config) -> Result<Reporter> {
    let store = SnapshotStore::new(&config.persistence.path);
    Ok(Reporter::from_store(&store, config).await?)
}

fn print_stats(report: &StatsReport) {
    let stats = &report.stats;
    println!("\n=== TRADER STATUS ===\n");
    println!("Started: {}", stats.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "Capital: ${:.4} (initial ${:.2}, ROI {:+.2}%)",
        stats.capital,
        stats.initial_capital,
        report.roi * 100.0
    );
    println!(
        "Open positions: {} (exposure ${:.4}, unrealized ${:+.4})",
        report.open_positions, report.open_exposure, report.unrealized_pnl
    );
    println!(
        "Trades: {} ({} wins, {} losses, win rate {:.1}%)",
        stats.total_trades,
        stats.wins,
        stats.losses,
        report.win_rate * 100.0
    );
    println!(
        "Realized P&L: gross ${:.4}, net ${:.4}, fees ${:.4}",
        stats.total_realized_profit, stats.net_realized_profit, stats.total_fees
    );
    if let Some(best) = &stats.best_trade {
        println!(
            "Best trade: {} ${:+.4}",
            best.position.symbol, best.realized_net_profit
        );
    }
    if let Some(worst) = &stats.worst_trade {
        println!(
            "Worst trade: {} ${:+.4}",
            worst.position.symbol, worst.realized_net_profit
        );
    }
    println!("Tokens scanned: {}", stats.scanned_tokens);
    println!("Trade history held: {}", report.trade_history_len);
}

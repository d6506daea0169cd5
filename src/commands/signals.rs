use crate::context::AppContext;
use crate::models::SignalRecord;
use anyhow::{anyhow, Result};

const HEADER: &str = "Date        Ticker  ProbUp    Action Signal  Price       ChangePct  Volume        Vol_norm";

fn format_optional<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn format_record(record: &SignalRecord) -> String {
    format!(
        "{:<11} {:<7} {:<9.6} {:<6} {:<7} {:<11} {:<10} {:<13} {}",
        record.date.to_string(),
        record.ticker,
        record.prob_up,
        record.action,
        record.signal.as_str(),
        format_optional(record.price),
        format_optional(record.change_pct),
        format_optional(record.volume),
        format_optional(record.vol_norm)
    )
}

/// Prints the last `limit` stored rows for `ticker`.
pub fn history(app: &AppContext, ticker: &str, limit: usize) -> Result<()> {
    let rows = app.signal_store().ticker_history(ticker, limit)?;
    if rows.is_empty() {
        return Err(anyhow!("No stored signals for {}", ticker));
    }
    println!("{HEADER}");
    for row in &rows {
        println!("{}", format_record(row));
    }
    Ok(())
}

pub fn latest(app: &AppContext, ticker: &str) -> Result<()> {
    let row = app
        .signal_store()
        .latest_signal(ticker)?
        .ok_or_else(|| anyhow!("No stored signals for {}", ticker))?;
    println!("{HEADER}");
    println!("{}", format_record(&row));
    Ok(())
}

pub fn tickers(app: &AppContext) -> Result<()> {
    for ticker in app.signal_store().known_tickers()? {
        println!("{ticker}");
    }
    Ok(())
}

use crate::context::AppContext;
use anyhow::Result;
use chrono::{Local, NaiveDate};
use log::info;

pub fn run(app: &AppContext, date: Option<NaiveDate>, tickers: &[String]) -> Result<()> {
    let today = date.unwrap_or_else(|| Local::now().date_naive());
    let tickers = app.tickers_or_default(tickers);
    info!(
        "Running daily signals for {} on {} ticker(s)",
        today,
        tickers.len()
    );

    let predictor = app.predictor()?;
    let outcome = predictor.run(today, &tickers);
    let published = predictor.publish(&outcome, today)?;

    if let Some(path) = published.signals_path {
        info!("Signals written to {}", path.display());
    }
    for (ticker, reason) in &outcome.failures {
        info!("  {} skipped: {}", ticker, reason);
    }
    Ok(())
}

use crate::context::AppContext;
use anyhow::Result;
use log::info;

pub fn run(app: &AppContext, tickers: &[String]) -> Result<()> {
    let cache = app.sentiment_cache();
    for ticker in app.tickers_or_default(tickers) {
        let daily = cache.refresh(&ticker);
        let mean = if daily.is_empty() {
            0.0
        } else {
            daily.values().sum::<f64>() / daily.len() as f64
        };
        info!(
            "[{}] {} sentiment day(s), mean {:.4} -> {}",
            ticker,
            daily.len(),
            mean,
            cache.cache_path(&ticker).display()
        );
    }
    Ok(())
}

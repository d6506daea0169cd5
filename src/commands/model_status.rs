use crate::context::AppContext;
use anyhow::Result;
use log::warn;
use std::collections::BTreeSet;

/// Reports artifact presence for `ticker`, or for every configured and stored ticker.
pub fn run(app: &AppContext, ticker: Option<&str>) -> Result<()> {
    let tickers: BTreeSet<String> = match ticker {
        Some(ticker) => std::iter::once(ticker.to_string()).collect(),
        None => {
            let mut all: BTreeSet<String> = app.config().tickers.iter().cloned().collect();
            match app.signal_store().known_tickers() {
                Ok(stored) => all.extend(stored),
                Err(err) => warn!("Could not read stored tickers: {:#}", err),
            }
            all
        }
    };

    let store = app.artifact_store();
    println!("Models dir: {}", store.models_dir().display());
    for ticker in tickers {
        let presence = store.presence(&ticker);
        let ready = presence.iter().all(|p| p.present);
        println!("{} {}", ticker, if ready { "ready" } else { "incomplete" });
        for entry in presence {
            println!(
                "  {:<10} {:<7} {}",
                entry.kind,
                if entry.present { "ok" } else { "missing" },
                entry.path.display()
            );
        }
    }
    Ok(())
}

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use daily_signals::{
    commands::{inspect_model, model_status, refresh_sentiment, run, signals},
    config::{parse_ticker_list, PipelineConfig},
    context::AppContext,
};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "daily-signals")]
#[command(about = "Daily BUY/HOLD/SELL signals from indicators, sentiment and pre-trained models")]
struct Cli {
    /// JSON settings file layered over the built-in defaults
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Base directory for models, cache and logs (overrides PROJECT_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    project_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily job and append results to the signal log
    Run {
        /// Run date (YYYY-MM-DD), defaults to today
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Comma separated tickers overriding the configured list
        #[arg(long)]
        tickers: Option<String>,
    },
    /// Rebuild per-ticker sentiment caches from the news file
    RefreshSentiment {
        #[arg(long)]
        tickers: Option<String>,
    },
    /// Print stored signal history for a ticker
    Signals {
        ticker: String,
        #[arg(long, default_value_t = 60)]
        limit: usize,
    },
    /// Print the most recent stored signal for a ticker
    Latest { ticker: String },
    /// List tickers present in the signal log
    Tickers,
    /// Report which artifacts exist per ticker
    ModelStatus { ticker: Option<String> },
    /// Print the classifier architecture inferred from its weights
    InspectModel { ticker: String },
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("expected a date in YYYY-MM-DD format, got {raw}"))
}

fn main() -> Result<()> {
    let Cli {
        config,
        project_dir,
        command,
    } = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {}", path.display());
    }

    let mut overrides = HashMap::new();
    if let Some(dir) = project_dir {
        overrides.insert("PROJECT_DIR".to_string(), dir.display().to_string());
    }
    let config = PipelineConfig::load(config.as_deref(), &overrides)?;
    let app = AppContext::initialize(config);

    info!("Not financial advice. Signals are model outputs, not recommendations.");

    let ticker_args = |raw: Option<String>| raw.map(|r| parse_ticker_list(&r)).unwrap_or_default();

    match command {
        Commands::Run { date, tickers } => {
            run::run(&app, date, &ticker_args(tickers))?;
        }
        Commands::RefreshSentiment { tickers } => {
            refresh_sentiment::run(&app, &ticker_args(tickers))?;
        }
        Commands::Signals { ticker, limit } => {
            signals::history(&app, &ticker.to_uppercase(), limit)?;
        }
        Commands::Latest { ticker } => {
            signals::latest(&app, &ticker.to_uppercase())?;
        }
        Commands::Tickers => {
            signals::tickers(&app)?;
        }
        Commands::ModelStatus { ticker } => {
            let ticker = ticker.map(|t| t.to_uppercase());
            model_status::run(&app, ticker.as_deref())?;
        }
        Commands::InspectModel { ticker } => {
            inspect_model::run(&app, &ticker.to_uppercase())?;
        }
    }

    Ok(())
}

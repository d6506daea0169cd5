use crate::market_data::normalize_ticker_symbol;
use crate::sentiment::ScorerKind;
use crate::signals::{SignalThresholds, DEFAULT_BUY_THRESHOLD, DEFAULT_SELL_THRESHOLD};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "DAILY_SIGNALS_";

pub const SETTING_KEYS: [&str; 18] = [
    "PROJECT_DIR",
    "MODELS_DIR",
    "CACHE_DIR",
    "LOGS_DIR",
    "NEWS_CSV",
    "TICKERS",
    "FEATURES",
    "START_DATE",
    "SEQ_LEN",
    "LOOKBACK_DAYS",
    "BUY_THRESHOLD",
    "SELL_THRESHOLD",
    "NUM_HEADS",
    "PRICE_SOURCE",
    "PRICE_DATA_DIR",
    "YAHOO_BASE_URL",
    "HTTP_TIMEOUT_SECS",
    "SENTIMENT_SCORER",
];

/// Upper bound for `LOOKBACK_DAYS`, roughly a century of calendar days.
pub const MAX_LOOKBACK_DAYS: usize = 36_500;

pub const DEFAULT_TICKERS: [&str; 3] = ["AAPL", "MSFT", "GOOGL"];

/// Feature columns, in the order the scaler and classifier were trained on.
pub const DEFAULT_FEATURES: [&str; 27] = [
    "Open",
    "High",
    "Low",
    "Close",
    "Volume",
    "Return",
    "LogRet",
    "SMA_10",
    "SMA_20",
    "EMA_12",
    "EMA_26",
    "RSI_14",
    "MACD",
    "MACD_S",
    "MACD_H",
    "BB_Width",
    "HL_Range",
    "Volume_Change",
    "Sentiment",
    "LogRet_1d",
    "LogRet_5d",
    "LogRet_10d",
    "Volatility_5d",
    "Volatility_10d",
    "Vol_norm",
    "Price_vs_SMA20",
    "Price_vs_SMA50",
];

pub const DEFAULT_NEWS_FILE: &str = "data/Combined_News_DJIA.csv";
pub const DEFAULT_YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";
pub const SIGNALS_FILE: &str = "signals.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSourceKind {
    Yahoo,
    Csv,
}

impl PriceSourceKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yahoo" => Ok(Self::Yahoo),
            "csv" => Ok(Self::Csv),
            other => Err(anyhow!(
                "PRICE_SOURCE must be yahoo or csv (value: {})",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub project_dir: PathBuf,
    pub models_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub news_csv: Option<PathBuf>,
    pub tickers: Vec<String>,
    pub features: Vec<String>,
    pub start_date: NaiveDate,
    pub seq_len: usize,
    pub lookback_days: i64,
    pub thresholds: SignalThresholds,
    pub num_heads: usize,
    pub price_source: PriceSourceKind,
    pub price_data_dir: PathBuf,
    pub yahoo_base_url: String,
    pub http_timeout: Duration,
    pub sentiment_scorer: ScorerKind,
}

impl PipelineConfig {
    /// Defaults ← JSON file ← `DAILY_SIGNALS_*` environment ← `overrides`.
    pub fn load(config_file: Option<&Path>, overrides: &HashMap<String, String>) -> Result<Self> {
        let mut settings = default_settings();
        if let Some(path) = config_file {
            merge_json_settings(&mut settings, path)?;
        }
        merge_env_settings(&mut settings, std::env::vars());
        for (key, value) in overrides {
            settings.insert(key.clone(), value.clone());
        }
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let project_dir = PathBuf::from(require_setting(settings, "PROJECT_DIR")?);
        let resolve_dir = |key: &str, fallback: &str| -> PathBuf {
            match optional_setting(settings, key) {
                Some(value) => resolve_path(&project_dir, value),
                None => project_dir.join(fallback),
            }
        };
        let models_dir = resolve_dir("MODELS_DIR", "models");
        let cache_dir = resolve_dir("CACHE_DIR", "cache");
        let logs_dir = resolve_dir("LOGS_DIR", "logs");
        let price_data_dir = resolve_dir("PRICE_DATA_DIR", "data/prices");

        let news_csv = match optional_setting(settings, "NEWS_CSV") {
            Some(value) if value.eq_ignore_ascii_case("none") => None,
            Some(value) => Some(resolve_path(&project_dir, value)),
            None => Some(project_dir.join(DEFAULT_NEWS_FILE)),
        };

        let tickers = require_setting_list(settings, "TICKERS")?
            .iter()
            .filter_map(|ticker| normalize_ticker_symbol(ticker))
            .collect::<Vec<_>>();
        let features = require_setting_list(settings, "FEATURES")?;
        let start_date = require_setting_date(settings, "START_DATE")?;
        let seq_len = require_setting_usize(settings, "SEQ_LEN", 1)?;
        let lookback_days = require_setting_usize(settings, "LOOKBACK_DAYS", 1)?;
        if lookback_days > MAX_LOOKBACK_DAYS {
            return Err(anyhow!(
                "Setting LOOKBACK_DAYS must be <= {} (value: {})",
                MAX_LOOKBACK_DAYS,
                lookback_days
            ));
        }
        let lookback_days = lookback_days as i64;
        let buy = require_setting_f64(settings, "BUY_THRESHOLD", Some(0.0), Some(1.0))?;
        let sell = require_setting_f64(settings, "SELL_THRESHOLD", Some(0.0), Some(1.0))?;
        let num_heads = require_setting_usize(settings, "NUM_HEADS", 1)?;
        let price_source = PriceSourceKind::parse(require_setting(settings, "PRICE_SOURCE")?)?;
        let yahoo_base_url = require_setting(settings, "YAHOO_BASE_URL")?.to_string();
        let http_timeout_secs = require_setting_f64(settings, "HTTP_TIMEOUT_SECS", Some(0.0), None)?;
        let sentiment_scorer = ScorerKind::parse(require_setting(settings, "SENTIMENT_SCORER")?)?;

        if sell > buy {
            return Err(anyhow!(
                "SELL_THRESHOLD ({}) must be <= BUY_THRESHOLD ({})",
                sell,
                buy
            ));
        }
        if tickers.is_empty() {
            return Err(anyhow!("Setting TICKERS must name at least one ticker"));
        }
        if http_timeout_secs <= 0.0 {
            return Err(anyhow!(
                "Setting HTTP_TIMEOUT_SECS must be > 0 (value: {})",
                http_timeout_secs
            ));
        }

        Ok(Self {
            project_dir,
            models_dir,
            cache_dir,
            logs_dir,
            news_csv,
            tickers,
            features,
            start_date,
            seq_len,
            lookback_days,
            thresholds: SignalThresholds { buy, sell },
            num_heads,
            price_source,
            price_data_dir,
            yahoo_base_url,
            http_timeout: Duration::from_secs_f64(http_timeout_secs),
            sentiment_scorer,
        })
    }

    pub fn signals_path(&self) -> PathBuf {
        self.logs_dir.join(SIGNALS_FILE)
    }
}

pub fn default_settings() -> HashMap<String, String> {
    let mut settings = HashMap::new();
    let mut set = |key: &str, value: String| {
        settings.insert(key.to_string(), value);
    };
    set("PROJECT_DIR", ".".to_string());
    set("TICKERS", DEFAULT_TICKERS.join(","));
    set("FEATURES", DEFAULT_FEATURES.join(","));
    set("START_DATE", "2015-01-01".to_string());
    set("SEQ_LEN", "60".to_string());
    set("LOOKBACK_DAYS", "700".to_string());
    set("BUY_THRESHOLD", DEFAULT_BUY_THRESHOLD.to_string());
    set("SELL_THRESHOLD", DEFAULT_SELL_THRESHOLD.to_string());
    set("NUM_HEADS", "4".to_string());
    set("PRICE_SOURCE", "yahoo".to_string());
    set("YAHOO_BASE_URL", DEFAULT_YAHOO_BASE_URL.to_string());
    set("HTTP_TIMEOUT_SECS", "30".to_string());
    set("SENTIMENT_SCORER", "lexicon".to_string());
    settings
}

/// Merges a JSON object of scalars or arrays; arrays become comma-separated lists.
pub fn merge_json_settings(settings: &mut HashMap<String, String>, path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("Config file {} is not valid JSON", path.display()))?;
    let Value::Object(entries) = value else {
        return Err(anyhow!(
            "Config file {} must contain a JSON object",
            path.display()
        ));
    };

    for (key, entry) in entries {
        let key = key.trim().to_ascii_uppercase();
        if !SETTING_KEYS.contains(&key.as_str()) {
            return Err(anyhow!("Unknown setting {} in {}", key, path.display()));
        }
        let rendered = match entry {
            Value::Array(items) => items
                .iter()
                .map(json_scalar)
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Setting {} must be a list of scalars", key))?
                .join(","),
            other => json_scalar(&other).with_context(|| format!("Setting {}", key))?,
        };
        settings.insert(key, rendered);
    }
    Ok(())
}

fn json_scalar(value: &Value) -> Result<String> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(anyhow!("unsupported value {}", other)),
    }
}

/// Applies `DAILY_SIGNALS_<KEY>` variables for known keys.
pub fn merge_env_settings(
    settings: &mut HashMap<String, String>,
    vars: impl IntoIterator<Item = (String, String)>,
) {
    for (name, value) in vars {
        let Some(key) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        if SETTING_KEYS.contains(&key) {
            debug!("Setting {} from environment", key);
            settings.insert(key.to_string(), value);
        }
    }
}

fn resolve_path(base: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))
}

pub fn require_setting_date(settings: &HashMap<String, String>, key: &str) -> Result<NaiveDate> {
    let raw = require_setting(settings, key)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "Setting {} must be a date in YYYY-MM-DD format (value: {})",
            key,
            raw
        )
    })
}

fn require_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn require_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<usize> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn require_setting_list(settings: &HashMap<String, String>, key: &str) -> Result<Vec<String>> {
    let raw = require_setting(settings, key)?;
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']');
    let values: Vec<String> = trimmed
        .split(',')
        .map(|part| part.trim().trim_matches(|c| c == '"' || c == '\''))
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();

    if values.is_empty() {
        return Err(anyhow!(
            "Setting {} must contain at least one entry (value: {})",
            key,
            raw
        ));
    }
    Ok(values)
}

/// Splits a `--tickers A,B` style argument into normalized symbols.
pub fn parse_ticker_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(normalize_ticker_symbol)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_valid_config() {
        let config = PipelineConfig::from_settings_map(&default_settings()).unwrap();
        assert_eq!(config.tickers, vec!["AAPL", "MSFT", "GOOGL"]);
        assert_eq!(config.features.len(), 27);
        assert_eq!(config.features[18], "Sentiment");
        assert_eq!(config.seq_len, 60);
        assert_eq!(config.lookback_days, 700);
        assert_eq!(config.thresholds, SignalThresholds::default());
        assert_eq!(config.models_dir, PathBuf::from("./models"));
        assert_eq!(config.signals_path(), PathBuf::from("./logs/signals.csv"));
        assert_eq!(
            config.news_csv,
            Some(PathBuf::from("./data/Combined_News_DJIA.csv"))
        );
        assert_eq!(config.price_source, PriceSourceKind::Yahoo);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut settings = default_settings();
        settings.insert("BUY_THRESHOLD".into(), "0.4".into());
        settings.insert("SELL_THRESHOLD".into(), "0.6".into());
        let err = PipelineConfig::from_settings_map(&settings).unwrap_err();
        assert!(err.to_string().contains("SELL_THRESHOLD"));

        let mut settings = default_settings();
        settings.insert("BUY_THRESHOLD".into(), "1.5".into());
        assert!(PipelineConfig::from_settings_map(&settings).is_err());
    }

    #[test]
    fn numeric_settings_are_validated() {
        let mut settings = default_settings();
        settings.insert("SEQ_LEN".into(), "12.5".into());
        assert!(PipelineConfig::from_settings_map(&settings).is_err());

        let mut settings = default_settings();
        settings.insert("START_DATE".into(), "01/02/2015".into());
        assert!(PipelineConfig::from_settings_map(&settings).is_err());
    }

    #[test]
    fn lookback_days_are_bounded() {
        let mut settings = default_settings();
        settings.insert("LOOKBACK_DAYS".into(), "1000000000".into());
        let err = PipelineConfig::from_settings_map(&settings).unwrap_err();
        assert!(err.to_string().contains("LOOKBACK_DAYS must be <= 36500"));

        settings.insert("LOOKBACK_DAYS".into(), MAX_LOOKBACK_DAYS.to_string());
        let config = PipelineConfig::from_settings_map(&settings).unwrap();
        assert_eq!(config.lookback_days, 36_500);
    }

    #[test]
    fn relative_dirs_resolve_against_project_dir() {
        let mut settings = default_settings();
        settings.insert("PROJECT_DIR".into(), "/srv/signals".into());
        settings.insert("MODELS_DIR".into(), "artifacts".into());
        settings.insert("LOGS_DIR".into(), "/var/log/signals".into());
        settings.insert("NEWS_CSV".into(), "none".into());
        let config = PipelineConfig::from_settings_map(&settings).unwrap();
        assert_eq!(config.models_dir, PathBuf::from("/srv/signals/artifacts"));
        assert_eq!(config.logs_dir, PathBuf::from("/var/log/signals"));
        assert_eq!(config.cache_dir, PathBuf::from("/srv/signals/cache"));
        assert_eq!(config.news_csv, None);
    }

    #[test]
    fn json_file_and_environment_layer_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"tickers": ["tsla", "nvda"], "seq_len": 30, "price_source": "csv"}"#,
        )
        .unwrap();

        let mut settings = default_settings();
        merge_json_settings(&mut settings, &path).unwrap();
        merge_env_settings(
            &mut settings,
            vec![
                ("DAILY_SIGNALS_SEQ_LEN".to_string(), "45".to_string()),
                ("DAILY_SIGNALS_UNKNOWN".to_string(), "x".to_string()),
                ("SEQ_LEN".to_string(), "99".to_string()),
            ],
        );
        let config = PipelineConfig::from_settings_map(&settings).unwrap();
        assert_eq!(config.tickers, vec!["TSLA", "NVDA"]);
        assert_eq!(config.seq_len, 45);
        assert_eq!(config.price_source, PriceSourceKind::Csv);
        assert!(!settings.contains_key("UNKNOWN"));
    }

    #[test]
    fn unknown_json_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"tickerz": "AAPL"}"#).unwrap();
        let mut settings = default_settings();
        assert!(merge_json_settings(&mut settings, &path).is_err());
    }

    #[test]
    fn ticker_arguments_are_normalized() {
        assert_eq!(parse_ticker_list(" aapl, msft  googl,"), vec!["AAPL", "MSFT", "GOOGL"]);
    }
}

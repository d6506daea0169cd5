use crate::error::PipelineError;
use crate::models::Candle;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime};
use log::{debug, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const OHLCV_COLUMNS: [&str; 5] = ["Open", "High", "Low", "Close", "Volume"];
const MAX_ERROR_BODY_CHARS: usize = 512;
const USER_AGENT: &str = concat!("daily-signals/", env!("CARGO_PKG_VERSION"));

/// Price rows exactly as a source delivered them, before column normalization.
#[derive(Debug, Clone, Default)]
pub struct RawPriceFrame {
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

impl RawPriceFrame {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }
}

pub trait PriceSource {
    fn name(&self) -> &str;

    /// Daily rows for `ticker` with `start <= date < end`.
    fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<RawPriceFrame>;
}

/// Fetches and normalizes a ticker's candles.
pub fn fetch_candles(
    source: &dyn PriceSource,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<Candle>> {
    let raw = source
        .fetch(ticker, start, end)
        .with_context(|| format!("{} price fetch failed for {}", source.name(), ticker))?;
    debug!("[{}] raw columns: {:?}", ticker, raw.column_names());
    normalize_ohlcv(ticker, &raw)
}

/// Normalizes a trimmed ticker symbol to uppercase.
pub fn normalize_ticker_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn header_tokens(value: &str) -> Vec<String> {
    value
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
        .collect()
}

/// Maps a source header such as `close`, `Close_AAPL` or `('Close', 'AAPL')`
/// onto one of [`OHLCV_COLUMNS`].
pub fn canonical_ohlcv_column(header: &str, ticker: &str) -> Option<&'static str> {
    let mut tokens = header_tokens(header);
    let ticker_tokens = header_tokens(ticker);
    if !ticker_tokens.is_empty() && tokens.len() > ticker_tokens.len() {
        if let Some(start) = tokens
            .windows(ticker_tokens.len())
            .position(|window| window == ticker_tokens.as_slice())
        {
            tokens.drain(start..start + ticker_tokens.len());
        }
    }

    let [field] = tokens.as_slice() else {
        return None;
    };
    OHLCV_COLUMNS
        .iter()
        .copied()
        .find(|name| name.eq_ignore_ascii_case(field))
}

/// Reduces a raw frame to ordered, fully-populated OHLCV candles.
pub fn normalize_ohlcv(ticker: &str, raw: &RawPriceFrame) -> Result<Vec<Candle>> {
    if raw.is_empty() {
        return Err(PipelineError::DataUnavailable {
            ticker: ticker.to_string(),
        }
        .into());
    }

    let mut resolved: [Option<&[Option<f64>]>; 5] = [None; 5];
    for (header, values) in &raw.columns {
        let Some(field) = canonical_ohlcv_column(header, ticker) else {
            continue;
        };
        let idx = OHLCV_COLUMNS
            .iter()
            .position(|name| *name == field)
            .unwrap_or_default();
        if resolved[idx].is_none() {
            resolved[idx] = Some(values.as_slice());
        }
    }

    let missing: Vec<String> = OHLCV_COLUMNS
        .iter()
        .zip(resolved.iter())
        .filter(|(_, column)| column.is_none())
        .map(|(name, _)| name.to_string())
        .collect();
    let [Some(open), Some(high), Some(low), Some(close), Some(volume)] = resolved else {
        return Err(PipelineError::Schema {
            ticker: ticker.to_string(),
            missing,
            available: raw.column_names(),
        }
        .into());
    };

    let cell = |column: &[Option<f64>], row: usize| -> Option<f64> {
        column.get(row).copied().flatten().filter(|v| v.is_finite())
    };

    let mut candles: Vec<Candle> = Vec::with_capacity(raw.len());
    for (row, date) in raw.dates.iter().enumerate() {
        let (Some(o), Some(h), Some(l), Some(c), Some(v)) = (
            cell(open, row),
            cell(high, row),
            cell(low, row),
            cell(close, row),
            cell(volume, row),
        ) else {
            continue;
        };
        candles.push(Candle {
            date: *date,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
        });
    }

    candles.sort_by(|a, b| a.date.cmp(&b.date));
    candles.dedup_by(|later, earlier| later.date == earlier.date);

    if candles.is_empty() {
        return Err(PipelineError::DataUnavailable {
            ticker: ticker.to_string(),
        }
        .into());
    }
    Ok(candles)
}

pub fn build_blocking_client(timeout: Option<Duration>) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

/// Daily bars from the Yahoo Finance chart endpoint, adjusted for splits and
/// dividends with the `adjclose` series.
pub struct YahooPriceSource {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl YahooPriceSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_blocking_client(Some(timeout))?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: Option<ChartMeta>,
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
    #[serde(default)]
    adjclose: Option<Vec<ChartAdjClose>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct ChartAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

fn unix_seconds(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

fn chart_to_frame(envelope: ChartEnvelope) -> Result<RawPriceFrame> {
    if let Some(error) = envelope.chart.error {
        return Err(anyhow!(
            "chart API error {}: {}",
            error.code.unwrap_or_default(),
            error.description.unwrap_or_default()
        ));
    }
    let Some(result) = envelope.chart.result.and_then(|mut r| {
        if r.is_empty() {
            None
        } else {
            Some(r.swap_remove(0))
        }
    }) else {
        return Ok(RawPriceFrame::default());
    };

    let offset = result.meta.and_then(|m| m.gmtoffset).unwrap_or(0);
    let timestamps = result.timestamp.unwrap_or_default();
    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .unwrap_or_default();
    let adjclose = result
        .indicators
        .adjclose
        .and_then(|series| series.into_iter().next())
        .map(|series| series.adjclose);

    let mut dates = Vec::with_capacity(timestamps.len());
    for ts in &timestamps {
        let date = DateTime::from_timestamp(ts + offset, 0)
            .ok_or_else(|| anyhow!("invalid chart timestamp {}", ts))?
            .date_naive();
        dates.push(date);
    }

    let at = |values: &[Option<f64>], idx: usize| values.get(idx).copied().flatten();
    let mut open = Vec::with_capacity(dates.len());
    let mut high = Vec::with_capacity(dates.len());
    let mut low = Vec::with_capacity(dates.len());
    let mut close = Vec::with_capacity(dates.len());
    let mut volume = Vec::with_capacity(dates.len());
    for idx in 0..dates.len() {
        let raw_close = at(&quote.close, idx);
        let factor = match (adjclose.as_deref(), raw_close) {
            (Some(adjusted), Some(c)) if c != 0.0 => at(adjusted, idx).map(|a| a / c),
            (Some(_), _) => None,
            (None, _) => Some(1.0),
        };
        let scale = |value: Option<f64>| value.zip(factor).map(|(v, f)| v * f);
        open.push(scale(at(&quote.open, idx)));
        high.push(scale(at(&quote.high, idx)));
        low.push(scale(at(&quote.low, idx)));
        close.push(scale(raw_close));
        volume.push(at(&quote.volume, idx));
    }

    Ok(RawPriceFrame {
        dates,
        columns: vec![
            ("open".to_string(), open),
            ("high".to_string(), high),
            ("low".to_string(), low),
            ("close".to_string(), close),
            ("volume".to_string(), volume),
        ],
    })
}

impl PriceSource for YahooPriceSource {
    fn name(&self) -> &str {
        "yahoo"
    }

    fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<RawPriceFrame> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);
        let period1 = unix_seconds(start).to_string();
        let period2 = unix_seconds(end).to_string();
        info!("[{}] Fetching prices {} .. {}", ticker, start, end);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("period1", period1.as_str()),
                ("period2", period2.as_str()),
                ("interval", "1d"),
                ("events", "div,splits"),
            ])
            .send()
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "chart request failed: status={} url={} body={}",
                status,
                url,
                truncate_for_log(&body, MAX_ERROR_BODY_CHARS)
            ));
        }

        let envelope: ChartEnvelope = response
            .json()
            .with_context(|| format!("failed to decode chart response for {}", ticker))?;
        let mut frame = chart_to_frame(envelope)?;
        let keep: Vec<bool> = frame
            .dates
            .iter()
            .map(|date| *date >= start && *date < end)
            .collect();
        if keep.iter().any(|k| !k) {
            frame.dates = filter_by_mask(&frame.dates, &keep);
            for (_, values) in frame.columns.iter_mut() {
                *values = filter_by_mask(values, &keep);
            }
        }
        Ok(frame)
    }
}

fn filter_by_mask<T: Clone>(values: &[T], keep: &[bool]) -> Vec<T> {
    values
        .iter()
        .zip(keep)
        .filter(|(_, keep)| **keep)
        .map(|(value, _)| value.clone())
        .collect()
}

/// Reads `<dir>/<TICKER>.csv` exports with a date column and OHLCV columns in
/// any header style.
pub struct CsvPriceSource {
    dir: PathBuf,
}

impl CsvPriceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", ticker))
    }
}

pub(crate) fn parse_loose_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let head = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%m/%d/%Y"))
        .ok()
}

fn read_price_csv(path: &Path, start: NaiveDate, end: NaiveDate) -> Result<RawPriceFrame> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open price file {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("failed to read headers of {}", path.display()))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let date_idx = headers
        .iter()
        .position(|h| {
            matches!(
                h.trim().to_ascii_lowercase().as_str(),
                "date" | "datetime" | "timestamp" | "price"
            )
        })
        .unwrap_or(0);

    let mut frame = RawPriceFrame {
        dates: Vec::new(),
        columns: headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != date_idx)
            .map(|(_, name)| (name.clone(), Vec::new()))
            .collect(),
    };

    for record in reader.records() {
        let record = record.with_context(|| format!("malformed row in {}", path.display()))?;
        let Some(date) = record.get(date_idx).and_then(parse_loose_date) else {
            continue;
        };
        if date < start || date >= end {
            continue;
        }
        frame.dates.push(date);
        let mut column = 0;
        for idx in 0..headers.len() {
            if idx == date_idx {
                continue;
            }
            let value = record.get(idx).and_then(|cell| cell.trim().parse::<f64>().ok());
            frame.columns[column].1.push(value);
            column += 1;
        }
    }

    Ok(frame)
}

impl PriceSource for CsvPriceSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<RawPriceFrame> {
        let path = self.path_for(ticker);
        if !path.exists() {
            return Err(PipelineError::DataUnavailable {
                ticker: ticker.to_string(),
            })
            .with_context(|| format!("price file {} does not exist", path.display()));
        }
        read_price_csv(&path, start, end)
    }
}

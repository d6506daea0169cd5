use crate::models::{DiagnosticRecord, SignalRecord};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const REQUIRED_COLUMNS: [&str; 5] = ["Date", "Ticker", "ProbUp", "Action", "Signal"];

/// Cumulative signal log keyed by (Date, Ticker).
#[derive(Debug, Clone)]
pub struct SignalStore {
    path: PathBuf,
}

impl SignalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows of the cumulative file; a missing file is empty. Rows that do not
    /// parse are skipped with a warning; an unreadable file or a header
    /// without the key columns is an error.
    pub fn load(&self) -> Result<Vec<SignalRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open signal log {}", self.path.display()))?;
        let mut reader = csv::Reader::from_reader(file);
        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read header of {}", self.path.display()))?;
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|column| !headers.iter().any(|h| h == *column))
            .collect();
        if !missing.is_empty() {
            return Err(anyhow!(
                "Signal log {} is missing columns {:?}",
                self.path.display(),
                missing
            ));
        }

        let mut records = Vec::new();
        for (idx, row) in reader.deserialize::<SignalRecord>().enumerate() {
            match row {
                Ok(record) => records.push(record),
                Err(err) => warn!(
                    "Skipping malformed row {} in {}: {}",
                    idx + 1,
                    self.path.display(),
                    err
                ),
            }
        }
        Ok(records)
    }

    /// Appends `today`, keeps the last write per (Date, Ticker) and rewrites the
    /// file sorted. Falls back to writing only `today` when the existing file
    /// cannot be merged. Returns the number of rows written.
    pub fn merge(&self, today: &[SignalRecord]) -> Result<usize> {
        if today.is_empty() {
            info!("No signal rows to write");
            return Ok(0);
        }

        let rows = match self.load() {
            Ok(existing) => merge_records(existing, today),
            Err(err) => {
                warn!(
                    "Could not merge with existing {}; overwriting with today's rows: {:?}",
                    self.path.display(),
                    err
                );
                merge_records(Vec::new(), today)
            }
        };
        write_csv_atomic(&self.path, &rows)?;
        info!(
            "Merged {} new row(s) into {} ({} total)",
            today.len(),
            self.path.display(),
            rows.len()
        );
        Ok(rows.len())
    }

    /// The last `limit` rows for `ticker`, oldest first.
    pub fn ticker_history(&self, ticker: &str, limit: usize) -> Result<Vec<SignalRecord>> {
        let mut rows: Vec<SignalRecord> = self
            .load()?
            .into_iter()
            .filter(|record| record.ticker.eq_ignore_ascii_case(ticker))
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date));
        let skip = rows.len().saturating_sub(limit);
        Ok(rows.split_off(skip))
    }

    pub fn latest_signal(&self, ticker: &str) -> Result<Option<SignalRecord>> {
        Ok(self.ticker_history(ticker, 1)?.pop())
    }

    pub fn known_tickers(&self) -> Result<Vec<String>> {
        let tickers: BTreeSet<String> = self
            .load()?
            .into_iter()
            .map(|record| record.ticker)
            .collect();
        Ok(tickers.into_iter().collect())
    }
}

pub fn merge_records(existing: Vec<SignalRecord>, today: &[SignalRecord]) -> Vec<SignalRecord> {
    let mut by_key: BTreeMap<(NaiveDate, String), SignalRecord> = BTreeMap::new();
    for record in existing.into_iter().chain(today.iter().cloned()) {
        by_key.insert((record.date, record.ticker.clone()), record);
    }
    by_key.into_values().collect()
}

pub fn diagnostics_path(logs_dir: &Path, date: NaiveDate) -> PathBuf {
    logs_dir.join(format!("ppo_{}.csv", date.format("%Y-%m-%d")))
}

/// Writes the dated policy diagnostics file. Failures are logged, never raised.
pub fn write_diagnostics(
    logs_dir: &Path,
    date: NaiveDate,
    rows: &[DiagnosticRecord],
) -> Option<PathBuf> {
    if rows.is_empty() {
        return None;
    }
    let path = diagnostics_path(logs_dir, date);
    match write_csv_atomic(&path, rows) {
        Ok(()) => {
            info!("Wrote policy diagnostics to {}", path.display());
            Some(path)
        }
        Err(err) => {
            warn!("Failed to write policy diagnostics: {:?}", err);
            None
        }
    }
}

fn write_csv_atomic<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }

    let tmp_path = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp_path)
            .with_context(|| format!("Unable to create {}", tmp_path.display()))?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to flush {}", tmp_path.display()))?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move {} into place", tmp_path.display()))
}

use crate::artifacts::{ArchitectureHints, ArtifactStore};
use crate::config::PipelineConfig;
use crate::features::{align_sentiment, feature_matrix, make_window};
use crate::indicators::compute_indicators;
use crate::market_data::{fetch_candles, PriceSource};
use crate::models::{finite_rounded, round_to, DiagnosticRecord, SignalRecord};
use crate::sentiment::SentimentCache;
use crate::signals::policy_signal;
use crate::store::{write_diagnostics, SignalStore};
use anyhow::Result;
use chrono::{Duration, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use ndarray::Array1;
use std::path::PathBuf;

/// Output of one ticker's inference.
#[derive(Debug, Clone)]
pub struct TickerPrediction {
    pub signal: SignalRecord,
    pub diagnostic: DiagnosticRecord,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub signals: Vec<SignalRecord>,
    pub diagnostics: Vec<DiagnosticRecord>,
    /// Ticker and rendered error chain for every ticker that was skipped.
    pub failures: Vec<(String, String)>,
}

impl RunOutcome {
    pub fn processed(&self) -> usize {
        self.signals.len() + self.failures.len()
    }
}

/// Where a published run landed on disk.
#[derive(Debug, Clone)]
pub struct PublishedRun {
    pub signals_path: Option<PathBuf>,
    pub diagnostics_path: Option<PathBuf>,
}

/// Drives the per-ticker pipeline: prices, indicators, sentiment, scaling,
/// classifier and policy inference.
pub struct DailyPredictor {
    config: PipelineConfig,
    prices: Box<dyn PriceSource>,
    sentiment: SentimentCache,
    artifacts: ArtifactStore,
}

impl DailyPredictor {
    pub fn new(
        config: PipelineConfig,
        prices: Box<dyn PriceSource>,
        sentiment: SentimentCache,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            config,
            prices,
            sentiment,
            artifacts,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fetch_window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let lookback_start = Duration::try_days(self.config.lookback_days)
            .and_then(|span| today.checked_sub_signed(span))
            .unwrap_or(NaiveDate::MIN);
        (self.config.start_date.max(lookback_start), today)
    }

    pub fn process_ticker(&self, ticker: &str, today: NaiveDate) -> Result<TickerPrediction> {
        let config = &self.config;
        let (start, end) = self.fetch_window(today);
        debug!("[{}] Price window {} .. {} via {}", ticker, start, end, self.prices.name());
        let candles = fetch_candles(self.prices.as_ref(), ticker, start, end)?;

        let frame = compute_indicators(&candles)?;
        info!(
            "[{}] {} candles, {} rows after indicator warm-up",
            ticker,
            candles.len(),
            frame.len()
        );

        let sentiment = self.sentiment.daily_sentiment(ticker);
        let frame = align_sentiment(frame, &sentiment)?;
        let matrix = feature_matrix(ticker, &frame, &config.features)?;

        let scaler = self.artifacts.load_scaler(ticker, &config.features)?;
        let scaled = scaler.transform(&matrix)?;

        let hints = ArchitectureHints {
            n_features: config.features.len(),
            seq_len: config.seq_len,
            num_heads: config.num_heads,
        };
        let classifier = self.artifacts.load_classifier(ticker, &hints)?;
        if classifier.seq_len() != config.seq_len {
            info!(
                "[{}] Classifier was trained on {}-day windows (configured {})",
                ticker,
                classifier.seq_len(),
                config.seq_len
            );
        }
        let window = make_window(&scaled, classifier.seq_len())?;
        let prob_up = classifier.prob_up(&window)?;

        let policy = self.artifacts.load_policy(ticker)?;
        let mut observation: Vec<f64> = window.iter().copied().collect();
        observation.push(prob_up);
        let action = policy.act(&Array1::from(observation))?;

        let signal = config.thresholds.classify(Some(prob_up));
        let ppo_signal = policy_signal(action);
        info!(
            "[{}] ProbUp={:.4} Signal={} PPO={} ({})",
            ticker, prob_up, signal, action, ppo_signal
        );

        let last = |name: &str| frame.last_value(name);
        let record = SignalRecord {
            date: today,
            ticker: ticker.to_string(),
            prob_up: round_to(prob_up, 6),
            action,
            signal,
            price: finite_rounded(last("Close"), 2),
            change_pct: finite_rounded(last("Return").map(|r| r * 100.0), 2),
            volume: last("Volume")
                .filter(|v| v.is_finite())
                .map(|v| v.round() as i64),
            vol_norm: finite_rounded(last("Vol_norm"), 3),
        };
        let diagnostic = DiagnosticRecord {
            date: today,
            ticker: ticker.to_string(),
            ppo_action: action,
            ppo_signal,
            prob_up: round_to(prob_up, 6),
        };
        Ok(TickerPrediction {
            signal: record,
            diagnostic,
        })
    }

    /// Runs every ticker in order. A failing ticker is logged and skipped.
    pub fn run(&self, today: NaiveDate, tickers: &[String]) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        let pb = ProgressBar::new(tickers.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        for ticker in tickers {
            pb.set_message(ticker.clone());
            match self.process_ticker(ticker, today) {
                Ok(prediction) => {
                    outcome.signals.push(prediction.signal);
                    outcome.diagnostics.push(prediction.diagnostic);
                }
                Err(err) => {
                    error!("[{}] Skipping ticker: {:?}", ticker, err);
                    outcome.failures.push((ticker.clone(), format!("{:#}", err)));
                }
            }
            pb.inc(1);
        }

        if outcome.failures.is_empty() {
            pb.finish_with_message("done");
        } else {
            pb.finish_with_message("done with failures");
        }
        info!(
            "Run {} finished: {} processed, {} succeeded, {} failed{}",
            today,
            outcome.processed(),
            outcome.signals.len(),
            outcome.failures.len(),
            if outcome.failures.is_empty() {
                String::new()
            } else {
                format!(
                    " ({})",
                    outcome
                        .failures
                        .iter()
                        .map(|(ticker, _)| ticker.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
        );
        outcome
    }

    /// Merges the run's signals into the cumulative log and writes diagnostics.
    pub fn publish(&self, outcome: &RunOutcome, today: NaiveDate) -> Result<PublishedRun> {
        let store = SignalStore::new(self.config.signals_path());
        let signals_path = if outcome.signals.is_empty() {
            warn!("No tickers produced a signal; {} left untouched", store.path().display());
            None
        } else {
            store.merge(&outcome.signals)?;
            Some(store.path().to_path_buf())
        };
        let diagnostics_path = write_diagnostics(&self.config.logs_dir, today, &outcome.diagnostics);
        Ok(PublishedRun {
            signals_path,
            diagnostics_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_settings;
    use crate::market_data::RawPriceFrame;

    struct EmptySource;

    impl PriceSource for EmptySource {
        fn name(&self) -> &str {
            "empty"
        }

        fn fetch(&self, _: &str, _: NaiveDate, _: NaiveDate) -> Result<RawPriceFrame> {
            Ok(RawPriceFrame::default())
        }
    }

    fn predictor(dir: &std::path::Path) -> DailyPredictor {
        let mut settings = default_settings();
        settings.insert("PROJECT_DIR".into(), dir.display().to_string());
        settings.insert("START_DATE".into(), "2023-01-01".into());
        let config = PipelineConfig::from_settings_map(&settings).unwrap();
        let sentiment = SentimentCache::new(&config.cache_dir, None, None);
        let artifacts = ArtifactStore::new(&config.models_dir);
        DailyPredictor::new(config, Box::new(EmptySource), sentiment, artifacts)
    }

    #[test]
    fn fetch_window_is_bounded_by_start_date() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = predictor(dir.path());

        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let (start, end) = predictor.fetch_window(today);
        assert_eq!(start, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(end, today);

        let later = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let (start, _) = predictor.fetch_window(later);
        assert_eq!(start, later - Duration::days(700));
    }

    #[test]
    fn oversized_lookback_saturates_instead_of_overflowing() {
        let dir = tempfile::tempdir().unwrap();
        let mut predictor = predictor(dir.path());
        predictor.config.lookback_days = 1_000_000_000;

        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let (start, end) = predictor.fetch_window(today);
        assert_eq!(start, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(end, today);

        predictor.config.lookback_days = i64::MAX;
        assert_eq!(predictor.fetch_window(today).0, predictor.config.start_date);
    }

    #[test]
    fn failing_tickers_do_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = predictor(dir.path());
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let tickers = vec!["AAPL".to_string(), "MSFT".to_string()];
        let outcome = predictor.run(today, &tickers);
        assert!(outcome.signals.is_empty());
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.processed(), 2);
        assert!(outcome.failures[0].1.contains("AAPL"));

        let published = predictor.publish(&outcome, today).unwrap();
        assert!(published.signals_path.is_none());
        assert!(published.diagnostics_path.is_none());
        assert!(!predictor.config().signals_path().exists());
    }
}

use crate::artifacts::ArtifactStore;
use crate::config::{PipelineConfig, PriceSourceKind};
use crate::market_data::{CsvPriceSource, PriceSource, YahooPriceSource};
use crate::predictor::DailyPredictor;
use crate::sentiment::SentimentCache;
use crate::store::SignalStore;
use anyhow::Result;
use log::info;

/// Validated configuration plus factories for the components commands use.
#[derive(Debug, Clone)]
pub struct AppContext {
    config: PipelineConfig,
}

impl AppContext {
    pub fn initialize(config: PipelineConfig) -> Self {
        info!(
            "Project dir {} (models {}, logs {})",
            config.project_dir.display(),
            config.models_dir.display(),
            config.logs_dir.display()
        );
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn price_source(&self) -> Result<Box<dyn PriceSource>> {
        Ok(match self.config.price_source {
            PriceSourceKind::Yahoo => Box::new(YahooPriceSource::new(
                &self.config.yahoo_base_url,
                self.config.http_timeout,
            )?),
            PriceSourceKind::Csv => Box::new(CsvPriceSource::new(&self.config.price_data_dir)),
        })
    }

    pub fn sentiment_cache(&self) -> SentimentCache {
        SentimentCache::new(
            &self.config.cache_dir,
            self.config.news_csv.clone(),
            self.config.sentiment_scorer.build(),
        )
    }

    pub fn artifact_store(&self) -> ArtifactStore {
        ArtifactStore::new(&self.config.models_dir)
    }

    pub fn signal_store(&self) -> SignalStore {
        SignalStore::new(self.config.signals_path())
    }

    pub fn predictor(&self) -> Result<DailyPredictor> {
        Ok(DailyPredictor::new(
            self.config.clone(),
            self.price_source()?,
            self.sentiment_cache(),
            self.artifact_store(),
        ))
    }

    /// `requested` when given, else the configured tickers.
    pub fn tickers_or_default(&self, requested: &[String]) -> Vec<String> {
        if requested.is_empty() {
            self.config.tickers.clone()
        } else {
            requested.to_vec()
        }
    }
}

use crate::market_data::parse_loose_date;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub type DailySentiment = BTreeMap<NaiveDate, f64>;

const SENTIMENT_SNAPSHOT_VERSION: u32 = 1;
const HEADLINE_COLUMNS: [&str; 6] = ["headline", "Headlines", "News", "Title", "text", "Text"];
const COMPOUND_ALPHA: f64 = 15.0;
const NEGATION_SCALAR: f64 = -0.74;

/// Scores one headline in `[-1, 1]`.
pub trait PolarityScorer {
    fn score(&self, text: &str) -> f64;
}

/// Lexicon scorer with negation and intensifier handling, normalized the way
/// VADER's compound score is.
pub struct LexiconScorer {
    valence: HashMap<&'static str, f64>,
    intensifiers: HashMap<&'static str, f64>,
    negations: &'static [&'static str],
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl LexiconScorer {
    pub fn new() -> Self {
        let valence = [
            ("gain", 2.0),
            ("gains", 2.0),
            ("growth", 2.1),
            ("profit", 2.2),
            ("profits", 2.2),
            ("record", 1.2),
            ("rally", 2.0),
            ("rallies", 2.0),
            ("surge", 2.1),
            ("surges", 2.1),
            ("soar", 2.3),
            ("soars", 2.3),
            ("beat", 1.5),
            ("beats", 1.5),
            ("strong", 2.3),
            ("upgrade", 1.9),
            ("upgraded", 1.9),
            ("bullish", 2.4),
            ("boost", 1.7),
            ("boosts", 1.7),
            ("rise", 1.4),
            ("rises", 1.4),
            ("win", 2.8),
            ("wins", 2.7),
            ("success", 2.7),
            ("good", 1.9),
            ("great", 3.1),
            ("peace", 2.5),
            ("agreement", 1.5),
            ("recovery", 1.8),
            ("optimism", 2.3),
            ("approve", 1.8),
            ("approved", 1.8),
            ("loss", -1.3),
            ("losses", -1.6),
            ("fall", -1.2),
            ("falls", -1.2),
            ("drop", -1.1),
            ("drops", -1.1),
            ("plunge", -2.3),
            ("plunges", -2.3),
            ("crash", -2.9),
            ("crisis", -3.1),
            ("slump", -2.0),
            ("weak", -1.9),
            ("downgrade", -1.9),
            ("downgraded", -1.9),
            ("bearish", -2.4),
            ("miss", -1.3),
            ("misses", -1.3),
            ("fear", -2.2),
            ("fears", -2.2),
            ("war", -2.9),
            ("attack", -2.1),
            ("killed", -3.5),
            ("fraud", -2.8),
            ("lawsuit", -1.5),
            ("recession", -2.4),
            ("bankruptcy", -2.8),
            ("layoffs", -2.1),
            ("sanctions", -1.5),
            ("protest", -1.0),
            ("bad", -2.5),
            ("risk", -1.1),
        ]
        .into_iter()
        .collect();
        let intensifiers = [
            ("very", 0.293),
            ("extremely", 0.293),
            ("sharply", 0.293),
            ("hugely", 0.293),
            ("significantly", 0.293),
            ("slightly", -0.293),
            ("marginally", -0.293),
            ("somewhat", -0.293),
        ]
        .into_iter()
        .collect();

        Self {
            valence,
            intensifiers,
            negations: &["not", "no", "never", "without", "isn't", "wasn't", "don't", "doesn't", "didn't", "cannot", "nor"],
        }
    }
}

fn normalize_compound(sum: f64) -> f64 {
    let score = sum / (sum * sum + COMPOUND_ALPHA).sqrt();
    score.clamp(-1.0, 1.0)
}

impl PolarityScorer for LexiconScorer {
    fn score(&self, text: &str) -> f64 {
        let tokens: Vec<String> = text
            .split_whitespace()
            .map(|raw| {
                raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                    .to_lowercase()
            })
            .filter(|token| !token.is_empty())
            .collect();

        let mut sum = 0.0;
        for (idx, token) in tokens.iter().enumerate() {
            let Some(base) = self.valence.get(token.as_str()).copied() else {
                continue;
            };
            let mut valence = base;
            let lookback = idx.saturating_sub(3);
            for prior in &tokens[lookback..idx] {
                if let Some(boost) = self.intensifiers.get(prior.as_str()) {
                    valence += boost * valence.signum();
                }
                if self.negations.contains(&prior.as_str()) {
                    valence *= NEGATION_SCALAR;
                }
            }
            sum += valence;
        }

        if sum == 0.0 {
            0.0
        } else {
            normalize_compound(sum)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorerKind {
    Lexicon,
    /// No scorer available; every news date scores zero.
    Disabled,
}

impl ScorerKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lexicon" | "vader" => Ok(Self::Lexicon),
            "none" | "off" | "disabled" => Ok(Self::Disabled),
            other => Err(anyhow!(
                "SENTIMENT_SCORER must be lexicon or none (value: {})",
                other
            )),
        }
    }

    pub fn build(self) -> Option<Box<dyn PolarityScorer>> {
        match self {
            Self::Lexicon => Some(Box::new(LexiconScorer::new())),
            Self::Disabled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Headline {
    pub date: NaiveDate,
    pub text: String,
}

/// Reads dated headlines, detecting the headline column or joining every
/// non-date cell when none is present.
pub fn read_news_csv(path: &Path) -> Result<Vec<Headline>> {
    if !path.exists() {
        return Err(anyhow!("News CSV not found at: {}", path.display()));
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open news CSV {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .context("failed to read news CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let date_idx = headers
        .iter()
        .position(|h| h == "Date")
        .or_else(|| headers.iter().position(|h| h == "date"))
        .ok_or_else(|| anyhow!("News CSV must have a 'Date' column"))?;
    let headline_idx = HEADLINE_COLUMNS
        .iter()
        .find_map(|candidate| headers.iter().position(|h| h == candidate));

    let mut headlines = Vec::new();
    for record in reader.records() {
        let record = record.context("malformed news CSV row")?;
        let Some(date) = record.get(date_idx).and_then(parse_loose_date) else {
            continue;
        };
        let text = match headline_idx {
            Some(idx) => record.get(idx).unwrap_or_default().trim().to_string(),
            None => record
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != date_idx)
                .map(|(_, cell)| cell)
                .collect::<Vec<_>>()
                .join(". "),
        };
        if text.trim().is_empty() {
            continue;
        }
        headlines.push(Headline { date, text });
    }

    Ok(headlines)
}

/// Mean headline polarity per date; a missing scorer yields zero for every date.
pub fn compute_daily_sentiment(
    headlines: &[Headline],
    scorer: Option<&dyn PolarityScorer>,
) -> DailySentiment {
    let mut sums: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for headline in headlines {
        let score = scorer.map(|s| s.score(&headline.text)).unwrap_or(0.0);
        let entry = sums.entry(headline.date).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(date, (sum, count))| (date, sum / count as f64))
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct SentimentSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    ticker: String,
    entries: Vec<(NaiveDate, f64)>,
}

pub struct SentimentCache {
    cache_dir: PathBuf,
    news_csv: Option<PathBuf>,
    scorer: Option<Box<dyn PolarityScorer>>,
}

impl SentimentCache {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        news_csv: Option<PathBuf>,
        scorer: Option<Box<dyn PolarityScorer>>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            news_csv,
            scorer,
        }
    }

    pub fn cache_path(&self, ticker: &str) -> PathBuf {
        self.cache_dir.join(format!("sentiment_{}.bin", ticker))
    }

    /// Cached daily sentiment, computing and persisting it on a miss. Never
    /// fails: any problem degrades to an empty series.
    pub fn daily_sentiment(&self, ticker: &str) -> DailySentiment {
        let path = self.cache_path(ticker);
        if path.exists() {
            match load_snapshot(&path) {
                Ok(daily) => {
                    info!("[{}] Loaded sentiment cache ({} days)", ticker, daily.len());
                    return daily;
                }
                Err(err) => {
                    warn!(
                        "[{}] Failed loading sentiment cache, will recompute: {:#}",
                        ticker, err
                    );
                }
            }
        }
        self.compute_or_empty(ticker)
    }

    /// Recomputes the cache from the news file, ignoring any cached copy.
    pub fn refresh(&self, ticker: &str) -> DailySentiment {
        self.compute_or_empty(ticker)
    }

    fn compute_or_empty(&self, ticker: &str) -> DailySentiment {
        let Some(news_csv) = self.news_csv.as_deref().filter(|p| p.exists()) else {
            info!("[{}] News CSV not found; using zero sentiment.", ticker);
            return DailySentiment::new();
        };

        match self.compute_and_store(ticker, news_csv) {
            Ok(daily) => daily,
            Err(err) => {
                warn!(
                    "[{}] Error computing sentiment from news CSV: {:#}. Using zeros.",
                    ticker, err
                );
                DailySentiment::new()
            }
        }
    }

    fn compute_and_store(&self, ticker: &str, news_csv: &Path) -> Result<DailySentiment> {
        let headlines = read_news_csv(news_csv)?;
        if self.scorer.is_none() {
            warn!("[{}] Sentiment scorer disabled; news dates score zero.", ticker);
        }
        let daily = compute_daily_sentiment(&headlines, self.scorer.as_deref());
        let path = self.cache_path(ticker);
        save_snapshot(&path, ticker, &daily)?;
        info!(
            "[{}] Computed & cached sentiment to {} ({} days)",
            ticker,
            path.display(),
            daily.len()
        );
        Ok(daily)
    }
}

fn load_snapshot(path: &Path) -> Result<DailySentiment> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open sentiment cache at {}", path.display()))?;
    let snapshot: SentimentSnapshot = bincode::deserialize_from(BufReader::new(file))
        .context("Sentiment cache decode failed")?;
    if snapshot.version != SENTIMENT_SNAPSHOT_VERSION {
        return Err(anyhow!(
            "Sentiment cache version mismatch (found {}, expected {})",
            snapshot.version,
            SENTIMENT_SNAPSHOT_VERSION
        ));
    }
    Ok(snapshot.entries.into_iter().collect())
}

fn save_snapshot(path: &Path, ticker: &str, daily: &DailySentiment) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory {}", parent.display())
            })?;
        }
    }
    let file = File::create(path)
        .with_context(|| format!("Unable to create sentiment cache at {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let snapshot = SentimentSnapshot {
        version: SENTIMENT_SNAPSHOT_VERSION,
        generated_at: Utc::now(),
        ticker: ticker.to_string(),
        entries: daily.iter().map(|(d, s)| (*d, *s)).collect(),
    };
    bincode::serialize_into(&mut writer, &snapshot)
        .context("Failed to serialize sentiment cache")?;
    writer
        .flush()
        .context("Failed to flush sentiment cache to disk")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct FixedScorer(f64);

    impl PolarityScorer for FixedScorer {
        fn score(&self, _text: &str) -> f64 {
            self.0
        }
    }

    #[test]
    fn lexicon_scores_direction_and_bounds() {
        let scorer = LexiconScorer::new();
        assert!(scorer.score("Shares surge after strong earnings beat") > 0.5);
        assert!(scorer.score("Markets plunge as recession fears grow") < -0.5);
        assert_eq!(scorer.score("The committee met on Tuesday"), 0.0);
        let extreme = "great great great great great great great great great great";
        assert!(scorer.score(extreme) <= 1.0);
    }

    #[test]
    fn negation_flips_polarity() {
        let scorer = LexiconScorer::new();
        assert!(scorer.score("growth") > 0.0);
        assert!(scorer.score("no growth") < 0.0);
    }

    #[test]
    fn reads_named_headline_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.csv");
        fs::write(&path, "date,Title,Source\n2024-01-02,Stocks rally,wire\n2024-01-02,,wire\n").unwrap();
        let headlines = read_news_csv(&path).unwrap();
        assert_eq!(
            headlines,
            vec![Headline {
                date: date(2024, 1, 2),
                text: "Stocks rally".to_string()
            }]
        );
    }

    #[test]
    fn synthesizes_headline_from_other_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.csv");
        fs::write(&path, "Date,Label,Top1,Top2\n2016-07-01,1,First story,Second story\n").unwrap();
        let headlines = read_news_csv(&path).unwrap();
        assert_eq!(headlines[0].text, "1. First story. Second story");
    }

    #[test]
    fn news_without_date_column_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news.csv");
        fs::write(&path, "when,headline\n2024-01-02,x\n").unwrap();
        assert!(read_news_csv(&path).is_err());
    }

    #[test]
    fn daily_sentiment_averages_per_date() {
        let headlines = vec![
            Headline { date: date(2024, 1, 2), text: "a".into() },
            Headline { date: date(2024, 1, 2), text: "b".into() },
            Headline { date: date(2024, 1, 3), text: "c".into() },
        ];
        let scorer = FixedScorer(0.5);
        let daily = compute_daily_sentiment(&headlines, Some(&scorer as &dyn PolarityScorer));
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[&date(2024, 1, 2)], 0.5);

        let zeros = compute_daily_sentiment(&headlines, None);
        assert!(zeros.values().all(|v| *v == 0.0));
    }

    #[test]
    fn cache_round_trips_and_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let news = dir.path().join("news.csv");
        fs::write(&news, "Date,headline\n2024-01-02,x\n2024-01-03,y\n").unwrap();

        let cache = SentimentCache::new(
            dir.path().join("cache"),
            Some(news.clone()),
            Some(Box::new(FixedScorer(0.25))),
        );
        let first = cache.daily_sentiment("AAPL");
        assert_eq!(first.len(), 2);
        assert!(cache.cache_path("AAPL").exists());

        fs::remove_file(&news).unwrap();
        let second = cache.daily_sentiment("AAPL");
        assert_eq!(first, second);
    }

    #[test]
    fn missing_news_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SentimentCache::new(
            dir.path(),
            Some(dir.path().join("absent.csv")),
            Some(Box::new(LexiconScorer::new())),
        );
        assert!(cache.daily_sentiment("MSFT").is_empty());
        assert!(!cache.cache_path("MSFT").exists());
    }

    #[test]
    fn corrupt_cache_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let news = dir.path().join("news.csv");
        fs::write(&news, "Date,headline\n2024-01-02,x\n").unwrap();
        let cache = SentimentCache::new(dir.path(), Some(news), Some(Box::new(FixedScorer(1.0))));
        fs::write(cache.cache_path("AAPL"), b"not bincode").unwrap();

        let daily = cache.daily_sentiment("AAPL");
        assert_eq!(daily.get(&date(2024, 1, 2)), Some(&1.0));
    }

    #[test]
    fn scorer_kind_parses_aliases() {
        assert_eq!(ScorerKind::parse("VADER").unwrap(), ScorerKind::Lexicon);
        assert_eq!(ScorerKind::parse("none").unwrap(), ScorerKind::Disabled);
        assert!(ScorerKind::parse("bert").is_err());
    }
}

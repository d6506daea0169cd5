use anyhow::Result;
use chrono::{Duration, NaiveDate};
use daily_signals::artifacts::{ArtifactStore, WeightStore};
use daily_signals::config::{default_settings, PipelineConfig, DEFAULT_FEATURES};
use daily_signals::context::AppContext;
use daily_signals::error::{ArtifactKind, PipelineError};
use daily_signals::market_data::{PriceSource, RawPriceFrame};
use daily_signals::models::SignalAction;
use daily_signals::predictor::DailyPredictor;
use daily_signals::sentiment::{ScorerKind, SentimentCache};
use daily_signals::store::SignalStore;
use std::fs;
use std::path::Path;
use std::sync::Once;

const TOTAL_DAYS: usize = 600;
const SEQ_LEN: usize = 60;
const D_MODEL: usize = 8;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
}

fn synthetic_close(i: usize) -> f64 {
    let t = i as f64;
    100.0 + 10.0 * (t / 15.0).sin() + 0.05 * t
}

/// Daily bars ending the day before the run date, with provider-style headers.
struct SyntheticSource {
    last_day: NaiveDate,
}

impl PriceSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<RawPriceFrame> {
        let first_day = self.last_day - Duration::days(TOTAL_DAYS as i64 - 1);
        let mut frame = RawPriceFrame::default();
        let mut open = Vec::new();
        let mut high = Vec::new();
        let mut low = Vec::new();
        let mut close = Vec::new();
        let mut volume = Vec::new();

        for i in 0..TOTAL_DAYS {
            let date = first_day + Duration::days(i as i64);
            if date < start || date >= end {
                continue;
            }
            let c = synthetic_close(i);
            frame.dates.push(date);
            open.push(Some(c * 0.998));
            high.push(Some(c * 1.01));
            low.push(Some(c * 0.99));
            close.push(Some(c));
            volume.push(Some(1_000_000.0 + 100_000.0 * (i as f64 / 7.0).sin()));
        }

        frame.columns = vec![
            (format!("('Open', '{ticker}')"), open),
            (" high".to_string(), high),
            ("LOW".to_string(), low),
            (format!("Close_{ticker}"), close),
            (format!("{ticker}.Volume"), volume),
        ];
        Ok(frame)
    }
}

fn feature_names() -> Vec<String> {
    DEFAULT_FEATURES.iter().map(|name| name.to_string()).collect()
}

fn write_identity_scaler(models_dir: &Path, ticker: &str) -> Result<()> {
    fs::create_dir_all(models_dir)?;
    let scaler = serde_json::json!({
        "kind": "identity",
        "feature_names": feature_names(),
    });
    fs::write(
        models_dir.join(format!("scaler_{ticker}.json")),
        serde_json::to_string_pretty(&scaler)?,
    )?;
    Ok(())
}

/// A one-layer classifier with zero weights whose output bias yields `prob_up`.
fn write_constant_classifier(models_dir: &Path, ticker: &str, prob_up: f64) -> Result<()> {
    let n = DEFAULT_FEATURES.len();
    let d = D_MODEL;
    let ff = 2 * d;
    let half = d / 2;
    let mut store = WeightStore::new(models_dir);
    let mut put = |name: &str, shape: Vec<usize>, fill: f64| {
        let len = shape.iter().product();
        store.insert(name, shape, vec![fill; len]);
    };

    put("input_proj.weight", vec![d, n], 0.0);
    put("input_proj.bias", vec![d], 0.0);
    put("pos_emb", vec![1, SEQ_LEN, d], 0.0);
    put("encoder.layers.0.self_attn.in_proj_weight", vec![3 * d, d], 0.0);
    put("encoder.layers.0.self_attn.in_proj_bias", vec![3 * d], 0.0);
    put("encoder.layers.0.self_attn.out_proj.weight", vec![d, d], 0.0);
    put("encoder.layers.0.self_attn.out_proj.bias", vec![d], 0.0);
    put("encoder.layers.0.linear1.weight", vec![ff, d], 0.0);
    put("encoder.layers.0.linear1.bias", vec![ff], 0.0);
    put("encoder.layers.0.linear2.weight", vec![d, ff], 0.0);
    put("encoder.layers.0.linear2.bias", vec![d], 0.0);
    put("encoder.layers.0.norm1.weight", vec![d], 1.0);
    put("encoder.layers.0.norm1.bias", vec![d], 0.0);
    put("encoder.layers.0.norm2.weight", vec![d], 1.0);
    put("encoder.layers.0.norm2.bias", vec![d], 0.0);
    put("head.0.weight", vec![d], 1.0);
    put("head.0.bias", vec![d], 0.0);
    put("head.1.weight", vec![half, d], 0.0);
    put("head.1.bias", vec![half], 0.0);
    put("head.4.weight", vec![2, half], 0.0);
    store.insert("head.4.bias", vec![2], vec![0.0, (prob_up / (1.0 - prob_up)).ln()]);

    store.save(&models_dir.join(format!("transformer_best_{ticker}.safetensors")))
}

/// An actor whose action bias always selects `action`.
fn write_constant_policy(models_dir: &Path, ticker: &str, action: usize) -> Result<()> {
    let observation = SEQ_LEN * DEFAULT_FEATURES.len() + 1;
    let mut store = WeightStore::new(models_dir);
    store.insert(
        "mlp_extractor.policy_net.0.weight",
        vec![16, observation],
        vec![0.0; 16 * observation],
    );
    store.insert("mlp_extractor.policy_net.0.bias", vec![16], vec![0.0; 16]);
    store.insert("action_net.weight", vec![3, 16], vec![0.0; 48]);
    let mut bias = vec![0.0; 3];
    bias[action] = 1.0;
    store.insert("action_net.bias", vec![3], bias);
    store.set_metadata("activation", "tanh");

    store.save(
        &models_dir
            .join("ppo_saved_models")
            .join(format!("ppo_agent_{ticker}.safetensors")),
    )
}

fn write_artifacts(models_dir: &Path, ticker: &str, prob_up: f64, action: usize) -> Result<()> {
    write_identity_scaler(models_dir, ticker)?;
    write_constant_classifier(models_dir, ticker, prob_up)?;
    write_constant_policy(models_dir, ticker, action)
}

fn test_config(project_dir: &Path, tickers: &str) -> Result<PipelineConfig> {
    let mut settings = default_settings();
    settings.insert("PROJECT_DIR".into(), project_dir.display().to_string());
    settings.insert("TICKERS".into(), tickers.into());
    settings.insert("NEWS_CSV".into(), "none".into());
    PipelineConfig::from_settings_map(&settings)
}

fn predictor_for(config: &PipelineConfig, scorer: ScorerKind) -> DailyPredictor {
    DailyPredictor::new(
        config.clone(),
        Box::new(SyntheticSource {
            last_day: run_date() - Duration::days(1),
        }),
        SentimentCache::new(&config.cache_dir, config.news_csv.clone(), scorer.build()),
        ArtifactStore::new(&config.models_dir),
    )
}

#[test]
fn daily_run_produces_buy_signal() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path(), "AAPL")?;
    write_artifacts(&config.models_dir, "AAPL", 0.6, 2)?;

    let predictor = predictor_for(&config, ScorerKind::Lexicon);
    let today = run_date();
    let outcome = predictor.run(today, &config.tickers);
    assert!(outcome.failures.is_empty(), "failures: {:?}", outcome.failures);
    assert_eq!(outcome.signals.len(), 1);

    let signal = &outcome.signals[0];
    assert_eq!(signal.date, today);
    assert_eq!(signal.ticker, "AAPL");
    assert_eq!(signal.signal, SignalAction::Buy);
    assert!((signal.prob_up - 0.6).abs() < 1e-6);
    assert_eq!(signal.action, 2);

    let last_close = synthetic_close(TOTAL_DAYS - 1);
    let expected_price = (last_close * 100.0).round() / 100.0;
    assert!((signal.price.unwrap() - expected_price).abs() < 1e-9);
    let expected_change = (last_close / synthetic_close(TOTAL_DAYS - 2) - 1.0) * 100.0;
    assert!((signal.change_pct.unwrap() - expected_change).abs() < 0.01);
    assert!(signal.volume.unwrap() > 0);
    assert!(signal.vol_norm.unwrap() > 0.0);

    let diagnostic = &outcome.diagnostics[0];
    assert_eq!(diagnostic.ppo_action, 2);
    assert_eq!(diagnostic.ppo_signal, SignalAction::Sell);

    let published = predictor.publish(&outcome, today)?;
    let signals_path = published.signals_path.expect("signal log written");
    let text = fs::read_to_string(&signals_path)?;
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("Date,Ticker,ProbUp,Action,Signal,Price,ChangePct,Volume,Vol_norm")
    );
    assert!(lines.next().unwrap().starts_with("2024-06-03,AAPL,0.6,2,BUY,"));

    let diagnostics_path = published.diagnostics_path.expect("diagnostics written");
    assert!(diagnostics_path.ends_with("ppo_2024-06-03.csv"));
    let diagnostics = fs::read_to_string(diagnostics_path)?;
    assert!(diagnostics.contains("2024-06-03,AAPL,2,SELL,0.6"));
    Ok(())
}

#[test]
fn rerunning_a_day_replaces_its_rows() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path(), "AAPL")?;
    let today = run_date();

    write_artifacts(&config.models_dir, "AAPL", 0.6, 1)?;
    let predictor = predictor_for(&config, ScorerKind::Disabled);
    predictor.publish(&predictor.run(today, &config.tickers), today)?;

    write_artifacts(&config.models_dir, "AAPL", 0.3, 1)?;
    let predictor = predictor_for(&config, ScorerKind::Disabled);
    predictor.publish(&predictor.run(today, &config.tickers), today)?;

    let rows = SignalStore::new(config.signals_path()).load()?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].signal, SignalAction::Sell);
    assert!((rows[0].prob_up - 0.3).abs() < 1e-6);
    Ok(())
}

#[test]
fn missing_artifacts_only_skip_that_ticker() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path(), "MSFT,AAPL")?;
    write_artifacts(&config.models_dir, "AAPL", 0.47, 0)?;
    write_identity_scaler(&config.models_dir, "MSFT")?;

    let predictor = predictor_for(&config, ScorerKind::Disabled);
    let outcome = predictor.run(run_date(), &config.tickers);

    assert_eq!(outcome.signals.len(), 1);
    assert_eq!(outcome.signals[0].ticker, "AAPL");
    assert_eq!(outcome.signals[0].signal, SignalAction::Hold);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].0, "MSFT");

    let err = predictor
        .process_ticker("MSFT", run_date())
        .expect_err("classifier is missing");
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::ArtifactNotFound { kind, .. }) => {
            assert_eq!(*kind, ArtifactKind::Classifier)
        }
        other => panic!("unexpected error {other:?}"),
    }
    Ok(())
}

#[test]
fn short_history_is_reported() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let mut settings = default_settings();
    settings.insert("PROJECT_DIR".into(), dir.path().display().to_string());
    settings.insert("NEWS_CSV".into(), "none".into());
    settings.insert("LOOKBACK_DAYS".into(), "100".into());
    let config = PipelineConfig::from_settings_map(&settings)?;
    write_artifacts(&config.models_dir, "AAPL", 0.6, 1)?;

    let predictor = predictor_for(&config, ScorerKind::Disabled);
    let err = predictor
        .process_ticker("AAPL", run_date())
        .expect_err("100 days cannot fill a 60-row window after warm-up");
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::InsufficientHistory { required: 60, .. })
    ));
    Ok(())
}

#[test]
fn news_file_feeds_the_sentiment_cache() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let news = dir.path().join("news.csv");
    fs::write(
        &news,
        "Date,Label,Top1,Top2\n\
         2024-05-30,1,Stocks surge to record gains,Strong earnings lift markets\n\
         2024-05-31,0,Markets fall on weak outlook,Investors fear losses\n",
    )?;

    let mut settings = default_settings();
    settings.insert("PROJECT_DIR".into(), dir.path().display().to_string());
    settings.insert("TICKERS".into(), "AAPL".into());
    settings.insert("NEWS_CSV".into(), news.display().to_string());
    let config = PipelineConfig::from_settings_map(&settings)?;
    write_artifacts(&config.models_dir, "AAPL", 0.6, 1)?;

    let app = AppContext::initialize(config.clone());
    let cache = app.sentiment_cache();
    let daily = cache.daily_sentiment("AAPL");
    assert_eq!(daily.len(), 2);
    assert!(cache.cache_path("AAPL").exists());

    let predictor = predictor_for(&config, ScorerKind::Lexicon);
    let outcome = predictor.run(run_date(), &config.tickers);
    assert!(outcome.failures.is_empty(), "failures: {:?}", outcome.failures);
    assert_eq!(outcome.signals[0].signal, SignalAction::Buy);
    Ok(())
}

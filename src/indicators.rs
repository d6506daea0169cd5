//! Technical indicators over daily candles.
//!
//! Every rolling series is trailing and non-centered. Positions without enough
//! history hold `NaN`; [`compute_indicators`] drops those rows so the returned
//! frame is fully populated.

use crate::frame::FeatureFrame;
use crate::models::Candle;
use anyhow::Result;
use statrs::statistics::Statistics;

pub const RSI_PERIOD: usize = 14;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_STD: f64 = 2.0;
pub const VOLUME_NORM_PERIOD: usize = 20;
pub const LONGEST_WINDOW: usize = 50;

/// Rows lost at the head of a well-formed series (the SMA_50 warm-up).
pub const WARMUP_ROWS: usize = LONGEST_WINDOW - 1;

fn rolling_apply<F>(values: &[f64], window: usize, reducer: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 {
        return out;
    }
    for end in (window - 1)..values.len() {
        let slice = &values[end + 1 - window..=end];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        out[end] = reducer(slice);
    }
    out
}

pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    rolling_apply(values, window, |slice| {
        slice.iter().sum::<f64>() / slice.len() as f64
    })
}

pub fn rolling_sum(values: &[f64], window: usize) -> Vec<f64> {
    rolling_apply(values, window, |slice| slice.iter().sum::<f64>())
}

/// Sample (n-1) standard deviation over a trailing window.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    rolling_apply(values, window, |slice| slice.std_dev())
}

/// Exponential mean with `alpha = 2 / (span + 1)`, seeded with the first
/// value and without bias adjustment.
pub fn exponential_mean(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    values
        .iter()
        .scan(None::<f64>, |state, &value| {
            let next = state.map_or(value, |prev| prev + alpha * (value - prev));
            *state = Some(next);
            Some(next)
        })
        .collect()
}

/// MACD line, its signal line and the histogram between them.
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(closes: &[f64], fast_span: usize, slow_span: usize, signal_span: usize) -> Macd {
    let line: Vec<f64> = exponential_mean(closes, fast_span)
        .into_iter()
        .zip(exponential_mean(closes, slow_span))
        .map(|(fast, slow)| fast - slow)
        .collect();
    let signal = exponential_mean(&line, signal_span);
    let histogram = line.iter().zip(&signal).map(|(l, s)| l - s).collect();
    Macd {
        line,
        signal,
        histogram,
    }
}

pub fn diff(values: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 1..values.len() {
        out[i] = values[i] - values[i - 1];
    }
    out
}

pub fn pct_change(values: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 1..values.len() {
        out[i] = values[i] / values[i - 1] - 1.0;
    }
    out
}

pub fn shift(values: &[f64], periods: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in periods..values.len() {
        out[i] = values[i - periods];
    }
    out
}

fn ratio(numerator: &[f64], denominator: &[f64]) -> Vec<f64> {
    numerator
        .iter()
        .zip(denominator)
        .map(|(n, d)| if *d == 0.0 { f64::NAN } else { n / d })
        .collect()
}

pub(crate) fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// RSI from simple trailing means of gains and losses.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let deltas = diff(prices);
    let gains: Vec<f64> = deltas
        .iter()
        .map(|d| if d.is_nan() { f64::NAN } else { d.max(0.0) })
        .collect();
    let losses: Vec<f64> = deltas
        .iter()
        .map(|d| if d.is_nan() { f64::NAN } else { (-d).max(0.0) })
        .collect();
    let avg_gain = rolling_mean(&gains, period);
    let avg_loss = rolling_mean(&losses, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(gain, loss)| {
            if gain.is_nan() || loss.is_nan() {
                f64::NAN
            } else {
                rsi_from_avgs(*gain, *loss)
            }
        })
        .collect()
}

pub fn calculate_bollinger_bands(
    prices: &[f64],
    period: usize,
    std_dev: f64,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let middle = rolling_mean(prices, period);
    let deviation = rolling_std(prices, period);
    let upper = middle
        .iter()
        .zip(&deviation)
        .map(|(mid, dev)| mid + std_dev * dev)
        .collect();
    let lower = middle
        .iter()
        .zip(&deviation)
        .map(|(mid, dev)| mid - std_dev * dev)
        .collect();
    (upper, middle, lower)
}

/// Builds the full indicator frame for one ticker and drops rows that are not
/// fully populated.
pub fn compute_indicators(candles: &[Candle]) -> Result<FeatureFrame> {
    let mut frame = FeatureFrame::new(candles.iter().map(|c| c.date).collect());

    let opens: Vec<f64> = candles.iter().map(|c| c.open).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let log_closes: Vec<f64> = closes.iter().map(|c| c.ln()).collect();
    let log_returns = diff(&log_closes);

    let sma_20 = rolling_mean(&closes, 20);
    let sma_50 = rolling_mean(&closes, LONGEST_WINDOW);
    let macd_series = macd(&closes, 12, 26, 9);
    let (bb_upper, bb_middle, bb_lower) =
        calculate_bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_STD);
    let bb_spread: Vec<f64> = bb_upper.iter().zip(&bb_lower).map(|(u, l)| u - l).collect();
    let hl_spread: Vec<f64> = highs.iter().zip(&lows).map(|(h, l)| h - l).collect();
    let volume_ma = rolling_mean(&volumes, VOLUME_NORM_PERIOD);

    frame.set_column("Return", pct_change(&closes))?;
    frame.set_column("LogRet", log_returns.clone())?;
    frame.set_column("SMA_10", rolling_mean(&closes, 10))?;
    frame.set_column("SMA_20", sma_20.clone())?;
    frame.set_column("SMA_50", sma_50.clone())?;
    frame.set_column("EMA_12", exponential_mean(&closes, 12))?;
    frame.set_column("EMA_26", exponential_mean(&closes, 26))?;
    frame.set_column("MACD", macd_series.line)?;
    frame.set_column("MACD_Signal", macd_series.signal.clone())?;
    frame.set_column("MACD_Hist", macd_series.histogram.clone())?;
    frame.set_column("MACD_S", macd_series.signal)?;
    frame.set_column("MACD_H", macd_series.histogram)?;
    frame.set_column("RSI_14", calculate_rsi(&closes, RSI_PERIOD))?;
    frame.set_column("BB_Middle", bb_middle.clone())?;
    frame.set_column("BB_Upper", bb_upper)?;
    frame.set_column("BB_Lower", bb_lower)?;
    frame.set_column("BB_Width", ratio(&bb_spread, &bb_middle))?;
    frame.set_column("HL_Range", ratio(&hl_spread, &closes))?;
    frame.set_column("Volume_Change", pct_change(&volumes))?;
    frame.set_column("LogRet_1d", shift(&log_returns, 1))?;
    frame.set_column("LogRet_5d", rolling_sum(&log_returns, 5))?;
    frame.set_column("LogRet_10d", rolling_sum(&log_returns, 10))?;
    frame.set_column("Volatility_5d", rolling_std(&log_returns, 5))?;
    frame.set_column("Volatility_10d", rolling_std(&log_returns, 10))?;
    frame.set_column("Vol_norm", ratio(&volumes, &volume_ma))?;
    frame.set_column(
        "Price_vs_SMA20",
        ratio(&closes, &sma_20).iter().map(|r| r - 1.0).collect(),
    )?;
    frame.set_column(
        "Price_vs_SMA50",
        ratio(&closes, &sma_50).iter().map(|r| r - 1.0).collect(),
    )?;
    frame.set_column("Open", opens)?;
    frame.set_column("High", highs)?;
    frame.set_column("Low", lows)?;
    frame.set_column("Close", closes)?;
    frame.set_column("Volume", volumes)?;

    frame.drop_incomplete_rows();
    Ok(frame)
}

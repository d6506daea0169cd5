use crate::error::PipelineError;
use crate::frame::FeatureFrame;
use crate::sentiment::DailySentiment;
use anyhow::Result;
use ndarray::{s, Array2};

pub const SENTIMENT_COLUMN: &str = "Sentiment";

/// Adds the `Sentiment` column: exact date match, else the most recent earlier
/// score, else zero.
pub fn align_sentiment(mut frame: FeatureFrame, sentiment: &DailySentiment) -> Result<FeatureFrame> {
    let values = frame
        .dates()
        .iter()
        .map(|date| {
            sentiment
                .range(..=*date)
                .next_back()
                .map(|(_, score)| *score)
                .unwrap_or(0.0)
        })
        .collect();
    frame.set_column(SENTIMENT_COLUMN, values)?;
    Ok(frame)
}

pub fn require_features(ticker: &str, frame: &FeatureFrame, columns: &[String]) -> Result<()> {
    let missing: Vec<String> = columns
        .iter()
        .filter(|name| !frame.has_column(name))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::MissingFeature {
            ticker: ticker.to_string(),
            missing,
        }
        .into())
    }
}

/// Rows × configured columns, in configured order.
pub fn feature_matrix(ticker: &str, frame: &FeatureFrame, columns: &[String]) -> Result<Array2<f64>> {
    require_features(ticker, frame, columns)?;
    let mut matrix = Array2::<f64>::zeros((frame.len(), columns.len()));
    for (col_idx, name) in columns.iter().enumerate() {
        if let Some(values) = frame.column(name) {
            for (row_idx, value) in values.iter().enumerate() {
                matrix[[row_idx, col_idx]] = *value;
            }
        }
    }
    Ok(matrix)
}

/// The trailing `seq_len` rows of `matrix`.
pub fn make_window(matrix: &Array2<f64>, seq_len: usize) -> Result<Array2<f64>> {
    let rows = matrix.nrows();
    if seq_len == 0 || rows < seq_len {
        return Err(PipelineError::InsufficientHistory {
            rows,
            required: seq_len,
        }
        .into());
    }
    Ok(matrix.slice(s![rows - seq_len.., ..]).to_owned())
}

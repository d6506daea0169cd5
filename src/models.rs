use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Hold => "HOLD",
        }
    }

    /// Maps a policy action code; unknown codes hold.
    pub fn from_policy_code(code: i64) -> Self {
        match code {
            1 => SignalAction::Buy,
            2 => SignalAction::Sell,
            _ => SignalAction::Hold,
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(SignalAction::Buy),
            "sell" => Ok(SignalAction::Sell),
            "hold" => Ok(SignalAction::Hold),
            other => Err(anyhow!("Unknown signal action '{}'", other)),
        }
    }
}

/// One row of the cumulative signal log, keyed by (date, ticker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Ticker")]
    pub ticker: String,
    #[serde(rename = "ProbUp")]
    pub prob_up: f64,
    #[serde(rename = "Action")]
    pub action: i64,
    #[serde(rename = "Signal")]
    pub signal: SignalAction,
    #[serde(rename = "Price")]
    pub price: Option<f64>,
    #[serde(rename = "ChangePct")]
    pub change_pct: Option<f64>,
    #[serde(rename = "Volume", default, deserialize_with = "lenient_volume")]
    pub volume: Option<i64>,
    #[serde(rename = "Vol_norm")]
    pub vol_norm: Option<f64>,
}

/// Per-run policy output, written to the dated diagnostics file only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Ticker")]
    pub ticker: String,
    #[serde(rename = "PPO_Action")]
    pub ppo_action: i64,
    #[serde(rename = "PPO_Signal")]
    pub ppo_signal: SignalAction,
    #[serde(rename = "ProbUp")]
    pub prob_up: f64,
}

/// Accepts `2000`, `2000.0` or an empty cell.
fn lenient_volume<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|v| v.is_finite()).map(|v| v.round() as i64))
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Keeps a value only when it is finite, rounded for the signal log.
pub fn finite_rounded(value: Option<f64>, decimals: i32) -> Option<f64> {
    value
        .filter(|v| v.is_finite())
        .map(|v| round_to(v, decimals))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_codes_map_to_actions() {
        assert_eq!(SignalAction::from_policy_code(0), SignalAction::Hold);
        assert_eq!(SignalAction::from_policy_code(1), SignalAction::Buy);
        assert_eq!(SignalAction::from_policy_code(2), SignalAction::Sell);
        assert_eq!(SignalAction::from_policy_code(7), SignalAction::Hold);
        assert_eq!(SignalAction::from_policy_code(-1), SignalAction::Hold);
    }

    #[test]
    fn parses_actions_case_insensitively() {
        assert_eq!("buy".parse::<SignalAction>().unwrap(), SignalAction::Buy);
        assert_eq!(" SELL ".parse::<SignalAction>().unwrap(), SignalAction::Sell);
        assert!("maybe".parse::<SignalAction>().is_err());
    }

    #[test]
    fn rounding_drops_non_finite_values() {
        assert_eq!(finite_rounded(Some(1.23456), 2), Some(1.23));
        assert_eq!(finite_rounded(Some(f64::NAN), 2), None);
        assert_eq!(finite_rounded(None, 2), None);
    }
}

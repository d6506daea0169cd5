use crate::models::SignalAction;
use log::warn;

pub const DEFAULT_BUY_THRESHOLD: f64 = 0.50;
pub const DEFAULT_SELL_THRESHOLD: f64 = 0.45;

/// Probability cut-offs turning the classifier output into the primary signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalThresholds {
    pub buy: f64,
    pub sell: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            buy: DEFAULT_BUY_THRESHOLD,
            sell: DEFAULT_SELL_THRESHOLD,
        }
    }
}

impl SignalThresholds {
    /// BUY at or above `buy`, SELL strictly below `sell`, HOLD in between.
    /// Missing or non-finite probabilities hold.
    pub fn classify(&self, prob_up: Option<f64>) -> SignalAction {
        match prob_up {
            Some(p) if p.is_finite() => {
                if p >= self.buy {
                    SignalAction::Buy
                } else if p < self.sell {
                    SignalAction::Sell
                } else {
                    SignalAction::Hold
                }
            }
            Some(p) => {
                warn!("Non-finite probability {p}; holding");
                SignalAction::Hold
            }
            None => SignalAction::Hold,
        }
    }
}

pub fn prob_to_signal(prob_up: Option<f64>) -> SignalAction {
    SignalThresholds::default().classify(prob_up)
}

/// Advisory signal from the policy's discrete action.
pub fn policy_signal(action: i64) -> SignalAction {
    SignalAction::from_policy_code(action)
}

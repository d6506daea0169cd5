use super::layers::Linear;
use super::weights::WeightStore;
use crate::error::PipelineError;
use anyhow::Result;
use ndarray::Array1;
use std::path::PathBuf;

const POLICY_PREFIX: &str = "mlp_extractor.policy_net.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Tanh,
    Relu,
}

impl Activation {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tanh" => Some(Activation::Tanh),
            "relu" => Some(Activation::Relu),
            _ => None,
        }
    }

    fn apply(&self, x: &mut Array1<f64>) {
        match self {
            Activation::Tanh => x.mapv_inplace(f64::tanh),
            Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
        }
    }
}

/// Deterministic actor head of a pre-trained PPO agent.
#[derive(Debug, Clone)]
pub struct ActorPolicy {
    source: PathBuf,
    hidden: Vec<Linear>,
    activation: Activation,
    action_net: Linear,
}

impl ActorPolicy {
    pub fn from_weights(store: &WeightStore) -> Result<Self> {
        let invalid = |reason: String| PipelineError::invalid_artifact(store.source(), reason);

        let activation = match store.metadata("activation") {
            Some(name) => Activation::parse(name)
                .ok_or_else(|| invalid(format!("unsupported activation {name}")))?,
            None => Activation::Tanh,
        };

        // policy_net interleaves Linear and activation modules, so indices are sparse
        let mut indices: Vec<usize> = store
            .names()
            .filter_map(|name| name.strip_prefix(POLICY_PREFIX))
            .filter_map(|rest| rest.strip_suffix(".weight"))
            .filter_map(|index| index.parse().ok())
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let mut hidden = Vec::with_capacity(indices.len());
        for index in indices {
            let prefix = format!("{POLICY_PREFIX}{index}");
            let shape = &store.tensor(&format!("{prefix}.weight"))?.shape;
            let &[out_dim, in_dim] = shape.as_slice() else {
                return Err(invalid(format!("{prefix}.weight is not a matrix")).into());
            };
            if let Some(previous) = hidden.last().map(Linear::out_dim) {
                if previous != in_dim {
                    return Err(invalid(format!(
                        "{prefix} expects {in_dim} inputs but the previous layer emits {previous}"
                    ))
                    .into());
                }
            }
            hidden.push(Linear::load(store, &prefix, in_dim, out_dim)?);
        }

        let action_shape = &store.tensor("action_net.weight")?.shape;
        let &[actions, action_in] = action_shape.as_slice() else {
            return Err(invalid("action_net.weight is not a matrix".to_string()).into());
        };
        let expected_in = hidden.last().map(Linear::out_dim).unwrap_or(action_in);
        if expected_in != action_in {
            return Err(invalid(format!(
                "action_net expects {action_in} inputs but the policy network emits {expected_in}"
            ))
            .into());
        }

        Ok(Self {
            source: store.source().to_path_buf(),
            action_net: Linear::load(store, "action_net", action_in, actions)?,
            hidden,
            activation,
        })
    }

    pub fn observation_size(&self) -> usize {
        self.hidden
            .first()
            .map(Linear::in_dim)
            .unwrap_or_else(|| self.action_net.in_dim())
    }

    pub fn action_count(&self) -> usize {
        self.action_net.out_dim()
    }

    pub fn action_logits(&self, observation: &Array1<f64>) -> Result<Array1<f64>> {
        if observation.len() != self.observation_size() {
            return Err(PipelineError::invalid_artifact(
                &self.source,
                format!(
                    "observation has {} values, policy expects {}",
                    observation.len(),
                    self.observation_size()
                ),
            )
            .into());
        }
        let mut x = observation.clone();
        for layer in &self.hidden {
            x = layer.forward_vec(&x);
            self.activation.apply(&mut x);
        }
        Ok(self.action_net.forward_vec(&x))
    }

    /// Index of the highest logit; the first one wins ties.
    pub fn act(&self, observation: &Array1<f64>) -> Result<i64> {
        let logits = self.action_logits(observation)?;
        let mut best = 0;
        for (idx, value) in logits.iter().enumerate() {
            if *value > logits[best] {
                best = idx;
            }
        }
        Ok(best as i64)
    }
}

//! Per-ticker trained artifacts: the fitted scaler, the transformer
//! classifier and the PPO actor policy.

pub mod architecture;
pub mod classifier;
pub mod layers;
pub mod policy;
pub mod scaler;
pub mod weights;

pub use architecture::{infer_architecture, ArchitectureHints, ClassifierArchitecture};
pub use classifier::TransformerClassifier;
pub use policy::ActorPolicy;
pub use scaler::FittedScaler;
pub use weights::{WeightShapes, WeightStore};

use crate::error::{ArtifactKind, PipelineError};
use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const POLICY_SUBDIR: &str = "ppo_saved_models";

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactPresence {
    pub kind: &'static str,
    pub path: PathBuf,
    pub present: bool,
}

/// Resolves and loads artifacts under a single models directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    models_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn path_for(&self, kind: ArtifactKind, ticker: &str) -> PathBuf {
        match kind {
            ArtifactKind::Scaler => self.models_dir.join(format!("scaler_{ticker}.json")),
            ArtifactKind::Classifier => self
                .models_dir
                .join(format!("transformer_best_{ticker}.safetensors")),
            ArtifactKind::Policy => self
                .models_dir
                .join(POLICY_SUBDIR)
                .join(format!("ppo_agent_{ticker}.safetensors")),
        }
    }

    fn existing_path(&self, kind: ArtifactKind, ticker: &str) -> Result<PathBuf> {
        let path = self.path_for(kind, ticker);
        if !path.is_file() {
            return Err(PipelineError::ArtifactNotFound { kind, path }.into());
        }
        debug!("Loading {} artifact {}", kind, path.display());
        Ok(path)
    }

    pub fn load_scaler(&self, ticker: &str, features: &[String]) -> Result<FittedScaler> {
        let path = self.existing_path(ArtifactKind::Scaler, ticker)?;
        let scaler = FittedScaler::load(&path)?;
        scaler
            .ensure_compatible(features)
            .with_context(|| format!("scaler {} is incompatible", path.display()))?;
        Ok(scaler)
    }

    pub fn load_classifier_weights(&self, ticker: &str) -> Result<WeightStore> {
        let path = self.existing_path(ArtifactKind::Classifier, ticker)?;
        WeightStore::load(&path)
    }

    pub fn load_classifier(
        &self,
        ticker: &str,
        hints: &ArchitectureHints,
    ) -> Result<TransformerClassifier> {
        let weights = self.load_classifier_weights(ticker)?;
        TransformerClassifier::from_weights(&weights, hints)
    }

    pub fn load_policy(&self, ticker: &str) -> Result<ActorPolicy> {
        let path = self.existing_path(ArtifactKind::Policy, ticker)?;
        ActorPolicy::from_weights(&WeightStore::load(&path)?)
    }

    pub fn presence(&self, ticker: &str) -> Vec<ArtifactPresence> {
        [
            ArtifactKind::Scaler,
            ArtifactKind::Classifier,
            ArtifactKind::Policy,
        ]
        .into_iter()
        .map(|kind| {
            let path = self.path_for(kind, ticker);
            ArtifactPresence {
                kind: kind.as_str(),
                present: path.is_file(),
                path,
            }
        })
        .collect()
    }
}

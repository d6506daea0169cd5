use crate::artifacts::{infer_architecture, ArchitectureHints};
use crate::context::AppContext;
use anyhow::Result;

/// Prints the classifier architecture inferred from the stored weight shapes.
pub fn run(app: &AppContext, ticker: &str) -> Result<()> {
    let config = app.config();
    let weights = app.artifact_store().load_classifier_weights(ticker)?;
    let hints = ArchitectureHints {
        n_features: config.features.len(),
        seq_len: config.seq_len,
        num_heads: config.num_heads,
    };
    let architecture = infer_architecture(&weights.shapes(), &hints);

    println!("{}", weights.source().display());
    println!("{}", serde_json::to_string_pretty(&architecture)?);
    if architecture.n_features != config.features.len() {
        println!(
            "warning: classifier expects {} features, {} are configured",
            architecture.n_features,
            config.features.len()
        );
    }
    println!("{} tensors", weights.len());
    Ok(())
}

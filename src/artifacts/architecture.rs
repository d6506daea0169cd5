use super::weights::WeightShapes;
use serde::Serialize;

pub const DEFAULT_D_MODEL: usize = 128;
pub const DEFAULT_NUM_LAYERS: usize = 2;
const FALLBACK_HEADS: [usize; 4] = [8, 4, 2, 1];

/// Values used when a dimension cannot be read off the stored weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchitectureHints {
    pub n_features: usize,
    pub seq_len: usize,
    pub num_heads: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassifierArchitecture {
    pub n_features: usize,
    pub d_model: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub dim_feedforward: usize,
    pub seq_len: usize,
}

impl ClassifierArchitecture {
    pub fn head_dim(&self) -> usize {
        self.d_model / self.num_heads
    }
}

/// Reconstructs classifier hyperparameters from tensor names and shapes.
pub fn infer_architecture(shapes: &WeightShapes, hints: &ArchitectureHints) -> ClassifierArchitecture {
    let input_proj = shapes.get("input_proj.weight");
    let pos_emb = shapes.get("pos_emb");

    let d_model = input_proj
        .and_then(|shape| shape.first().copied())
        .or_else(|| pos_emb.and_then(|shape| shape.last().copied()))
        .unwrap_or(DEFAULT_D_MODEL);

    let n_features = input_proj
        .and_then(|shape| shape.get(1).copied())
        .unwrap_or(hints.n_features);

    let seq_len = pos_emb
        .filter(|shape| shape.len() == 3)
        .map(|shape| shape[1])
        .unwrap_or(hints.seq_len);

    let num_layers = shapes
        .keys()
        .filter_map(|name| layer_index(name))
        .max()
        .map(|max| max + 1)
        .unwrap_or(DEFAULT_NUM_LAYERS);

    let dim_feedforward = shapes
        .get("encoder.layers.0.linear1.weight")
        .and_then(|shape| shape.first().copied())
        .unwrap_or(d_model * 2);

    ClassifierArchitecture {
        n_features,
        d_model,
        num_heads: choose_heads(d_model, hints.num_heads),
        num_layers,
        dim_feedforward,
        seq_len,
    }
}

fn choose_heads(d_model: usize, preferred: usize) -> usize {
    if preferred > 0 && d_model % preferred == 0 {
        return preferred;
    }
    FALLBACK_HEADS
        .iter()
        .copied()
        .find(|heads| d_model % heads == 0)
        .unwrap_or(1)
}

fn layer_index(name: &str) -> Option<usize> {
    let rest = name.strip_prefix("encoder.layers.")?;
    rest.split('.').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints() -> ArchitectureHints {
        ArchitectureHints {
            n_features: 27,
            seq_len: 60,
            num_heads: 4,
        }
    }

    fn shapes(entries: &[(&str, &[usize])]) -> WeightShapes {
        entries
            .iter()
            .map(|(name, shape)| (name.to_string(), shape.to_vec()))
            .collect()
    }

    #[test]
    fn reads_dimensions_from_weight_shapes() {
        let shapes = shapes(&[
            ("input_proj.weight", &[64, 27]),
            ("pos_emb", &[1, 30, 64]),
            ("encoder.layers.0.linear1.weight", &[256, 64]),
            ("encoder.layers.0.norm1.weight", &[64]),
            ("encoder.layers.2.linear1.weight", &[256, 64]),
        ]);
        let arch = infer_architecture(&shapes, &hints());
        assert_eq!(
            arch,
            ClassifierArchitecture {
                n_features: 27,
                d_model: 64,
                num_heads: 4,
                num_layers: 3,
                dim_feedforward: 256,
                seq_len: 30,
            }
        );
    }

    #[test]
    fn falls_back_to_defaults() {
        let arch = infer_architecture(&WeightShapes::new(), &hints());
        assert_eq!(arch.d_model, DEFAULT_D_MODEL);
        assert_eq!(arch.num_layers, DEFAULT_NUM_LAYERS);
        assert_eq!(arch.dim_feedforward, 2 * DEFAULT_D_MODEL);
        assert_eq!(arch.seq_len, 60);
        assert_eq!(arch.n_features, 27);
    }

    #[test]
    fn width_comes_from_positional_embedding_when_projection_is_absent() {
        let shapes = shapes(&[("pos_emb", &[1, 60, 96])]);
        assert_eq!(infer_architecture(&shapes, &hints()).d_model, 96);
    }

    #[test]
    fn head_count_must_divide_width() {
        assert_eq!(choose_heads(128, 4), 4);
        assert_eq!(choose_heads(24, 5), 8);
        assert_eq!(choose_heads(36, 8), 4);
        assert_eq!(choose_heads(10, 4), 2);
        assert_eq!(choose_heads(7, 0), 1);
    }
}

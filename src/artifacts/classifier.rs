use super::architecture::{infer_architecture, ArchitectureHints, ClassifierArchitecture};
use super::layers::{relu, softmax, softmax_2d, LayerNorm, Linear};
use super::weights::WeightStore;
use crate::error::PipelineError;
use anyhow::Result;
use ndarray::{s, Array2, Axis};
use std::path::PathBuf;

struct SelfAttention {
    in_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
}

impl SelfAttention {
    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        let d_model = self.out_proj.out_dim();
        let head_dim = d_model / self.num_heads;
        let scale = (head_dim as f64).sqrt();

        let qkv = self.in_proj.forward(x);
        let q = qkv.slice(s![.., 0..d_model]);
        let k = qkv.slice(s![.., d_model..2 * d_model]);
        let v = qkv.slice(s![.., 2 * d_model..3 * d_model]);

        let mut context = Array2::<f64>::zeros((x.nrows(), d_model));
        for head in 0..self.num_heads {
            let cols = head * head_dim..(head + 1) * head_dim;
            let qh = q.slice(s![.., cols.clone()]);
            let kh = k.slice(s![.., cols.clone()]);
            let vh = v.slice(s![.., cols.clone()]);

            let weights = softmax_2d(&(qh.dot(&kh.t()) / scale));
            context.slice_mut(s![.., cols]).assign(&weights.dot(&vh));
        }
        self.out_proj.forward(&context)
    }
}

struct EncoderLayer {
    attention: SelfAttention,
    linear1: Linear,
    linear2: Linear,
    norm1: LayerNorm,
    norm2: LayerNorm,
}

impl EncoderLayer {
    fn load(store: &WeightStore, index: usize, arch: &ClassifierArchitecture) -> Result<Self> {
        let prefix = format!("encoder.layers.{index}");
        let d = arch.d_model;
        Ok(Self {
            attention: SelfAttention {
                in_proj: Linear {
                    weight: store.matrix(&format!("{prefix}.self_attn.in_proj_weight"), 3 * d, d)?,
                    bias: store.vector(&format!("{prefix}.self_attn.in_proj_bias"), 3 * d)?,
                },
                out_proj: Linear::load(store, &format!("{prefix}.self_attn.out_proj"), d, d)?,
                num_heads: arch.num_heads,
            },
            linear1: Linear::load(store, &format!("{prefix}.linear1"), d, arch.dim_feedforward)?,
            linear2: Linear::load(store, &format!("{prefix}.linear2"), arch.dim_feedforward, d)?,
            norm1: LayerNorm::load(store, &format!("{prefix}.norm1"), d)?,
            norm2: LayerNorm::load(store, &format!("{prefix}.norm2"), d)?,
        })
    }

    /// Pre-norm block: `x + attn(norm1(x))`, then `x + ff(norm2(x))`.
    fn forward(&self, x: Array2<f64>) -> Array2<f64> {
        let x = &x + &self.attention.forward(&self.norm1.forward(&x));
        let mut hidden = self.linear1.forward(&self.norm2.forward(&x));
        relu(&mut hidden);
        &x + &self.linear2.forward(&hidden)
    }
}

/// Transformer encoder over a feature window, producing down/up logits.
pub struct TransformerClassifier {
    source: PathBuf,
    architecture: ClassifierArchitecture,
    input_proj: Linear,
    pos_emb: Array2<f64>,
    layers: Vec<EncoderLayer>,
    head_norm: LayerNorm,
    head_hidden: Linear,
    head_out: Linear,
}

impl TransformerClassifier {
    pub fn from_weights(store: &WeightStore, hints: &ArchitectureHints) -> Result<Self> {
        let arch = infer_architecture(&store.shapes(), hints);
        let d = arch.d_model;
        let hidden = d / 2;

        let pos_emb = store
            .array3("pos_emb", (1, arch.seq_len, d))?
            .index_axis_move(Axis(0), 0);

        let layers = (0..arch.num_layers)
            .map(|index| EncoderLayer::load(store, index, &arch))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            input_proj: Linear::load(store, "input_proj", arch.n_features, d)?,
            pos_emb,
            layers,
            head_norm: LayerNorm::load(store, "head.0", d)?,
            head_hidden: Linear::load(store, "head.1", d, hidden)?,
            head_out: Linear::load(store, "head.4", hidden, 2)?,
            architecture: arch,
            source: store.source().to_path_buf(),
        })
    }

    pub fn architecture(&self) -> &ClassifierArchitecture {
        &self.architecture
    }

    pub fn seq_len(&self) -> usize {
        self.architecture.seq_len
    }

    /// Two logits for the last time step of `window` (`[seq_len, n_features]`).
    pub fn logits(&self, window: &Array2<f64>) -> Result<[f64; 2]> {
        let arch = &self.architecture;
        if window.ncols() != arch.n_features || window.nrows() == 0 || window.nrows() > arch.seq_len
        {
            return Err(PipelineError::InvalidArtifact {
                path: self.source.clone(),
                reason: format!(
                    "window shape {:?} does not fit sequence length {} with {} features",
                    window.shape(),
                    arch.seq_len,
                    arch.n_features
                ),
            }
            .into());
        }

        let mut x = self.input_proj.forward(window);
        x += &self.pos_emb.slice(s![0..window.nrows(), ..]);
        for layer in &self.layers {
            x = layer.forward(x);
        }

        let last = x.slice(s![x.nrows() - 1..x.nrows(), ..]).to_owned();
        let mut hidden = self.head_hidden.forward(&self.head_norm.forward(&last));
        relu(&mut hidden);
        let out = self.head_out.forward(&hidden);
        Ok([out[[0, 0]], out[[0, 1]]])
    }

    pub fn prob_up(&self, window: &Array2<f64>) -> Result<f64> {
        let logits = self.logits(window)?;
        Ok(softmax(&logits)[1])
    }
}

use crate::error::PipelineError;
use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Array3};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

pub type WeightShapes = BTreeMap<String, Vec<usize>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

/// Named tensors read from a safetensors file, widened to f64.
#[derive(Debug, Clone, Default)]
pub struct WeightStore {
    source: PathBuf,
    tensors: BTreeMap<String, Tensor>,
    metadata: HashMap<String, String>,
}

impl WeightStore {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read weights {}", path.display()))?;
        Self::from_bytes(path, &bytes)
    }

    pub fn from_bytes(source: &Path, bytes: &[u8]) -> Result<Self> {
        let invalid = |reason: String| PipelineError::invalid_artifact(source, reason);

        let parsed = SafeTensors::deserialize(bytes).map_err(|err| invalid(format!("{err:?}")))?;
        let (_, header) =
            SafeTensors::read_metadata(bytes).map_err(|err| invalid(format!("{err:?}")))?;

        let mut store = WeightStore::new(source);
        if let Some(metadata) = header.metadata() {
            store.metadata = metadata.clone();
        }

        for (name, view) in parsed.tensors() {
            let data = decode(view.dtype(), view.data())
                .ok_or_else(|| invalid(format!("tensor {name} has unsupported dtype {:?}", view.dtype())))?;
            let expected: usize = view.shape().iter().product();
            if data.len() != expected {
                return Err(invalid(format!(
                    "tensor {name} holds {} values for shape {:?}",
                    data.len(),
                    view.shape()
                ))
                .into());
            }
            store.tensors.insert(
                name,
                Tensor {
                    shape: view.shape().to_vec(),
                    data,
                },
            );
        }
        Ok(store)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn shapes(&self) -> WeightShapes {
        self.tensors
            .iter()
            .map(|(name, tensor)| (name.clone(), tensor.shape.clone()))
            .collect()
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn insert(&mut self, name: impl Into<String>, shape: Vec<usize>, data: Vec<f64>) {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        self.tensors.insert(name.into(), Tensor { shape, data });
    }

    pub fn tensor(&self, name: &str) -> Result<&Tensor> {
        self.tensors.get(name).ok_or_else(|| {
            PipelineError::invalid_artifact(&self.source, format!("missing tensor {name}")).into()
        })
    }

    /// A 2-D tensor whose shape must equal `[rows, cols]`.
    pub fn matrix(&self, name: &str, rows: usize, cols: usize) -> Result<Array2<f64>> {
        let tensor = self.tensor(name)?;
        if tensor.shape != [rows, cols] {
            return Err(self.shape_error(name, &tensor.shape, &[rows, cols]));
        }
        Array2::from_shape_vec((rows, cols), tensor.data.clone())
            .map_err(|err| PipelineError::invalid_artifact(&self.source, err.to_string()).into())
    }

    pub fn array3(&self, name: &str, dims: (usize, usize, usize)) -> Result<Array3<f64>> {
        let tensor = self.tensor(name)?;
        if tensor.shape != [dims.0, dims.1, dims.2] {
            return Err(self.shape_error(name, &tensor.shape, &[dims.0, dims.1, dims.2]));
        }
        Array3::from_shape_vec(dims, tensor.data.clone())
            .map_err(|err| PipelineError::invalid_artifact(&self.source, err.to_string()).into())
    }

    pub fn vector(&self, name: &str, len: usize) -> Result<Array1<f64>> {
        let tensor = self.tensor(name)?;
        if tensor.shape != [len] {
            return Err(self.shape_error(name, &tensor.shape, &[len]));
        }
        Ok(Array1::from(tensor.data.clone()))
    }

    fn shape_error(&self, name: &str, actual: &[usize], expected: &[usize]) -> anyhow::Error {
        PipelineError::invalid_artifact(
            &self.source,
            format!("tensor {name} has shape {actual:?}, expected {expected:?}"),
        )
        .into()
    }

    /// Serializes every tensor as little-endian f32.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = self
            .tensors
            .iter()
            .map(|(name, tensor)| {
                let bytes = tensor
                    .data
                    .iter()
                    .flat_map(|value| (*value as f32).to_le_bytes())
                    .collect();
                (name.clone(), tensor.shape.clone(), bytes)
            })
            .collect();

        let views = buffers
            .iter()
            .map(|(name, shape, bytes)| {
                TensorView::new(Dtype::F32, shape.clone(), bytes).map(|view| (name.clone(), view))
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| anyhow::anyhow!("failed to build tensor view: {err:?}"))?;

        let metadata = if self.metadata.is_empty() {
            None
        } else {
            Some(self.metadata.clone())
        };
        safetensors::serialize(views, &metadata)
            .map_err(|err| anyhow::anyhow!("failed to serialize weights: {err:?}"))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, self.to_bytes()?)
            .with_context(|| format!("failed to write weights {}", path.display()))
    }
}

fn decode(dtype: Dtype, bytes: &[u8]) -> Option<Vec<f64>> {
    match dtype {
        Dtype::F32 => Some(
            bytes
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64)
                .collect(),
        ),
        Dtype::F64 => Some(
            bytes
                .chunks_exact(8)
                .map(|chunk| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(chunk);
                    f64::from_le_bytes(raw)
                })
                .collect(),
        ),
        _ => None,
    }
}

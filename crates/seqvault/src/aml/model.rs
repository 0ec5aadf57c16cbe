//! Denoising-autoencoder weight loading and inference.
//!
//! The weight file is a flat little-endian dump: magic `AMLN`, a `u32` layer
//! count, then per layer `u32 rows`, `u32 cols`, `rows*cols` weights
//! (row-major `f32`) and `rows` bias values. Hidden layers use ReLU; the
//! final layer applies a sigmoid so reconstructions stay in [0, 1].

use std::io::Read;
use std::path::Path;

use thiserror::Error;

const MAGIC: &[u8; 4] = b"AMLN";

/// Hard caps so a corrupt file cannot request absurd allocations.
const MAX_LAYERS: u32 = 16;
const MAX_DIM: u32 = 65_536;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to read model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model file has wrong magic bytes")]
    BadMagic,

    #[error("Malformed model file: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
struct Layer {
    rows: usize,
    cols: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct AutoencoderModel {
    layers: Vec<Layer>,
}

fn read_u32(reader: &mut impl Read) -> Result<u32, ModelError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32_vec(reader: &mut impl Read, len: usize) -> Result<Vec<f32>, ModelError> {
    let mut bytes = vec![0u8; len * 4];
    reader.read_exact(&mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

impl AutoencoderModel {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let file = std::fs::File::open(path)?;
        Self::read(std::io::BufReader::new(file))
    }

    pub fn read(mut reader: impl Read) -> Result<Self, ModelError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ModelError::BadMagic);
        }

        let layer_count = read_u32(&mut reader)?;
        if layer_count == 0 || layer_count > MAX_LAYERS {
            return Err(ModelError::Malformed(format!(
                "layer count {layer_count} out of range"
            )));
        }

        let mut layers = Vec::with_capacity(layer_count as usize);
        for i in 0..layer_count {
            let rows = read_u32(&mut reader)?;
            let cols = read_u32(&mut reader)?;
            if rows == 0 || cols == 0 || rows > MAX_DIM || cols > MAX_DIM {
                return Err(ModelError::Malformed(format!(
                    "layer {i} has shape {rows}x{cols}"
                )));
            }
            let weights = read_f32_vec(&mut reader, rows as usize * cols as usize)?;
            let bias = read_f32_vec(&mut reader, rows as usize)?;
            layers.push(Layer {
                rows: rows as usize,
                cols: cols as usize,
                weights,
                bias,
            });
        }

        for pair in layers.windows(2) {
            if pair[1].cols != pair[0].rows {
                return Err(ModelError::Malformed(
                    "layer dimensions do not chain".to_string(),
                ));
            }
        }
        let first = layers.first().expect("at least one layer");
        let last = layers.last().expect("at least one layer");
        if last.rows != first.cols {
            return Err(ModelError::Malformed(
                "output dimension does not match input dimension".to_string(),
            ));
        }

        Ok(Self { layers })
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].cols
    }

    /// Deterministic forward pass.
    pub fn reconstruct(&self, input: &[f32]) -> Vec<f32> {
        debug_assert_eq!(input.len(), self.input_dim());
        let mut activation = input.to_vec();
        let last = self.layers.len() - 1;

        for (i, layer) in self.layers.iter().enumerate() {
            let mut next = vec![0f32; layer.rows];
            for (r, out) in next.iter_mut().enumerate() {
                let row = &layer.weights[r * layer.cols..(r + 1) * layer.cols];
                let mut sum = layer.bias[r];
                for (w, x) in row.iter().zip(activation.iter()) {
                    sum += w * x;
                }
                *out = if i == last {
                    sigmoid(sum)
                } else {
                    sum.max(0.0)
                };
            }
            activation = next;
        }

        activation
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Serializes a model in the on-disk layout. Used by tests and tooling that
/// publishes calibrated weights.
pub fn write_model(
    writer: &mut impl std::io::Write,
    layers: &[(usize, usize, Vec<f32>, Vec<f32>)],
) -> std::io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&(layers.len() as u32).to_le_bytes())?;
    for (rows, cols, weights, bias) in layers {
        writer.write_all(&(*rows as u32).to_le_bytes())?;
        writer.write_all(&(*cols as u32).to_le_bytes())?;
        for w in weights {
            writer.write_all(&w.to_le_bytes())?;
        }
        for b in bias {
            writer.write_all(&b.to_le_bytes())?;
        }
    }
    Ok(())
}

//! Dense 3D convolutional inference for dual-contouring vertex offsets.
//!
//! The network maps a 1-channel 64^3 truncated-SDF block to 3 channels of
//! fractional per-cell vertex offsets in `[0, 1]` (sigmoid output). Hidden
//! layers use ReLU. Weights are plain `f32` blobs; no runtime dependency on
//! an inference framework.

use crate::error::{EngineError, EngineResult};
use crate::terrain::ndc::K_IN;

/// Magic prefixing a serialized weight blob.
const WEIGHTS_MAGIC: &[u8; 4] = b"NDCW";

/// One zero-padded 3D convolution layer (stride 1, odd kernel).
#[derive(Debug)]
pub struct Conv3d {
    in_channels: usize,
    out_channels: usize,
    /// Kernel edge length; must be odd so padding preserves the extent.
    kernel: usize,
    /// `[out][in][kz][ky][kx]`, flattened.
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl Conv3d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        weights: Vec<f32>,
        bias: Vec<f32>,
    ) -> EngineResult<Self> {
        if kernel % 2 == 0 {
            return Err(EngineError::ModelInference {
                reason: format!("even kernel size {} is unsupported", kernel),
            });
        }
        let expected = out_channels * in_channels * kernel * kernel * kernel;
        if weights.len() != expected || bias.len() != out_channels {
            return Err(EngineError::ModelInference {
                reason: format!(
                    "layer shape mismatch: {} weights (want {}), {} biases (want {})",
                    weights.len(),
                    expected,
                    bias.len(),
                    out_channels
                ),
            });
        }
        Ok(Self { in_channels, out_channels, kernel, weights, bias })
    }

    /// Forward pass over an `in_channels * 64^3` channel-major input.
    /// Out-of-range taps read zero.
    fn forward(&self, input: &[f32]) -> Vec<f32> {
        let n = K_IN as i32;
        let voxels = K_IN * K_IN * K_IN;
        let half = (self.kernel / 2) as i32;
        let k = self.kernel;
        let mut output = vec![0.0f32; self.out_channels * voxels];

        for oc in 0..self.out_channels {
            let out_plane = &mut output[oc * voxels..(oc + 1) * voxels];
            for ic in 0..self.in_channels {
                let in_plane = &input[ic * voxels..(ic + 1) * voxels];
                let w_base = ((oc * self.in_channels) + ic) * k * k * k;
                for z in 0..n {
                    for y in 0..n {
                        for x in 0..n {
                            let mut acc = 0.0f32;
                            for kz in 0..k as i32 {
                                let sz = z + kz - half;
                                if sz < 0 || sz >= n {
                                    continue;
                                }
                                for ky in 0..k as i32 {
                                    let sy = y + ky - half;
                                    if sy < 0 || sy >= n {
                                        continue;
                                    }
                                    for kx in 0..k as i32 {
                                        let sx = x + kx - half;
                                        if sx < 0 || sx >= n {
                                            continue;
                                        }
                                        let w = self.weights[w_base
                                            + ((kz as usize * k) + ky as usize) * k
                                            + kx as usize];
                                        let s = in_plane[((sz as usize * K_IN) + sy as usize)
                                            * K_IN
                                            + sx as usize];
                                        acc += w * s;
                                    }
                                }
                            }
                            out_plane[((z as usize * K_IN) + y as usize) * K_IN + x as usize] +=
                                acc;
                        }
                    }
                }
            }
            for v in out_plane.iter_mut() {
                *v += self.bias[oc];
            }
        }
        output
    }
}

/// Stack of convolution layers; ReLU between layers, sigmoid on the output.
#[derive(Debug)]
pub struct NdcModel {
    layers: Vec<Conv3d>,
}

impl NdcModel {
    pub fn new(layers: Vec<Conv3d>) -> EngineResult<Self> {
        let Some(last) = layers.last() else {
            return Err(EngineError::ModelInference { reason: "empty layer stack".into() });
        };
        if layers[0].in_channels != 1 || last.out_channels != 3 {
            return Err(EngineError::ModelInference {
                reason: format!(
                    "model must map 1 channel to 3, got {} to {}",
                    layers[0].in_channels, last.out_channels
                ),
            });
        }
        for pair in layers.windows(2) {
            if pair[0].out_channels != pair[1].in_channels {
                return Err(EngineError::ModelInference {
                    reason: "channel counts between layers do not chain".into(),
                });
            }
        }
        Ok(Self { layers })
    }

    /// Zero-weight single layer: every offset is sigmoid(0) = 0.5, placing
    /// vertices at cell centers. Deterministic default when no trained
    /// weights are supplied.
    pub fn surface_centered() -> Self {
        let layer = Conv3d::new(1, 3, 1, vec![0.0; 3], vec![0.0; 3])
            .expect("static layer shape is valid");
        Self { layers: vec![layer] }
    }

    /// Parse a weight blob:
    /// `"NDCW" | u32 layer count | per layer: u32 in, u32 out, u32 kernel,
    /// then out*in*k^3 weight f32s and out bias f32s`, all little endian.
    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        let mut r = Reader { bytes, pos: 0 };
        let magic = r.take(4)?;
        if magic != WEIGHTS_MAGIC {
            return Err(EngineError::ModelInference {
                reason: "bad weight blob magic".into(),
            });
        }
        let layer_count = r.u32()? as usize;
        if layer_count == 0 || layer_count > 16 {
            return Err(EngineError::ModelInference {
                reason: format!("implausible layer count {}", layer_count),
            });
        }
        let mut layers = Vec::with_capacity(layer_count);
        for _ in 0..layer_count {
            let in_ch = r.u32()? as usize;
            let out_ch = r.u32()? as usize;
            let kernel = r.u32()? as usize;
            let weights = r.f32s(out_ch * in_ch * kernel * kernel * kernel)?;
            let bias = r.f32s(out_ch)?;
            layers.push(Conv3d::new(in_ch, out_ch, kernel, weights, bias)?);
        }
        if r.pos != bytes.len() {
            return Err(EngineError::ModelInference {
                reason: format!("{} trailing bytes after last layer", bytes.len() - r.pos),
            });
        }
        NdcModel::new(layers)
    }

    /// Infer per-cell vertex offsets from a 64^3 truncated-SDF block.
    /// Returns `3 * 64^3` values channel-major, each in `[0, 1]`.
    pub fn infer(&self, tsdf: &[f32]) -> EngineResult<Vec<f32>> {
        let voxels = K_IN * K_IN * K_IN;
        if tsdf.len() != voxels {
            return Err(EngineError::ModelInference {
                reason: format!("input has {} samples, want {}", tsdf.len(), voxels),
            });
        }

        let mut activ = self.layers[0].forward(tsdf);
        for layer in &self.layers[1..] {
            for v in activ.iter_mut() {
                *v = v.max(0.0);
            }
            activ = layer.forward(&activ);
        }
        for v in activ.iter_mut() {
            *v = 1.0 / (1.0 + (-*v).exp());
        }
        Ok(activ)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> EngineResult<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.bytes.len()).ok_or_else(
            || EngineError::ModelInference { reason: "weight blob truncated".into() },
        )?;
        let s = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn u32(&mut self) -> EngineResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32s(&mut self, count: usize) -> EngineResult<Vec<f32>> {
        let b = self.take(count * 4)?;
        Ok(b.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_centered_outputs_half_everywhere() {
        let model = NdcModel::surface_centered();
        let input = vec![0.25f32; K_IN * K_IN * K_IN];
        let out = model.infer(&input).unwrap();
        assert_eq!(out.len(), 3 * K_IN * K_IN * K_IN);
        for &v in &out {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn infer_rejects_wrong_input_size() {
        let model = NdcModel::surface_centered();
        assert!(model.infer(&[0.0; 8]).is_err());
    }

    #[test]
    fn from_bytes_round_trips_a_single_layer() {
        // 1 -> 3 channels, 1^3 kernel, known weights.
        let mut blob = Vec::new();
        blob.extend_from_slice(b"NDCW");
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&3u32.to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        for w in [2.0f32, -2.0, 0.0] {
            blob.extend_from_slice(&w.to_le_bytes());
        }
        for b in [0.0f32, 0.0, 1.0] {
            blob.extend_from_slice(&b.to_le_bytes());
        }

        let model = NdcModel::from_bytes(&blob).unwrap();
        let input = vec![1.0f32; K_IN * K_IN * K_IN];
        let out = model.infer(&input).unwrap();
        let voxels = K_IN * K_IN * K_IN;

        let sig = |x: f32| 1.0 / (1.0 + (-x).exp());
        assert!((out[0] - sig(2.0)).abs() < 1e-6);
        assert!((out[voxels] - sig(-2.0)).abs() < 1e-6);
        assert!((out[2 * voxels] - sig(1.0)).abs() < 1e-6);
    }

    #[test]
    fn from_bytes_rejects_mis_chained_layers() {
        // Layer 0 emits 4 channels, layer 1 expects 2: must not construct.
        let mut blob = Vec::new();
        blob.extend_from_slice(b"NDCW");
        blob.extend_from_slice(&2u32.to_le_bytes());
        for header in [[1u32, 4, 1], [2, 3, 1]] {
            let [in_ch, out_ch, kernel] = header;
            for v in header {
                blob.extend_from_slice(&v.to_le_bytes());
            }
            let weights = (out_ch * in_ch * kernel * kernel * kernel) as usize;
            blob.extend(std::iter::repeat(0u8).take((weights + out_ch as usize) * 4));
        }
        let err = NdcModel::from_bytes(&blob).unwrap_err();
        assert!(err.to_string().contains("chain"), "unexpected error: {}", err);
    }

    #[test]
    fn from_bytes_rejects_bad_magic_and_truncation() {
        assert!(NdcModel::from_bytes(b"XXXX").is_err());
        let mut blob = Vec::new();
        blob.extend_from_slice(b"NDCW");
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        // cut off mid-header
        assert!(NdcModel::from_bytes(&blob).is_err());
    }
}

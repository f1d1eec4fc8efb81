use candle_core::{DType, Device, Result as CandleResult, Tensor, D};

use crate::layers::layer::Layer;
use crate::layers::linear::LinearLayer;
use crate::weights::Weights;

/// Added to attention scores at masked positions. Finite so a fully masked
/// (padding) query row still softmaxes to numbers.
const MASK_VALUE: f32 = f32::MIN;

/// KV cache for storing key and value tensors across generation steps
#[derive(Clone, Default)]
pub struct KVCache {
    pub k_cache: Option<Tensor>,
    pub v_cache: Option<Tensor>,
}

impl KVCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seq_len(&self) -> usize {
        self.k_cache
            .as_ref()
            .and_then(|k| k.dim(2).ok())
            .unwrap_or(0)
    }
}

/// Inputs shared by every block for one forward step.
///
/// `cos`/`sin` are `(batch, 1, seq, rotary_dim)`; `bias` is
/// `(batch, 1, seq, past + seq)` with `0` where a query may attend and
/// [`MASK_VALUE`] elsewhere. All three are f32.
pub struct AttentionInputs {
    pub cos: Tensor,
    pub sin: Tensor,
    pub bias: Tensor,
}

impl AttentionInputs {
    pub fn to_device(&self, device: &Device) -> CandleResult<Self> {
        Ok(Self {
            cos: self.cos.to_device(device)?,
            sin: self.sin.to_device(device)?,
            bias: self.bias.to_device(device)?,
        })
    }
}

/// Rotary tables for GPT-J's interleaved ("rotate every two") layout.
pub struct RotaryEmbedding {
    inv_freq: Vec<f32>,
}

impl RotaryEmbedding {
    pub fn new(rotary_dim: usize, base: f32) -> Self {
        let inv_freq = (0..rotary_dim)
            .step_by(2)
            .map(|i| 1.0 / base.powf(i as f32 / rotary_dim as f32))
            .collect();
        Self { inv_freq }
    }

    pub fn dim(&self) -> usize {
        self.inv_freq.len() * 2
    }

    /// `positions[b][t]` to `(cos, sin)` of shape `(batch, 1, seq, rotary_dim)`,
    /// each frequency repeated twice in place.
    pub fn tables(&self, positions: &[Vec<u32>], device: &Device) -> CandleResult<(Tensor, Tensor)> {
        let batch = positions.len();
        let seq_len = positions.first().map(Vec::len).unwrap_or(0);
        let dim = self.dim();

        let mut cos = Vec::with_capacity(batch * seq_len * dim);
        let mut sin = Vec::with_capacity(batch * seq_len * dim);
        for row in positions {
            for &pos in row {
                for &freq in &self.inv_freq {
                    let angle = pos as f32 * freq;
                    let (s, c) = angle.sin_cos();
                    cos.extend([c, c]);
                    sin.extend([s, s]);
                }
            }
        }

        let shape = (batch, 1, seq_len, dim);
        Ok((
            Tensor::from_vec(cos, shape, device)?,
            Tensor::from_vec(sin, shape, device)?,
        ))
    }
}

/// Additive attention bias combining causality with the padding mask.
///
/// `attention_mask[b]` covers the full key length (`past + seq_len`); `1`
/// marks real tokens, `0` marks padding.
pub fn attention_bias(
    attention_mask: &[Vec<u32>],
    seq_len: usize,
    device: &Device,
) -> CandleResult<Tensor> {
    let batch = attention_mask.len();
    let total = attention_mask.first().map(Vec::len).unwrap_or(0);
    if total < seq_len {
        candle_core::bail!("attention mask of length {total} is shorter than step {seq_len}");
    }
    let past = total - seq_len;

    let mut bias = Vec::with_capacity(batch * seq_len * total);
    for row in attention_mask {
        for i in 0..seq_len {
            for (j, &keep) in row.iter().enumerate() {
                let visible = j <= past + i && keep != 0;
                bias.push(if visible { 0.0 } else { MASK_VALUE });
            }
        }
    }
    Tensor::from_vec(bias, (batch, 1, seq_len, total), device)
}

/// `[x0, x1, x2, x3, ..] -> [-x1, x0, -x3, x2, ..]` along the last dimension.
fn rotate_every_two(x: &Tensor) -> CandleResult<Tensor> {
    let (b, h, t, d) = x.dims4()?;
    let pairs = x.contiguous()?.reshape((b, h, t, d / 2, 2))?;
    let even = pairs.narrow(4, 0, 1)?;
    let odd = pairs.narrow(4, 1, 1)?;
    Tensor::cat(&[&odd.neg()?, &even], 4)?.reshape((b, h, t, d))
}

/// Rotates the first `rotary_dim` channels of each head, passing the rest through.
fn apply_rotary(x: &Tensor, cos: &Tensor, sin: &Tensor) -> CandleResult<Tensor> {
    let head_dim = x.dim(D::Minus1)?;
    let rotary_dim = cos.dim(D::Minus1)?;

    let x_rot = x.narrow(D::Minus1, 0, rotary_dim)?;
    let rotated = (x_rot.broadcast_mul(cos)? + rotate_every_two(&x_rot)?.broadcast_mul(sin)?)?;

    if rotary_dim == head_dim {
        return Ok(rotated);
    }
    let x_pass = x.narrow(D::Minus1, rotary_dim, head_dim - rotary_dim)?;
    Tensor::cat(&[&rotated, &x_pass], D::Minus1)
}

/// GPT-J self-attention: bias-free q/k/v/out projections, partial rotary
/// embeddings, scores computed in f32.
pub struct CausalSelfAttentionLayer {
    q_proj: LinearLayer,
    k_proj: LinearLayer,
    v_proj: LinearLayer,
    out_proj: LinearLayer,
    n_heads: usize,
    head_dim: usize,
    device: Device,
}

impl CausalSelfAttentionLayer {
    pub fn new(
        weights: &Weights,
        prefix: &str,
        n_heads: usize,
        hidden_size: usize,
        device: &Device,
    ) -> CandleResult<Self> {
        let q_proj = LinearLayer::new(weights, &format!("{}.q_proj", prefix), device)?;
        let k_proj = LinearLayer::new(weights, &format!("{}.k_proj", prefix), device)?;
        let v_proj = LinearLayer::new(weights, &format!("{}.v_proj", prefix), device)?;
        let out_proj = LinearLayer::new(weights, &format!("{}.out_proj", prefix), device)?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            out_proj,
            n_heads,
            head_dim: hidden_size / n_heads,
            device: device.clone(),
        })
    }

    fn split_heads(&self, x: &Tensor, b_sz: usize, seq_len: usize) -> CandleResult<Tensor> {
        x.reshape((b_sz, seq_len, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// Forward pass with KV cache support
    pub fn forward_with_cache(
        &self,
        input: &Tensor,
        inputs: &AttentionInputs,
        kv_cache: &mut KVCache,
    ) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let (b_sz, seq_len, hidden_size) = input.dims3()?;

        let q = self.split_heads(&self.q_proj.forward(&input)?, b_sz, seq_len)?;
        let k = self.split_heads(&self.k_proj.forward(&input)?, b_sz, seq_len)?;
        let v = self.split_heads(&self.v_proj.forward(&input)?, b_sz, seq_len)?;

        let q = apply_rotary(&q.to_dtype(DType::F32)?, &inputs.cos, &inputs.sin)?;
        let k = apply_rotary(&k.to_dtype(DType::F32)?, &inputs.cos, &inputs.sin)?;

        let (k, v) = match (&kv_cache.k_cache, &kv_cache.v_cache) {
            (Some(k_cached), Some(v_cached)) => (
                Tensor::cat(&[k_cached, &k], 2)?,
                Tensor::cat(&[v_cached, &v], 2)?,
            ),
            _ => (k, v),
        };
        kv_cache.k_cache = Some(k.clone());
        kv_cache.v_cache = Some(v.clone());

        let scaling = 1.0 / (self.head_dim as f64).sqrt();
        let attn_scores = q
            .matmul(&k.t()?.contiguous()?)?
            .affine(scaling, 0.0)?
            .broadcast_add(&inputs.bias)?;

        let attn_probs = candle_nn::ops::softmax_last_dim(&attn_scores)?.to_dtype(v.dtype())?;

        let context = attn_probs
            .matmul(&v)?
            .transpose(1, 2)? // (b_sz, seq_len, n_heads, head_dim)
            .reshape((b_sz, seq_len, hidden_size))?;

        self.out_proj.forward(&context)
    }
}

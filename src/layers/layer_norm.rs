use candle_core::{DType, Device, Result as CandleResult, Tensor};

use crate::layers::layer::Layer;
use crate::weights::Weights;

/// LayerNorm with affine weight and bias, normalized in f32.
pub struct LayerNormLayer {
    weights: Tensor,
    bias: Tensor,
    eps: f64,
    device: Device,
}

impl LayerNormLayer {
    pub fn new(weights_map: &Weights, prefix: &str, device: &Device, eps: f64) -> CandleResult<Self> {
        let weights = weights_map.load_as(&format!("{}.weight", prefix), device, DType::F32)?;
        let bias = weights_map.load_as(&format!("{}.bias", prefix), device, DType::F32)?;

        Ok(Self {
            weights,
            bias,
            eps,
            device: device.clone(),
        })
    }
}

impl Layer for LayerNormLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let orig_dtype = input.dtype();

        let input = input.to_device(&self.device)?.to_dtype(DType::F32)?;
        let mean = input.mean_keepdim(candle_core::D::Minus1)?;
        let centered = input.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(candle_core::D::Minus1)?;
        let inv_std = variance.affine(1.0, self.eps)?.sqrt()?.recip()?;

        let out = centered
            .broadcast_mul(&inv_std)?
            .broadcast_mul(&self.weights)?
            .broadcast_add(&self.bias)?;

        out.to_dtype(orig_dtype)
    }
}

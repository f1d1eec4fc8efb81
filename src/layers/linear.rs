use candle_core::{Device, Result as CandleResult, Tensor};

use crate::layers::layer::Layer;
use crate::weights::Weights;

pub struct LinearLayer {
    weights: Tensor,
    bias: Option<Tensor>,
    device: Device,
}

impl LinearLayer {
    /// Loads `{prefix}.weight` and, when present, `{prefix}.bias`.
    pub fn new(weights_map: &Weights, prefix: &str, device: &Device) -> CandleResult<Self> {
        let weights = weights_map.load(&format!("{}.weight", prefix), device)?;

        let bias_name = format!("{}.bias", prefix);
        let bias = if weights_map.contains(&bias_name) {
            Some(weights_map.load(&bias_name, device)?)
        } else {
            None
        };

        Ok(Self {
            weights,
            bias,
            device: device.clone(),
        })
    }

    /// Projection sharing an existing `(out, in)` matrix, e.g. a tied LM head.
    pub fn from_weights(weights: Tensor, device: &Device) -> CandleResult<Self> {
        Ok(Self {
            weights: weights.to_device(device)?,
            bias: None,
            device: device.clone(),
        })
    }
}

impl LinearLayer {
    pub fn out_features(&self) -> CandleResult<usize> {
        self.weights.dim(0)
    }
}

impl Layer for LinearLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let mut output = input.broadcast_matmul(&self.weights.t()?)?;
        if let Some(bias) = &self.bias {
            output = output.broadcast_add(bias)?
        }
        Ok(output)
    }
}

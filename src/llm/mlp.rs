use crate::layers::activation::Activation;
use crate::layers::layer::Layer;
use crate::layers::linear::LinearLayer;
use crate::weights::Weights;
use candle_core::Result as CandleResult;
use candle_core::{Device, Tensor};

/// `fc_out(act(fc_in(x)))`, both projections biased.
pub struct MlpLayer {
    fc_in: LinearLayer,
    fc_out: LinearLayer,
    activation: Activation,
    device: Device,
}

impl MlpLayer {
    pub fn new(
        weights_map: &Weights,
        prefix: &str,
        device: &Device,
        activation: Activation,
    ) -> CandleResult<Self> {
        let fc_in = LinearLayer::new(weights_map, &format!("{}.fc_in", prefix), device)?;
        let fc_out = LinearLayer::new(weights_map, &format!("{}.fc_out", prefix), device)?;
        Ok(Self {
            fc_in,
            fc_out,
            activation,
            device: device.clone(),
        })
    }
}

impl MlpLayer {
    /// Width of the hidden projection.
    pub fn inner_dim(&self) -> CandleResult<usize> {
        self.fc_in.out_features()
    }
}

impl Layer for MlpLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let hidden = self.fc_in.forward(&input)?;
        let activated = self.activation.apply(&hidden)?;
        self.fc_out.forward(&activated)
    }
}

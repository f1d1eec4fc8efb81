use candle_core::{Device, Result as CandleResult, Tensor};

use crate::config::GptJConfig;
use crate::layers::activation::Activation;
use crate::layers::layer::Layer;
use crate::layers::layer_norm::LayerNormLayer;
use crate::llm::causal_self_attention::{AttentionInputs, CausalSelfAttentionLayer, KVCache};
use crate::llm::mlp::MlpLayer;
use crate::weights::Weights;

/// One GPT-J block. Attention and MLP both read the same normalized input
/// and their outputs are summed with the residual in a single step.
pub struct DecoderLayer {
    pub self_attn: CausalSelfAttentionLayer,
    pub mlp: MlpLayer,
    pub input_norm: LayerNormLayer,
    pub device: Device,
}

impl DecoderLayer {
    pub fn new(
        weights: &Weights,
        prefix: &str,
        config: &GptJConfig,
        activation: Activation,
        device: &Device,
    ) -> CandleResult<Self> {
        let self_attn = CausalSelfAttentionLayer::new(
            weights,
            &format!("{}.attn", prefix),
            config.n_head,
            config.n_embd,
            device,
        )?;

        let mlp = MlpLayer::new(weights, &format!("{}.mlp", prefix), device, activation)?;
        let inner = mlp.inner_dim()?;
        if inner != config.inner_dim() {
            candle_core::bail!(
                "{}.mlp.fc_in has {} outputs, config expects n_inner {}",
                prefix,
                inner,
                config.inner_dim()
            );
        }

        let input_norm = LayerNormLayer::new(
            weights,
            &format!("{}.ln_1", prefix),
            device,
            config.layer_norm_epsilon,
        )?;

        Ok(Self {
            self_attn,
            mlp,
            input_norm,
            device: device.clone(),
        })
    }

    pub fn forward_with_cache(
        &self,
        input: &Tensor,
        inputs: &AttentionInputs,
        kv_cache: &mut KVCache,
    ) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let inputs = inputs.to_device(&self.device)?;

        let normed_input = self.input_norm.forward(&input)?;
        let attn_output = self.self_attn.forward_with_cache(&normed_input, &inputs, kv_cache)?;
        let mlp_output = self.mlp.forward(&normed_input)?;

        (attn_output + mlp_output)? + input
    }
}

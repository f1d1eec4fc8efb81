use crate::config::GptJConfig;
use crate::layers::activation::Activation;
use crate::layers::embedding::EmbeddingLayer;
use crate::layers::layer::Layer;
use crate::layers::layer_norm::LayerNormLayer;
use crate::layers::linear::LinearLayer;
use crate::llm::causal_self_attention::{attention_bias, AttentionInputs, KVCache, RotaryEmbedding};
use crate::llm::decoder::DecoderLayer;
use crate::llm::placement::DevicePlan;
use crate::weights::Weights;

use candle_core::{DType, Device, Result as CandleResult, Tensor};

const ROPE_BASE: f32 = 10_000.0;

pub trait Model {
    /// Runs one step over `input_ids` (`(batch, seq)`) and returns the f32
    /// logits of the last position, `(batch, vocab)`.
    ///
    /// `positions[b]` has `seq` entries. `attention_mask[b]` spans every token
    /// seen so far, cached ones included.
    fn forward_with_cache(
        &self,
        input_ids: &Tensor,
        positions: &[Vec<u32>],
        attention_mask: &[Vec<u32>],
        kv_caches: &mut [KVCache],
    ) -> CandleResult<Tensor>;

    fn num_layers(&self) -> usize;

    /// Longest sequence the position embeddings were trained for.
    fn max_positions(&self) -> usize;
}

pub struct GptJModel {
    pub embed_layer: EmbeddingLayer,
    pub decoder_layers: Vec<DecoderLayer>,
    pub norm_layer: LayerNormLayer,
    pub lm_head: LinearLayer,
    rotary: RotaryEmbedding,
    device: Device,
    pub cfg: GptJConfig,
}

impl GptJModel {
    pub fn new(weights: &Weights, config: &GptJConfig, plan: &DevicePlan) -> CandleResult<Self> {
        if let Err(reason) = config.validate() {
            candle_core::bail!("{reason}");
        }
        let activation = Activation::from_name(&config.activation_function).ok_or_else(|| {
            candle_core::Error::msg(format!(
                "unsupported activation function: {}",
                config.activation_function
            ))
        })?;

        let embed_layer = EmbeddingLayer::new(weights, plan.first(), "transformer.wte")?;

        let decoder_layers = (0..config.n_layer)
            .map(|layer_idx| {
                DecoderLayer::new(
                    weights,
                    &format!("transformer.h.{}", layer_idx),
                    config,
                    activation,
                    plan.layer_device(layer_idx),
                )
            })
            .collect::<CandleResult<Vec<_>>>()?;

        let norm_layer = LayerNormLayer::new(
            weights,
            "transformer.ln_f",
            plan.last(),
            config.layer_norm_epsilon,
        )?;

        let lm_head = if config.tie_word_embeddings || !weights.contains("lm_head.weight") {
            LinearLayer::from_weights(embed_layer.weights().clone(), plan.last())?
        } else {
            LinearLayer::new(weights, "lm_head", plan.last())?
        };

        Ok(Self {
            embed_layer,
            decoder_layers,
            norm_layer,
            lm_head,
            rotary: RotaryEmbedding::new(config.rotary_dim(), ROPE_BASE),
            device: plan.first().clone(),
            cfg: config.clone(),
        })
    }
}

impl Model for GptJModel {
    fn forward_with_cache(
        &self,
        input_ids: &Tensor,
        positions: &[Vec<u32>],
        attention_mask: &[Vec<u32>],
        kv_caches: &mut [KVCache],
    ) -> CandleResult<Tensor> {
        if kv_caches.len() != self.decoder_layers.len() {
            candle_core::bail!(
                "expected {} kv caches, got {}",
                self.decoder_layers.len(),
                kv_caches.len()
            );
        }
        let (_, seq_len) = input_ids.dims2()?;
        let past = kv_caches.first().map(KVCache::seq_len).unwrap_or(0);
        if let Some(row) = attention_mask.iter().find(|row| row.len() != past + seq_len) {
            candle_core::bail!(
                "attention mask covers {} tokens, expected {} cached + {} new",
                row.len(),
                past,
                seq_len
            );
        }

        let (cos, sin) = self.rotary.tables(positions, &self.device)?;
        let bias = attention_bias(attention_mask, seq_len, &self.device)?;
        let inputs = AttentionInputs { cos, sin, bias };

        let mut hidden_states = self.embed_layer.forward(input_ids)?;
        for (layer, cache) in self.decoder_layers.iter().zip(kv_caches.iter_mut()) {
            hidden_states = layer.forward_with_cache(&hidden_states, &inputs, cache)?;
        }

        let last = hidden_states.narrow(1, seq_len - 1, 1)?;
        let normed_output = self.norm_layer.forward(&last)?;
        let logits = self.lm_head.forward(&normed_output)?;

        logits.squeeze(1)?.to_dtype(DType::F32)
    }

    fn num_layers(&self) -> usize {
        self.decoder_layers.len()
    }

    fn max_positions(&self) -> usize {
        self.cfg.n_positions
    }
}

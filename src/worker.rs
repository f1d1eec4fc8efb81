//! The long-lived model worker: one loaded model and tokenizer per process.

use std::collections::HashSet;
use std::time::Instant;

use candle_core::{DType, Device};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::config::GptJConfig;
use crate::error::{Result, ServeError};
use crate::hub::{self, WeightFiles};
use crate::llm::generation::GenerationConfig;
use crate::llm::inference;
use crate::llm::models::{GptJModel, Model};
use crate::llm::placement::DevicePlan;
use crate::weights::Weights;

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub dtype: DType,
    pub force_cpu: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            dtype: DType::F16,
            force_cpu: false,
        }
    }
}

/// Owns the model and tokenizer. Nothing here is mutated after
/// construction, so `generate` only needs `&self`.
pub struct ModelWorker {
    model_id: String,
    model: Box<dyn Model + Send + Sync>,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_id: u32,
    pad_token_id: u32,
    special_token_ids: HashSet<u32>,
}

impl ModelWorker {
    /// Resolves, downloads if needed, and loads `model_id` at `revision`.
    /// Slow: expect seconds to minutes for multi-gigabyte checkpoints.
    pub fn load(model_id: &str, revision: Option<&str>, options: &LoadOptions) -> Result<Self> {
        let started = Instant::now();
        let files = hub::resolve(model_id, revision)?;
        let load_err = |e: &dyn std::fmt::Display| ServeError::load(model_id, e);

        let raw_config = std::fs::read_to_string(&files.config).map_err(|e| load_err(&e))?;
        let config: GptJConfig = serde_json::from_str(&raw_config).map_err(|e| load_err(&e))?;
        config.validate().map_err(|e| load_err(&e))?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|e| load_err(&e))?;

        let weights = match &files.weights {
            WeightFiles::Safetensors(paths) => Weights::from_safetensors(paths, options.dtype),
            WeightFiles::Pickle(paths) => {
                warn!("No safetensors found, reading {} pickle shard(s)", paths.len());
                Weights::from_pickle(paths, options.dtype)
            }
        }
        .map_err(|e| load_err(&e))?;

        let plan = DevicePlan::detect(config.n_layer, options.force_cpu).map_err(|e| load_err(&e))?;
        let model = GptJModel::new(&weights, &config, &plan).map_err(|e| load_err(&e))?;

        debug!("Decoder block devices: {:?}", plan.layer_assignment());
        info!(
            "Loaded {} ({} layers on {} device(s), {:?}) in {:.1?}",
            model_id,
            config.n_layer,
            plan.num_devices(),
            options.dtype,
            started.elapsed()
        );

        Self::from_parts(
            model_id,
            Box::new(model),
            tokenizer,
            plan.first().clone(),
            config.eos_token_id,
        )
    }

    /// Assembles a worker from an already built model and tokenizer.
    ///
    /// The padding id is fixed here: the tokenizer's own when it defines
    /// one, the end-of-sequence id otherwise. The tokenizer's padding and
    /// truncation are then switched off, since prompts are padded as a
    /// batch and never cut.
    pub fn from_parts(
        model_id: impl Into<String>,
        model: Box<dyn Model + Send + Sync>,
        mut tokenizer: Tokenizer,
        device: Device,
        eos_token_id: u32,
    ) -> Result<Self> {
        let model_id = model_id.into();
        let pad_token_id = match tokenizer.get_padding() {
            Some(padding) => padding.pad_id,
            None => {
                info!(
                    "Tokenizer for {} defines no padding token, padding with end-of-sequence id {}",
                    model_id, eos_token_id
                );
                eos_token_id
            }
        };
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(None)
            .map_err(|e| ServeError::load(&model_id, e))?;

        let special_token_ids = tokenizer
            .get_added_tokens_decoder()
            .into_iter()
            .filter(|(_, token)| token.special)
            .map(|(id, _)| id)
            .collect();

        Ok(Self {
            model_id,
            model,
            tokenizer,
            device,
            eos_token_id,
            pad_token_id,
            special_token_ids,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Sampling defaults with this worker's padding id filled in.
    pub fn default_generation_config(&self) -> GenerationConfig {
        GenerationConfig::new(self.pad_token_id)
    }

    /// Generates one completion per prompt, in order. Each completion starts
    /// with its prompt, verbatim. Any failure fails the whole batch.
    pub fn generate(&self, prompts: &[String], config: &GenerationConfig) -> Result<Vec<String>> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }
        config.validate().map_err(ServeError::Generation)?;

        let limit = config.max_length.min(self.model.max_positions());
        let mut encoded = Vec::with_capacity(prompts.len());
        for (i, prompt) in prompts.iter().enumerate() {
            let encoding = self
                .tokenizer
                .encode(prompt.as_str(), true)
                .map_err(|e| ServeError::generation(format!("failed to tokenize prompt {i}: {e}")))?;
            let ids = encoding.get_ids().to_vec();
            if ids.is_empty() {
                return Err(ServeError::generation(format!("prompt {i} produced no tokens")));
            }
            if ids.len() >= limit {
                return Err(ServeError::generation(format!(
                    "prompt {i} has {} tokens, leaving no room under max_length {limit}",
                    ids.len()
                )));
            }
            encoded.push(ids);
        }

        let started = Instant::now();
        let generated = inference::generate(
            self.model.as_ref(),
            &encoded,
            config,
            self.eos_token_id,
            &self.device,
        )
        .map_err(ServeError::generation)?;

        let mut outputs = Vec::with_capacity(prompts.len());
        for (i, ((prompt, ids), new_tokens)) in prompts.iter().zip(encoded).zip(generated).enumerate() {
            debug!("Prompt {}: {} prompt + {} new tokens", i, ids.len(), new_tokens.len());
            let continuation = self
                .continuation(ids, new_tokens)
                .map_err(|e| ServeError::generation(format!("failed to decode output {i}: {e}")))?;
            outputs.push(format!("{prompt}{continuation}"));
        }
        info!(
            "Generated {} completion(s) in {:.2?}",
            outputs.len(),
            started.elapsed()
        );
        Ok(outputs)
    }

    /// Text the generated tokens add after the prompt. Special tokens among
    /// them are dropped; the prompt's own are left alone. Decoding happens
    /// with the prompt as context so word boundaries come out right.
    fn continuation(&self, prompt_ids: Vec<u32>, new_tokens: Vec<u32>) -> tokenizers::Result<String> {
        let kept: Vec<u32> = new_tokens
            .into_iter()
            .filter(|id| !self.special_token_ids.contains(id))
            .collect();
        if kept.is_empty() {
            return Ok(String::new());
        }

        let prompt_text = self.tokenizer.decode(&prompt_ids, false)?;
        let mut all_ids = prompt_ids;
        all_ids.extend_from_slice(&kept);
        let full_text = self.tokenizer.decode(&all_ids, false)?;
        match full_text.strip_prefix(prompt_text.as_str()) {
            Some(rest) => Ok(rest.to_string()),
            None => self.tokenizer.decode(&kept, false),
        }
    }
}

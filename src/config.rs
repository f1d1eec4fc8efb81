use std::net::SocketAddr;
use std::time::Duration;

use candle_core::DType;
use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::llm::generation::GenerationConfig;

/// Hyper-parameters read from a GPT-J `config.json`.
#[derive(Deserialize, Debug, Clone)]
pub struct GptJConfig {
    #[serde(default)]
    pub model_type: String,
    pub vocab_size: usize,
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default)]
    pub n_inner: Option<usize>,
    #[serde(default)]
    pub rotary_dim: Option<usize>,
    #[serde(default = "default_activation")]
    pub activation_function: String,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
    #[serde(default = "default_eos_token_id")]
    pub eos_token_id: u32,
    #[serde(default)]
    pub tie_word_embeddings: bool,
}

fn default_activation() -> String {
    "gelu_new".to_string()
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

fn default_eos_token_id() -> u32 {
    50256
}

impl GptJConfig {
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    pub fn rotary_dim(&self) -> usize {
        self.rotary_dim.unwrap_or_else(|| self.head_dim())
    }

    pub fn inner_dim(&self) -> usize {
        self.n_inner.unwrap_or(4 * self.n_embd)
    }

    /// Checks the shape constraints the attention and rotary code rely on.
    pub fn validate(&self) -> Result<(), String> {
        if self.model_type != "gptj" {
            return Err(format!(
                "unsupported architecture `{}`, expected `gptj`",
                self.model_type
            ));
        }
        if self.n_head == 0 || self.n_layer == 0 || self.n_embd % self.n_head != 0 {
            return Err(format!(
                "n_embd {} is not divisible into {} heads",
                self.n_embd, self.n_head
            ));
        }
        let rotary = self.rotary_dim();
        if rotary == 0 || rotary % 2 != 0 || rotary > self.head_dim() {
            return Err(format!(
                "rotary_dim {} must be even and at most head_dim {}",
                rotary,
                self.head_dim()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WeightDType {
    F16,
    Bf16,
    F32,
}

impl From<WeightDType> for DType {
    fn from(value: WeightDType) -> Self {
        match value {
            WeightDType::F16 => DType::F16,
            WeightDType::Bf16 => DType::BF16,
            WeightDType::F32 => DType::F32,
        }
    }
}

/// Command line and environment configuration for the server process.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Serve a causal language model over HTTP", long_about = None)]
pub struct ServeArgs {
    /// Hugging Face repo id (`org/name`) or path to a local snapshot
    #[arg(long, env = "MODEL_ID")]
    pub model_id: String,

    /// Revision of the weights, e.g. `float16`
    #[arg(long, env = "MODEL_REVISION")]
    pub revision: Option<String>,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Precision the weights are cast to after loading
    #[arg(long, value_enum, default_value_t = WeightDType::F16)]
    pub dtype: WeightDType,

    /// Ignore accelerators and run on the CPU
    #[arg(long)]
    pub cpu: bool,

    /// Maximum total sequence length, prompt included
    #[arg(long, default_value_t = 100)]
    pub max_length: usize,

    #[arg(long, default_value_t = 0.9)]
    pub temperature: f64,

    #[arg(long, default_value_t = 50)]
    pub top_k: usize,

    /// Decode greedily instead of sampling
    #[arg(long)]
    pub greedy: bool,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Requests allowed to generate at the same time
    #[arg(long, default_value_t = 1)]
    pub max_concurrent_requests: usize,

    /// Fail requests that take longer than this many seconds
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,
}

impl ServeArgs {
    pub fn bind_address(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Applies the sampling flags on top of the worker's defaults.
    pub fn generation_config(&self, defaults: GenerationConfig) -> GenerationConfig {
        GenerationConfig {
            do_sample: !self.greedy,
            temperature: self.temperature,
            top_k: self.top_k,
            max_length: self.max_length,
            seed: self.seed,
            ..defaults
        }
    }
}

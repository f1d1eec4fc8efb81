//! A tiny randomly initialized GPT-J with a word-level tokenizer.
//!
//! Shared by unit tests and, through `#[path]`, by the integration tests, so
//! it only depends on external crates.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use serde_json::json;

pub const VOCAB: &[&str] = &[
    "<|endoftext|>",
    "<unk>",
    "in",
    "a",
    "shocking",
    "finding",
    "scientists",
    "discovered",
    "herd",
    "of",
    "unicorns",
    "living",
    "remote",
    "valley",
    "hello",
    "world",
];

pub const EOS_TOKEN_ID: u32 = 0;
pub const N_EMBD: usize = 16;
pub const N_HEAD: usize = 2;
pub const N_LAYER: usize = 2;
pub const ROTARY_DIM: usize = 4;
pub const N_POSITIONS: usize = 64;

pub fn config_json() -> String {
    json!({
        "model_type": "gptj",
        "vocab_size": VOCAB.len(),
        "n_positions": N_POSITIONS,
        "n_embd": N_EMBD,
        "n_layer": N_LAYER,
        "n_head": N_HEAD,
        "rotary_dim": ROTARY_DIM,
        "n_inner": null,
        "activation_function": "gelu_new",
        "layer_norm_epsilon": 1e-5,
        "bos_token_id": EOS_TOKEN_ID,
        "eos_token_id": EOS_TOKEN_ID,
        "tie_word_embeddings": false
    })
    .to_string()
}

/// Whitespace-split word-level tokenizer over [`VOCAB`], no padding defined.
pub fn tokenizer_json() -> String {
    let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(id, word)| (word.to_string(), json!(id)))
        .collect();
    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [{
            "id": EOS_TOKEN_ID,
            "content": VOCAB[EOS_TOKEN_ID as usize],
            "single_word": false,
            "lstrip": false,
            "rstrip": false,
            "normalized": false,
            "special": true
        }],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "<unk>"
        }
    })
    .to_string()
}

fn random(shape: &[usize]) -> Tensor {
    Tensor::randn(0f32, 0.5, shape, &Device::Cpu).unwrap()
}

pub fn tiny_weights() -> HashMap<String, Tensor> {
    let vocab = VOCAB.len();
    let inner = 4 * N_EMBD;
    let ones = Tensor::ones(N_EMBD, DType::F32, &Device::Cpu).unwrap();
    let zeros = Tensor::zeros(N_EMBD, DType::F32, &Device::Cpu).unwrap();

    let mut tensors = HashMap::new();
    tensors.insert("transformer.wte.weight".to_string(), random(&[vocab, N_EMBD]));
    for layer in 0..N_LAYER {
        let prefix = format!("transformer.h.{layer}");
        tensors.insert(format!("{prefix}.ln_1.weight"), ones.clone());
        tensors.insert(format!("{prefix}.ln_1.bias"), zeros.clone());
        for proj in ["q_proj", "k_proj", "v_proj", "out_proj"] {
            tensors.insert(format!("{prefix}.attn.{proj}.weight"), random(&[N_EMBD, N_EMBD]));
        }
        tensors.insert(format!("{prefix}.mlp.fc_in.weight"), random(&[inner, N_EMBD]));
        tensors.insert(format!("{prefix}.mlp.fc_in.bias"), random(&[inner]));
        tensors.insert(format!("{prefix}.mlp.fc_out.weight"), random(&[N_EMBD, inner]));
        tensors.insert(format!("{prefix}.mlp.fc_out.bias"), random(&[N_EMBD]));
    }
    tensors.insert("transformer.ln_f.weight".to_string(), ones);
    tensors.insert("transformer.ln_f.bias".to_string(), zeros);
    tensors.insert("lm_head.weight".to_string(), random(&[vocab, N_EMBD]));
    tensors.insert("lm_head.bias".to_string(), random(&[vocab]));
    tensors
}

/// Writes `config.json`, `tokenizer.json` and `model.safetensors` into `dir`.
pub fn write_snapshot(dir: &Path) {
    std::fs::write(dir.join("config.json"), config_json()).unwrap();
    std::fs::write(dir.join("tokenizer.json"), tokenizer_json()).unwrap();
    candle_core::safetensors::save(&tiny_weights(), dir.join("model.safetensors")).unwrap();
}

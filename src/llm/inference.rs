use candle_core::{Device, Result as CandleResult, Tensor};
use tracing::debug;

use crate::llm::causal_self_attention::KVCache;
use crate::llm::generation::GenerationConfig;
use crate::llm::models::Model;
use crate::llm::sampling::Sampler;

/// Left-padded prompt batch with the bookkeeping HF-style batched decoding
/// needs: one mask entry per token seen so far and the next position id per
/// row.
struct PaddedBatch {
    input_ids: Vec<Vec<u32>>,
    attention_mask: Vec<Vec<u32>>,
    positions: Vec<Vec<u32>>,
}

impl PaddedBatch {
    fn new(prompts: &[Vec<u32>], pad_token_id: u32) -> Self {
        let longest = prompts.iter().map(Vec::len).max().unwrap_or(0);
        let mut input_ids = Vec::with_capacity(prompts.len());
        let mut attention_mask = Vec::with_capacity(prompts.len());
        let mut positions = Vec::with_capacity(prompts.len());

        for prompt in prompts {
            let pad = longest - prompt.len();
            let mut ids = vec![pad_token_id; pad];
            ids.extend_from_slice(prompt);

            let mut mask = vec![0u32; pad];
            mask.extend(std::iter::repeat(1).take(prompt.len()));

            // padding gets position 1, real tokens count from 0
            let mut pos = vec![1u32; pad];
            pos.extend(0..prompt.len() as u32);

            input_ids.push(ids);
            attention_mask.push(mask);
            positions.push(pos);
        }

        Self {
            input_ids,
            attention_mask,
            positions,
        }
    }

    fn seq_len(&self) -> usize {
        self.input_ids.first().map(Vec::len).unwrap_or(0)
    }

    fn to_tensor(rows: &[Vec<u32>], device: &Device) -> CandleResult<Tensor> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let flat: Vec<u32> = rows.iter().flatten().copied().collect();
        Tensor::from_vec(flat, (rows.len(), width), device)
    }
}

/// Autoregressively extends every prompt in one batch.
///
/// Returns, per prompt, the generated tokens up to but excluding the first
/// EOS. Generation stops once every row produced EOS or the sequence reached
/// `config.max_length` (capped by the model's position limit).
pub fn generate(
    model: &dyn Model,
    prompts: &[Vec<u32>],
    config: &GenerationConfig,
    eos_token_id: u32,
    device: &Device,
) -> CandleResult<Vec<Vec<u32>>> {
    let batch_size = prompts.len();
    if batch_size == 0 {
        return Ok(Vec::new());
    }

    let mut batch = PaddedBatch::new(prompts, config.pad_token_id);
    let limit = config.max_length.min(model.max_positions());
    let new_tokens = limit.saturating_sub(batch.seq_len());

    let mut sampler = Sampler::new(config);
    let mut kv_caches: Vec<KVCache> = vec![KVCache::new(); model.num_layers()];
    let mut generated: Vec<Vec<u32>> = vec![Vec::new(); batch_size];
    let mut finished = vec![false; batch_size];
    let mut next_position: Vec<u32> = prompts.iter().map(|p| p.len() as u32).collect();

    // First pass covers the whole padded prompt, later passes one token per row.
    let mut step_ids = std::mem::take(&mut batch.input_ids);
    let mut step_positions = std::mem::take(&mut batch.positions);

    for step in 0..new_tokens {
        let input = PaddedBatch::to_tensor(&step_ids, device)?;
        let logits = model.forward_with_cache(
            &input,
            &step_positions,
            &batch.attention_mask,
            &mut kv_caches,
        )?;
        let logits = logits.to_vec2::<f32>()?;

        let mut next_tokens = Vec::with_capacity(batch_size);
        for (row, row_logits) in logits.iter().enumerate() {
            if finished[row] {
                next_tokens.push(config.pad_token_id);
                continue;
            }
            let token = sampler.sample(row_logits)?;
            if token == eos_token_id {
                finished[row] = true;
            } else {
                generated[row].push(token);
            }
            next_tokens.push(token);
        }

        if finished.iter().all(|&f| f) {
            debug!("All rows reached EOS after {} new tokens", step + 1);
            break;
        }

        for mask in batch.attention_mask.iter_mut() {
            mask.push(1);
        }
        step_ids = next_tokens.iter().map(|&t| vec![t]).collect();
        step_positions = next_position.iter().map(|&p| vec![p]).collect();
        for p in next_position.iter_mut() {
            *p += 1;
        }
    }

    Ok(generated)
}

use candle_core::Result as CandleResult;
use rand::distr::{weighted::WeightedIndex, Distribution};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::llm::generation::GenerationConfig;

enum Strategy {
    Greedy,
    TopK { k: usize, temperature: f64 },
}

/// Picks the next token from a row of logits.
pub struct Sampler {
    rng: StdRng,
    strategy: Strategy,
}

impl Sampler {
    pub fn new(config: &GenerationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let strategy = if config.do_sample {
            Strategy::TopK {
                k: config.top_k,
                temperature: config.temperature,
            }
        } else {
            Strategy::Greedy
        };
        Self { rng, strategy }
    }

    pub fn sample(&mut self, logits: &[f32]) -> CandleResult<u32> {
        if logits.is_empty() {
            candle_core::bail!("cannot sample from empty logits");
        }
        match self.strategy {
            Strategy::Greedy => Ok(argmax(logits)),
            Strategy::TopK { k, temperature } => {
                let weights = top_k_weights(logits, k, temperature);
                let dist = WeightedIndex::new(&weights)
                    .map_err(|e| candle_core::Error::msg(e.to_string()))?;
                Ok(dist.sample(&mut self.rng) as u32)
            }
        }
    }
}

fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

/// Unnormalized softmax weights over the `k` largest scaled logits; every
/// other entry is zero.
fn top_k_weights(logits: &[f32], k: usize, temperature: f64) -> Vec<f64> {
    let scaled: Vec<f64> = logits.iter().map(|&l| l as f64 / temperature).collect();

    let threshold = if k == 0 || k >= scaled.len() {
        f64::NEG_INFINITY
    } else {
        let mut sorted = scaled.clone();
        sorted.sort_unstable_by(|a, b| b.total_cmp(a));
        sorted[k - 1]
    };

    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    scaled
        .iter()
        .map(|&s| if s >= threshold { (s - max).exp() } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_takes_the_largest_logit() {
        let mut sampler = Sampler::new(&GenerationConfig::new(0).greedy());
        assert_eq!(sampler.sample(&[0.1, 3.0, -2.0, 2.9]).unwrap(), 1);
    }

    #[test]
    fn top_k_never_leaves_the_candidate_set() {
        let mut cfg = GenerationConfig::new(0);
        cfg.top_k = 2;
        cfg.seed = Some(42);
        let mut sampler = Sampler::new(&cfg);
        let logits = [5.0, -1.0, 4.5, 0.0, -3.0];
        for _ in 0..200 {
            let token = sampler.sample(&logits).unwrap();
            assert!(token == 0 || token == 2, "sampled {token}");
        }
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let mut cfg = GenerationConfig::new(0);
        cfg.seed = Some(7);
        let logits: Vec<f32> = (0..64).map(|i| (i % 5) as f32).collect();
        let a: Vec<u32> = {
            let mut s = Sampler::new(&cfg);
            (0..20).map(|_| s.sample(&logits).unwrap()).collect()
        };
        let b: Vec<u32> = {
            let mut s = Sampler::new(&cfg);
            (0..20).map(|_| s.sample(&logits).unwrap()).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn non_finite_logits_fail() {
        let mut sampler = Sampler::new(&GenerationConfig::new(0));
        assert!(sampler.sample(&[f32::NAN, f32::NAN]).is_err());
    }

    #[test]
    fn weights_keep_ties_at_the_threshold() {
        let weights = top_k_weights(&[1.0, 1.0, 0.0], 1, 1.0);
        assert_eq!(weights[0], 1.0);
        assert_eq!(weights[1], 1.0);
        assert_eq!(weights[2], 0.0);
    }
}

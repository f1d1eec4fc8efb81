/// Per-call generation parameters.
///
/// `max_length` bounds the whole sequence, prompt tokens included.
/// `pad_token_id` is resolved once when the worker is built and is the id
/// used both to left-pad a batch and to fill rows that already hit EOS.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub do_sample: bool,
    pub temperature: f64,
    /// Candidates kept when sampling; `0` keeps the whole vocabulary.
    pub top_k: usize,
    pub max_length: usize,
    pub seed: Option<u64>,
    pub pad_token_id: u32,
}

impl GenerationConfig {
    pub const DEFAULT_TEMPERATURE: f64 = 0.9;
    pub const DEFAULT_TOP_K: usize = 50;
    pub const DEFAULT_MAX_LENGTH: usize = 100;

    pub fn new(pad_token_id: u32) -> Self {
        Self {
            do_sample: true,
            temperature: Self::DEFAULT_TEMPERATURE,
            top_k: Self::DEFAULT_TOP_K,
            max_length: Self::DEFAULT_MAX_LENGTH,
            seed: None,
            pad_token_id,
        }
    }

    pub fn greedy(self) -> Self {
        Self {
            do_sample: false,
            ..self
        }
    }

    pub fn with_max_length(self, max_length: usize) -> Self {
        Self { max_length, ..self }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_length == 0 {
            return Err("max_length must be positive".to_string());
        }
        if self.do_sample && !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(format!(
                "temperature must be a positive number, got {}",
                self.temperature
            ));
        }
        Ok(())
    }
}

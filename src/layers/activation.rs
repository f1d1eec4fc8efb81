use candle_core::{Result as CandleResult, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Tanh approximation, `gelu_new` in GPT-J configs.
    GeluNew,
    Gelu,
    Relu,
    Silu,
}

impl Activation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gelu_new" | "gelu_pytorch_tanh" => Some(Activation::GeluNew),
            "gelu" => Some(Activation::Gelu),
            "relu" => Some(Activation::Relu),
            "silu" | "swish" => Some(Activation::Silu),
            _ => None,
        }
    }

    pub fn apply(&self, input: &Tensor) -> CandleResult<Tensor> {
        match self {
            Activation::GeluNew => input.gelu(),
            Activation::Gelu => input.gelu_erf(),
            Activation::Relu => input.relu(),
            Activation::Silu => input.silu(),
        }
    }
}

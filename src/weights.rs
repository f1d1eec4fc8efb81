//! Named tensor storage backing model construction.
//!
//! Safetensors files are memory-mapped and PyTorch pickles are read lazily,
//! so a tensor is only materialized when a layer asks for it, directly on
//! the device that layer lives on.

use std::collections::HashMap;
use std::path::PathBuf;

use candle_core::pickle::PthTensors;
use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Result as CandleResult, Tensor};

enum Source {
    Safetensors(MmapedSafetensors),
    Pickle {
        shards: Vec<PthTensors>,
        index: HashMap<String, usize>,
    },
    Memory(HashMap<String, Tensor>),
}

pub struct Weights {
    source: Source,
    dtype: DType,
}

impl Weights {
    pub fn from_safetensors(paths: &[PathBuf], dtype: DType) -> CandleResult<Self> {
        let mmaped = unsafe { MmapedSafetensors::multi(paths)? };
        Ok(Self {
            source: Source::Safetensors(mmaped),
            dtype,
        })
    }

    pub fn from_pickle(paths: &[PathBuf], dtype: DType) -> CandleResult<Self> {
        let mut shards = Vec::with_capacity(paths.len());
        let mut index = HashMap::new();
        for (shard, path) in paths.iter().enumerate() {
            let tensors = PthTensors::new(path, None)?;
            for name in tensors.tensor_infos().keys() {
                index.insert(name.clone(), shard);
            }
            shards.push(tensors);
        }
        Ok(Self {
            source: Source::Pickle { shards, index },
            dtype,
        })
    }

    pub fn from_tensors(tensors: HashMap<String, Tensor>, dtype: DType) -> Self {
        Self {
            source: Source::Memory(tensors),
            dtype,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        match &self.source {
            Source::Safetensors(st) => st.get(name).is_ok(),
            Source::Pickle { index, .. } => index.contains_key(name),
            Source::Memory(tensors) => tensors.contains_key(name),
        }
    }

    /// Loads `name` onto `device`, cast to the storage dtype.
    pub fn load(&self, name: &str, device: &Device) -> CandleResult<Tensor> {
        self.load_as(name, device, self.dtype)
    }

    pub fn load_as(&self, name: &str, device: &Device, dtype: DType) -> CandleResult<Tensor> {
        let tensor = match &self.source {
            Source::Safetensors(st) => st.load(name, device)?,
            Source::Pickle { shards, index } => {
                let shard = index
                    .get(name)
                    .ok_or_else(|| candle_core::Error::CannotFindTensor {
                        path: name.to_string(),
                    })?;
                shards[*shard]
                    .get(name)?
                    .ok_or_else(|| candle_core::Error::CannotFindTensor {
                        path: name.to_string(),
                    })?
                    .to_device(device)?
            }
            Source::Memory(tensors) => tensors
                .get(name)
                .ok_or_else(|| candle_core::Error::CannotFindTensor {
                    path: name.to_string(),
                })?
                .to_device(device)?,
        };
        tensor.to_dtype(dtype)
    }
}

use candle_core::{Device, Result as CandleResult};
use tracing::info;

/// Assignment of model parts to devices.
///
/// Decoder blocks are split into contiguous, near-equal ranges across the
/// visible devices. The embedding sits on the first device; the final norm
/// and LM head sit on the last.
#[derive(Debug, Clone)]
pub struct DevicePlan {
    devices: Vec<Device>,
    layer_devices: Vec<usize>,
}

impl DevicePlan {
    pub fn new(devices: Vec<Device>, num_layers: usize) -> Self {
        let devices = if devices.is_empty() {
            vec![Device::Cpu]
        } else {
            devices
        };
        let n = devices.len();
        let layer_devices = (0..num_layers).map(|i| i * n / num_layers.max(1)).collect();
        Self {
            devices,
            layer_devices,
        }
    }

    /// Every CUDA device the process can see, else Metal, else the CPU.
    pub fn detect(num_layers: usize, force_cpu: bool) -> CandleResult<Self> {
        if force_cpu {
            return Ok(Self::new(vec![Device::Cpu], num_layers));
        }

        let mut devices = Vec::new();
        if candle_core::utils::cuda_is_available() {
            let mut ordinal = 0;
            while let Ok(device) = Device::new_cuda(ordinal) {
                devices.push(device);
                ordinal += 1;
            }
        } else if candle_core::utils::metal_is_available() {
            devices.push(Device::new_metal(0)?);
        }
        if devices.is_empty() {
            info!("No accelerator available, running on CPU");
        } else {
            info!("Placing {} layers across {} device(s)", num_layers, devices.len());
        }
        Ok(Self::new(devices, num_layers))
    }

    pub fn first(&self) -> &Device {
        &self.devices[0]
    }

    pub fn last(&self) -> &Device {
        &self.devices[self.devices.len() - 1]
    }

    pub fn layer_device(&self, layer: usize) -> &Device {
        let idx = self.layer_devices.get(layer).copied().unwrap_or(0);
        &self.devices[idx]
    }

    /// Device index per decoder block.
    pub fn layer_assignment(&self) -> &[usize] {
        &self.layer_devices
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }
}

mod loading;

pub mod classes;
pub mod espnetv2;
pub mod palette;
pub mod postprocess;
pub mod preprocess;
pub mod relabel;
pub mod segmenter;

use anyhow::Result;
use candle_core::{Device, utils::metal_is_available};

pub use loading::load_var_builder;
pub use palette::{ColorMap, Palette, colorize, overlay};
pub use postprocess::{postprocess, resize_labels};
pub use preprocess::{MEAN, STD, preprocess};
pub use relabel::{IGNORE_LABEL, relabel, relabel_id};
pub use segmenter::Segmenter;

/// Name of the compute device being used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceName {
    Cpu,
    Cuda,
    Metal,
}

impl std::fmt::Display for DeviceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceName::Cpu => write!(f, "CPU"),
            DeviceName::Cuda => write!(f, "CUDA"),
            DeviceName::Metal => write!(f, "Metal"),
        }
    }
}

/// Returns the name of the device that would be selected.
pub fn device_name(cpu: bool) -> DeviceName {
    if cpu {
        DeviceName::Cpu
    } else if cuda_is_available() {
        DeviceName::Cuda
    } else if metal_is_available() {
        DeviceName::Metal
    } else {
        DeviceName::Cpu
    }
}

pub fn device(cpu: bool) -> Result<Device> {
    match device_name(cpu) {
        DeviceName::Cuda => Ok(Device::new_cuda(0)?),
        DeviceName::Metal => Ok(Device::new_metal(0)?),
        DeviceName::Cpu => {
            if !cpu {
                tracing::info!("CUDA and Metal are not available. Using CPU device.");
            }
            Ok(Device::Cpu)
        }
    }
}

pub fn cuda_is_available() -> bool {
    (unsafe {
        libloading::Library::new(if cfg!(target_os = "windows") {
            "nvcuda.dll"
        } else {
            "libcuda.so"
        })
        .is_ok()
    }) && cfg!(feature = "cuda")
}

/// The device every tensor of a run is placed on.
///
/// Selected once before any image is processed and passed explicitly to
/// preprocessing and inference afterwards.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    device: Device,
    name: DeviceName,
}

impl ExecutionContext {
    pub fn select(cpu: bool) -> Result<Self> {
        let device = device(cpu)?;
        let name = match &device {
            Device::Cpu => DeviceName::Cpu,
            Device::Cuda(_) => DeviceName::Cuda,
            Device::Metal(_) => DeviceName::Metal,
        };
        Ok(Self { device, name })
    }

    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            name: DeviceName::Cpu,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn name(&self) -> DeviceName {
        self.name
    }
}

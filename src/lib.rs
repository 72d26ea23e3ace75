pub mod error;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod scan;

pub use error::{CaptionError, Result};
pub use model::Captioner;
pub use pipeline::{caption_directory, Failure, Pipeline, RunSummary};
pub use scan::{scan, CaptionTask};

use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;

/// Picks the device every inference call of the run goes to.
///
/// `None` or `"auto"` prefers an accelerator (CUDA, then Metal) and falls
/// back to the CPU. An explicit accelerator that is missing also lands on the
/// CPU.
pub fn select_device(device: Option<&str>) -> Result<Device> {
    match device {
        None | Some("auto") => {
            if cuda_is_available() {
                Ok(Device::new_cuda(0)?)
            } else if metal_is_available() {
                Ok(Device::new_metal(0)?)
            } else {
                Ok(Device::Cpu)
            }
        }
        Some("cpu") => Ok(Device::Cpu),
        Some("cuda") => Ok(Device::cuda_if_available(0)?),
        Some("metal") => {
            if metal_is_available() {
                Ok(Device::new_metal(0)?)
            } else {
                Ok(Device::Cpu)
            }
        }
        Some(other) => match other.parse::<usize>() {
            Ok(ordinal) => Ok(Device::cuda_if_available(ordinal)?),
            Err(_) => Err(CaptionError::InvalidDevice(other.to_string())),
        },
    }
}

pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_always_selectable() {
        let device = select_device(Some("cpu")).unwrap();
        assert!(device.is_cpu());
        assert_eq!(device_label(&device), "cpu");
    }

    #[test]
    fn auto_without_accelerator_falls_back_to_cpu() {
        if cuda_is_available() || metal_is_available() {
            return;
        }
        assert!(select_device(None).unwrap().is_cpu());
        assert!(select_device(Some("auto")).unwrap().is_cpu());
    }

    #[test]
    fn missing_explicit_accelerator_falls_back_to_cpu() {
        if !cuda_is_available() {
            assert!(select_device(Some("cuda")).unwrap().is_cpu());
            assert!(select_device(Some("0")).unwrap().is_cpu());
            assert!(select_device(Some("1")).unwrap().is_cpu());
        }
        if !metal_is_available() {
            assert!(select_device(Some("metal")).unwrap().is_cpu());
        }
    }

    #[test]
    fn unknown_device_is_rejected() {
        match select_device(Some("tpu")) {
            Err(CaptionError::InvalidDevice(name)) => assert_eq!(name, "tpu"),
            other => panic!("expected InvalidDevice, got {other:?}"),
        }
    }
}

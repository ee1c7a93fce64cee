//! Execution device selection for the local backend.

use candle_core::Device;
use serde::Deserialize;

/// Accelerator tiers in probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTier {
    /// Apple Silicon unified-memory GPU.
    Metal,
    Cuda,
    Cpu,
}

impl std::fmt::Display for DeviceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metal => write!(f, "metal"),
            Self::Cuda => write!(f, "cuda"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Metal,
    Cuda,
    Cpu,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "metal" | "mps" => Ok(Self::Metal),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "cpu" => Ok(Self::Cpu),
            _ => Err(format!(
                "Invalid device preference: {}. Valid options: auto, metal, cuda, cpu",
                s
            )),
        }
    }
}

/// Capability probe. Returns an opened device when the tier is usable.
pub trait DeviceProbe {
    fn probe(&self, tier: DeviceTier) -> Option<Device>;
}

/// Probes through candle. Accelerator tiers only succeed when the crate is
/// built with the `metal` or `cuda` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct CandleProbe;

impl DeviceProbe for CandleProbe {
    fn probe(&self, tier: DeviceTier) -> Option<Device> {
        match tier {
            DeviceTier::Metal => {
                if !candle_core::utils::metal_is_available() {
                    return None;
                }
                match Device::new_metal(0) {
                    Ok(device) => Some(device),
                    Err(e) => {
                        tracing::warn!("Metal initialization failed: {}", e);
                        None
                    }
                }
            }
            DeviceTier::Cuda => {
                if !candle_core::utils::cuda_is_available() {
                    return None;
                }
                match Device::new_cuda(0) {
                    Ok(device) => Some(device),
                    Err(e) => {
                        tracing::warn!("CUDA initialization failed: {}", e);
                        None
                    }
                }
            }
            DeviceTier::Cpu => Some(Device::Cpu),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub tier: DeviceTier,
    pub device: Device,
}

impl SelectedDevice {
    pub fn cpu() -> Self {
        Self {
            tier: DeviceTier::Cpu,
            device: Device::Cpu,
        }
    }
}

/// Pick the execution device. CPU is never probed; it is the terminal
/// fallback.
pub fn select_device(preference: DevicePreference, probe: &dyn DeviceProbe) -> SelectedDevice {
    let tiers: &[DeviceTier] = match preference {
        DevicePreference::Auto => &[DeviceTier::Metal, DeviceTier::Cuda],
        DevicePreference::Metal => &[DeviceTier::Metal],
        DevicePreference::Cuda => &[DeviceTier::Cuda],
        DevicePreference::Cpu => &[],
    };

    for &tier in tiers {
        if let Some(device) = probe.probe(tier) {
            tracing::info!(%tier, "device selected");
            return SelectedDevice { tier, device };
        }
    }

    if preference != DevicePreference::Auto && preference != DevicePreference::Cpu {
        tracing::warn!(?preference, "requested device unavailable, falling back to CPU");
    }
    tracing::info!(tier = %DeviceTier::Cpu, "device selected");
    SelectedDevice::cpu()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct ScriptedProbe {
        available: Vec<DeviceTier>,
        calls: RefCell<Vec<DeviceTier>>,
    }

    impl ScriptedProbe {
        fn new(available: &[DeviceTier]) -> Self {
            Self {
                available: available.to_vec(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl DeviceProbe for ScriptedProbe {
        fn probe(&self, tier: DeviceTier) -> Option<Device> {
            self.calls.borrow_mut().push(tier);
            // Hand back a CPU device; only the tier matters here.
            self.available.contains(&tier).then_some(Device::Cpu)
        }
    }

    #[test]
    fn auto_prefers_metal_over_cuda() {
        let probe = ScriptedProbe::new(&[DeviceTier::Metal, DeviceTier::Cuda]);
        let selected = select_device(DevicePreference::Auto, &probe);
        assert_eq!(selected.tier, DeviceTier::Metal);
        assert_eq!(*probe.calls.borrow(), vec![DeviceTier::Metal]);
    }

    #[test]
    fn auto_falls_through_to_cuda_then_cpu() {
        let probe = ScriptedProbe::new(&[DeviceTier::Cuda]);
        assert_eq!(select_device(DevicePreference::Auto, &probe).tier, DeviceTier::Cuda);

        let probe = ScriptedProbe::new(&[]);
        let selected = select_device(DevicePreference::Auto, &probe);
        assert_eq!(selected.tier, DeviceTier::Cpu);
        assert!(matches!(selected.device, Device::Cpu));
        assert_eq!(*probe.calls.borrow(), vec![DeviceTier::Metal, DeviceTier::Cuda]);
    }

    #[test]
    fn forced_tier_probes_only_that_tier() {
        let probe = ScriptedProbe::new(&[DeviceTier::Metal]);
        let selected = select_device(DevicePreference::Cuda, &probe);
        assert_eq!(selected.tier, DeviceTier::Cpu);
        assert_eq!(*probe.calls.borrow(), vec![DeviceTier::Cuda]);
    }

    #[test]
    fn cpu_preference_skips_probing() {
        let probe = ScriptedProbe::new(&[DeviceTier::Metal, DeviceTier::Cuda]);
        assert_eq!(select_device(DevicePreference::Cpu, &probe).tier, DeviceTier::Cpu);
        assert!(probe.calls.borrow().is_empty());
    }

    #[test]
    fn candle_probe_always_has_cpu() {
        assert!(matches!(CandleProbe.probe(DeviceTier::Cpu), Some(Device::Cpu)));
    }

    #[test]
    fn preference_from_str() {
        assert_eq!("MPS".parse::<DevicePreference>(), Ok(DevicePreference::Metal));
        assert_eq!("gpu".parse::<DevicePreference>(), Ok(DevicePreference::Cuda));
        assert!("tpu".parse::<DevicePreference>().is_err());
    }
}

use crate::config::runtime::Device;

/// NVIDIA GPU passthrough for the managed container. Only constructed when
/// passthrough is actually enabled, so `Option<GpuConfig>` on the container
/// config is the whole decision.
#[derive(Debug, Clone)]
pub struct GpuConfig;

impl GpuConfig {
    /// Decide whether to pass the host GPUs through. Requires both the
    /// resolved device to be `cuda` and `nvidia-smi` on the host PATH;
    /// anything less falls back to CPU mode, never a hard failure.
    pub fn detect(device: Device) -> Option<Self> {
        if passthrough_enabled(device, nvidia_tool_present()) {
            Some(Self)
        } else {
            None
        }
    }

    /// Extra environment the NVIDIA runtime expects inside the container.
    pub fn container_env() -> [(&'static str, &'static str); 2] {
        [
            ("NVIDIA_VISIBLE_DEVICES", "all"),
            ("NVIDIA_DRIVER_CAPABILITIES", "compute,utility"),
        ]
    }

    /// Device request handing all host GPUs to the container.
    pub fn device_request() -> bollard::models::DeviceRequest {
        bollard::models::DeviceRequest {
            driver: Some("nvidia".to_string()),
            count: Some(-1), // All available GPUs
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }
    }
}

/// Whether a GPU-query tool is detectable on the host.
pub fn nvidia_tool_present() -> bool {
    which::which("nvidia-smi").is_ok()
}

pub fn passthrough_enabled(device: Device, nvidia_tool: bool) -> bool {
    device == Device::Cuda && nvidia_tool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_never_enables_passthrough() {
        assert!(!passthrough_enabled(Device::Cpu, true));
        assert!(!passthrough_enabled(Device::Cpu, false));
    }

    #[test]
    fn cuda_requires_the_query_tool() {
        assert!(passthrough_enabled(Device::Cuda, true));
        assert!(!passthrough_enabled(Device::Cuda, false));
    }
}

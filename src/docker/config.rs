use crate::docker::gpu::GpuConfig;

/// Liveness probe attached to the container: black-box HTTP reachability of
/// the internal port on a fixed schedule.
#[derive(Debug, Clone)]
pub struct HealthcheckSpec {
    pub cmd: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub start_period_secs: u64,
    pub retries: i64,
}

impl HealthcheckSpec {
    pub fn http_port(port: u16) -> Self {
        Self {
            cmd: format!("curl -fs http://localhost:{}/ || exit 1", port),
            interval_secs: 30,
            timeout_secs: 10,
            start_period_secs: 60,
            retries: 3,
        }
    }
}

pub struct ContainerConfig {
    pub image: String,
    pub name: Option<String>,
    pub command: Option<Vec<String>>,
    pub env_vars: Vec<(String, String)>,
    pub mounts: Vec<(String, String, bool)>, // (host, container, readonly)
    pub ports: Vec<(u16, u16)>,              // (host, container)
    pub healthcheck: Option<HealthcheckSpec>,
    pub gpu: Option<GpuConfig>,
    pub workdir: Option<String>,
    pub remove_on_exit: bool,
    pub detach: bool,
    pub tty: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthcheck_probes_the_internal_port() {
        let spec = HealthcheckSpec::http_port(8585);
        assert!(spec.cmd.contains("localhost:8585"));
        assert_eq!(spec.interval_secs, 30);
        assert_eq!(spec.timeout_secs, 10);
        assert_eq!(spec.start_period_secs, 60);
        assert_eq!(spec.retries, 3);
    }
}

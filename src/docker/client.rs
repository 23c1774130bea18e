use anyhow::{Context, Result};
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::BuildImageOptions;
use bollard::models::{HealthConfig, HostConfig, PortBinding};
use futures::StreamExt;
use indicatif::ProgressBar;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use super::config::ContainerConfig;
use super::gpu::GpuConfig;

/// Docker client wrapper for the lifecycle controller
pub struct DockerClient {
    docker: bollard::Docker,
}

/// Observed state of the managed instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Absent,
    Stopped { status: String },
    Running { health: Option<String> },
}

impl DockerClient {
    /// Create a new Docker client
    pub async fn new() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon. Is Docker running?")?;

        // Verify connection
        docker
            .ping()
            .await
            .context("Failed to ping Docker daemon")?;

        Ok(Self { docker })
    }

    /// Check whether an image exists under the given tag
    pub async fn image_exists(&self, tag: &str) -> Result<bool> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Build a Docker image from a Dockerfile and context directory
    pub async fn build_image(
        &self,
        dockerfile: &Path,
        context: &Path,
        tag: &str,
        build_args: &HashMap<String, String>,
        no_cache: bool,
    ) -> Result<()> {
        // Create tar archive of context
        let tar_path = std::env::temp_dir().join(format!(
            "medraxctl-build-{}-{}.tar",
            std::process::id(),
            chrono::Utc::now().timestamp()
        ));

        // Use tar command to create archive
        let tar_str = tar_path
            .to_str()
            .context("Temp path contains invalid UTF-8")?;
        let context_str = context
            .to_str()
            .context("Context path contains invalid UTF-8")?;
        let status = std::process::Command::new("tar")
            .args(["--no-xattrs", "-cf", tar_str, "-C", context_str, "."])
            .status()
            .context("Failed to create build context tar")?;

        if !status.success() {
            anyhow::bail!("Failed to create build context");
        }

        let tar_contents = tokio::fs::read(&tar_path).await?;
        tokio::fs::remove_file(&tar_path).await.ok();

        let dockerfile_rel = dockerfile
            .strip_prefix(context)
            .unwrap_or(dockerfile)
            .to_str()
            .unwrap_or("Dockerfile");

        let options = BuildImageOptions {
            t: tag,
            dockerfile: dockerfile_rel,
            nocache: no_cache,
            buildargs: build_args
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            rm: true,
            ..Default::default()
        };

        let spinner = ProgressBar::new_spinner();
        spinner.enable_steady_tick(Duration::from_millis(120));

        let mut stream = self
            .docker
            .build_image(options, None, Some(tar_contents.into()));

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(step) = info.stream {
                        let msg = step.trim();
                        if !msg.is_empty() {
                            tracing::debug!("{}", msg);
                            spinner.set_message(msg.to_string());
                        }
                    }
                    if let Some(error) = info.error {
                        spinner.finish_and_clear();
                        return Err(anyhow::anyhow!("Build failed: {}", error));
                    }
                }
                Err(e) => {
                    spinner.finish_and_clear();
                    return Err(anyhow::anyhow!("Build failed: {}", e));
                }
            }
        }

        spinner.finish_and_clear();
        Ok(())
    }

    /// Report the state of the named container
    pub async fn instance_state(&self, name: &str) -> Result<InstanceState> {
        let inspect = match self.docker.inspect_container(name, None).await {
            Ok(inspect) => inspect,
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(InstanceState::Absent),
            Err(e) => return Err(e.into()),
        };

        let state = inspect.state.unwrap_or_default();
        let running = state.running.unwrap_or(false);

        if running {
            let health = state
                .health
                .and_then(|h| h.status)
                .map(|s| s.to_string());
            Ok(InstanceState::Running { health })
        } else {
            let status = state
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "stopped".to_string());
            Ok(InstanceState::Stopped { status })
        }
    }

    /// Force-remove the named container if present. Returns whether one existed.
    pub async fn remove_if_exists(&self, name: &str) -> Result<bool> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Gracefully stop and remove the named container. Returns whether one
    /// existed; an absent container is not an error.
    pub async fn stop_and_remove(&self, name: &str) -> Result<bool> {
        match self.docker.stop_container(name, None).await {
            Ok(()) => {}
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(false),
            // Already stopped; still remove it below
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }

        self.remove_if_exists(name).await?;
        Ok(true)
    }

    /// Create and start a container in detached mode
    pub async fn run_detached(&self, config: &ContainerConfig) -> Result<String> {
        let container_id = self.create_container(config).await?;

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await?;

        Ok(container_id)
    }

    /// Run a container and wait for it to complete, streaming its output
    pub async fn run_attached(&self, config: &ContainerConfig) -> Result<i64> {
        let container_id = self.create_container(config).await?;

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await?;

        // Stream logs
        let log_options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut log_stream = self.docker.logs(&container_id, Some(log_options));

        while let Some(result) = log_stream.next().await {
            match result {
                Ok(output) => {
                    print!("{}", output);
                }
                Err(e) => {
                    tracing::warn!("Log stream error: {}", e);
                    break;
                }
            }
        }

        let exit_code = self.wait_for_exit(&container_id).await;

        if config.remove_on_exit {
            self.remove_if_exists(&container_id).await.ok();
        }

        Ok(exit_code)
    }

    /// Run a container interactively, wiring host stdin through to it
    pub async fn run_interactive(&self, config: &ContainerConfig) -> Result<i64> {
        let container_id = self.create_container(config).await?;

        let attach_options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            ..Default::default()
        };

        let AttachContainerResults {
            mut output,
            mut input,
        } = self
            .docker
            .attach_container(&container_id, Some(attach_options))
            .await?;

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await?;

        let stdin_task = tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            tokio::io::copy(&mut stdin, &mut input).await.ok();
        });

        while let Some(result) = output.next().await {
            match result {
                Ok(chunk) => {
                    print!("{}", chunk);
                    std::io::stdout().flush().ok();
                }
                Err(e) => {
                    tracing::warn!("Attach stream error: {}", e);
                    break;
                }
            }
        }

        stdin_task.abort();

        let exit_code = self.wait_for_exit(&container_id).await;

        if config.remove_on_exit {
            self.remove_if_exists(&container_id).await.ok();
        }

        Ok(exit_code)
    }

    /// Stream the named container's output until interrupted
    pub async fn follow_logs(&self, name: &str, tail: usize) -> Result<()> {
        let log_options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut log_stream = self.docker.logs(name, Some(log_options));

        while let Some(result) = log_stream.next().await {
            match result {
                Ok(output) => {
                    print!("{}", output);
                    std::io::stdout().flush().ok();
                }
                Err(e) => {
                    tracing::warn!("Log stream error: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run a command inside a running container, attached to the terminal
    pub async fn exec_interactive(&self, name: &str, cmd: Vec<String>) -> Result<i64> {
        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    cmd: Some(cmd),
                    ..Default::default()
                },
            )
            .await?;

        if let StartExecResults::Attached {
            mut output,
            mut input,
        } = self.docker.start_exec(&exec.id, None).await?
        {
            let stdin_task = tokio::spawn(async move {
                let mut stdin = tokio::io::stdin();
                tokio::io::copy(&mut stdin, &mut input).await.ok();
            });

            while let Some(result) = output.next().await {
                match result {
                    Ok(chunk) => {
                        print!("{}", chunk);
                        std::io::stdout().flush().ok();
                    }
                    Err(e) => {
                        tracing::warn!("Exec stream error: {}", e);
                        break;
                    }
                }
            }

            stdin_task.abort();
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        Ok(inspect.exit_code.unwrap_or(0))
    }

    async fn wait_for_exit(&self, container_id: &str) -> i64 {
        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut wait_stream = self.docker.wait_container(container_id, Some(wait_options));
        if let Some(result) = wait_stream.next().await {
            match result {
                Ok(response) => response.status_code,
                Err(e) => {
                    tracing::warn!("Wait error: {}", e);
                    -1
                }
            }
        } else {
            0
        }
    }

    /// Create a container (helper method)
    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        let mut env: Vec<String> = config
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        // Build bind mounts
        let binds: Vec<String> = config
            .mounts
            .iter()
            .map(|(host, container, ro)| {
                if *ro {
                    format!("{}:{}:ro", host, container)
                } else {
                    format!("{}:{}", host, container)
                }
            })
            .collect();

        // Published ports
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for (host_port, container_port) in &config.ports {
            let key = format!("{}/tcp", container_port);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        let mut host_config = HostConfig {
            binds: Some(binds),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            auto_remove: Some(config.remove_on_exit && config.detach),
            ..Default::default()
        };

        // GPU passthrough, decided upstream; absent means CPU-mode flags only
        if config.gpu.is_some() {
            host_config.device_requests = Some(vec![GpuConfig::device_request()]);
            for (k, v) in GpuConfig::container_env() {
                env.push(format!("{}={}", k, v));
            }
        }

        let healthcheck = config.healthcheck.as_ref().map(|h| HealthConfig {
            test: Some(vec!["CMD-SHELL".to_string(), h.cmd.clone()]),
            interval: Some(h.interval_secs as i64 * 1_000_000_000),
            timeout: Some(h.timeout_secs as i64 * 1_000_000_000),
            start_period: Some(h.start_period_secs as i64 * 1_000_000_000),
            retries: Some(h.retries),
            ..Default::default()
        });

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: config.command.clone(),
            env: Some(env),
            working_dir: config.workdir.clone(),
            tty: Some(config.tty),
            open_stdin: Some(!config.detach),
            attach_stdin: Some(!config.detach),
            attach_stdout: Some(!config.detach),
            attach_stderr: Some(!config.detach),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            healthcheck,
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = config.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, container_config)
            .await?;

        Ok(response.id)
    }
}

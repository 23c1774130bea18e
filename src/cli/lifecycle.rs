use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::config::runtime::{
    Device, RuntimeConfig, CONTAINER_NAME, CONTAINER_PORT, ENV_FILE, HOST_PORT, IMAGE_TAG,
};
use crate::docker::client::{DockerClient, InstanceState};
use crate::docker::config::{ContainerConfig, HealthcheckSpec};
use crate::docker::gpu::GpuConfig;
use crate::utils::paths;

/// Build the agent image from ./Dockerfile
pub async fn build(no_cache: bool, build_args: &[String]) -> Result<()> {
    let dockerfile = Path::new("Dockerfile");
    if !dockerfile.exists() {
        anyhow::bail!("No Dockerfile found in the current directory");
    }

    let args = parse_build_args(build_args)?;
    let client = DockerClient::new().await?;

    println!("{} Building {}...", "=>".blue().bold(), IMAGE_TAG.cyan());

    let context = std::env::current_dir().context("Failed to get current directory")?;
    client
        .build_image(dockerfile, &context, IMAGE_TAG, &args, no_cache)
        .await?;

    println!("{} Image built: {}", "✓".green().bold(), IMAGE_TAG.cyan());
    Ok(())
}

/// Start the agent container, replacing any existing instance
pub async fn start() -> Result<()> {
    let config = RuntimeConfig::resolve()?;
    check_credential(&config)?;

    let client = DockerClient::new().await?;

    if !client.image_exists(IMAGE_TAG).await? {
        println!(
            "{} Image {} not found, building it first...",
            "!".yellow().bold(),
            IMAGE_TAG.cyan()
        );
        build(false, &[]).await?;
    }

    paths::ensure_host_dirs(&config)?;
    for dir in paths::writable_dirs(&config) {
        paths::make_world_writable(&dir);
    }

    if client.remove_if_exists(CONTAINER_NAME).await? {
        println!(
            "{} Removed previous {} container",
            "•".yellow(),
            CONTAINER_NAME.cyan()
        );
    }

    let gpu = GpuConfig::detect(config.device);
    if config.device == Device::Cuda && gpu.is_none() {
        println!(
            "{} DEVICE=cuda but nvidia-smi was not found; starting without GPU passthrough",
            "!".yellow().bold()
        );
    }
    if gpu.is_some() {
        println!("  {} GPU passthrough enabled", "•".yellow());
    }

    println!(
        "{} Starting {} ({}, model {})...",
        "=>".blue().bold(),
        CONTAINER_NAME.cyan(),
        config.device.as_str(),
        config.model.cyan()
    );

    let container_config = instance_config(&config, gpu)?;
    let container_id = client
        .run_detached(&container_config)
        .await
        .context("Failed to start the agent container")?;

    println!(
        "{} Container started: {}",
        "✓".green().bold(),
        short_id(&container_id).cyan()
    );
    println!("  Web UI: http://localhost:{}", HOST_PORT);
    println!("  Logs:   {}", "medraxctl logs".cyan());

    Ok(())
}

/// Stop and remove the agent container. Absent container is a no-op.
pub async fn stop() -> Result<()> {
    let client = DockerClient::new().await?;

    println!(
        "{} Stopping {}...",
        "=>".blue().bold(),
        CONTAINER_NAME.cyan()
    );

    if client.stop_and_remove(CONTAINER_NAME).await? {
        println!("{} Container stopped and removed", "✓".green().bold());
    } else {
        println!("{} Container is not running", "!".yellow().bold());
    }

    Ok(())
}

/// Stop, pause briefly so the runtime releases ports, then start
pub async fn restart() -> Result<()> {
    stop().await?;
    tokio::time::sleep(Duration::from_secs(2)).await;
    start().await
}

/// Report the instance state
pub async fn status(json: bool) -> Result<()> {
    let config = RuntimeConfig::resolve()?;
    let client = DockerClient::new().await?;
    let state = client.instance_state(CONTAINER_NAME).await?;

    if json {
        let (state_str, detail, health) = match &state {
            InstanceState::Absent => ("absent", None, None),
            InstanceState::Stopped { status } => ("stopped", Some(status.clone()), None),
            InstanceState::Running { health } => ("running", None, health.clone()),
        };
        let report = serde_json::json!({
            "container": CONTAINER_NAME,
            "image": IMAGE_TAG,
            "state": state_str,
            "status": detail,
            "health": health,
            "url": format!("http://localhost:{}", HOST_PORT),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match state {
        InstanceState::Absent => {
            println!("{} Container does not exist", "●".red());
            println!("  Start it with: {}", "medraxctl start".cyan());
        }
        InstanceState::Stopped { status } => {
            println!("{} Container is {} ({})", "●".yellow(), "stopped".yellow().bold(), status);
            println!("  Start it with: {}", "medraxctl start".cyan());
        }
        InstanceState::Running { health } => {
            println!("{} Container is {}", "●".green(), "running".green().bold());
            println!("  URL: http://localhost:{}", HOST_PORT);
            match health.as_deref() {
                Some("healthy") => println!("  Health: {}", "OK".green()),
                Some("starting") => println!("  Health: {}", "STARTING".yellow()),
                Some("unhealthy") => println!("  Health: {}", "UNHEALTHY".red()),
                _ => println!("  Health: {}", "UNKNOWN".yellow()),
            }
        }
    }

    Ok(())
}

/// Stream container logs until interrupted; detaching does not stop the
/// instance.
pub async fn logs(tail: usize) -> Result<()> {
    let client = DockerClient::new().await?;

    if client.instance_state(CONTAINER_NAME).await? == InstanceState::Absent {
        println!("{} Container does not exist", "!".yellow().bold());
        println!("  Start it with: {}", "medraxctl start".cyan());
        return Ok(());
    }

    client.follow_logs(CONTAINER_NAME, tail).await
}

/// Open an interactive shell: exec into the running instance, or launch a
/// fresh interactive container from the image if none is running.
pub async fn shell() -> Result<()> {
    run_in_instance(vec!["/bin/bash".to_string()]).await
}

/// Run a command inside the instance, forwarding the trailing args. Falls
/// back to a fresh interactive container like `shell` when none is running.
pub async fn exec(args: &[String]) -> Result<()> {
    run_in_instance(args.to_vec()).await
}

/// Exec a command in the running instance, or launch a fresh interactive
/// `--rm` container running it when no instance is up.
async fn run_in_instance(command: Vec<String>) -> Result<()> {
    let client = DockerClient::new().await?;

    if let InstanceState::Running { .. } = client.instance_state(CONTAINER_NAME).await? {
        let code = client.exec_interactive(CONTAINER_NAME, command).await?;
        if code != 0 {
            std::process::exit(code as i32);
        }
        return Ok(());
    }

    println!(
        "{} No running container, launching a fresh interactive one...",
        "!".yellow().bold()
    );

    let config = RuntimeConfig::resolve()?;
    if !client.image_exists(IMAGE_TAG).await? {
        anyhow::bail!(
            "Image {} not found. Build it first with: medraxctl build",
            IMAGE_TAG
        );
    }

    paths::ensure_host_dirs(&config)?;
    let gpu = GpuConfig::detect(config.device);

    let container_config = interactive_config(&config, gpu, command)?;
    let code = client.run_interactive(&container_config).await?;
    if code != 0 {
        std::process::exit(code as i32);
    }
    Ok(())
}

/// Remove the instance and delete transient host state. Cache, weights, and
/// log directories are preserved.
pub async fn cleanup() -> Result<()> {
    let config = RuntimeConfig::resolve()?;
    let client = DockerClient::new().await?;

    if client.stop_and_remove(CONTAINER_NAME).await? {
        println!("{} Container stopped and removed", "✓".green().bold());
    }

    for dir in paths::transient_dirs(&config) {
        if remove_dir_if_present(&dir)? {
            println!("{} Removed {}", "✓".green().bold(), dir.display());
        }
    }

    println!(
        "  Preserved: {}, {}, {}",
        paths::logs_dir().display(),
        paths::weights_dir(&config).display(),
        config.model_cache_dir
    );

    Ok(())
}

/// Pre-download model weights into the mounted cache so the long-running
/// instance starts warm.
pub async fn prefetch() -> Result<()> {
    let config = RuntimeConfig::resolve()?;
    let client = DockerClient::new().await?;

    if !client.image_exists(IMAGE_TAG).await? {
        println!(
            "{} Image {} not found, building it first...",
            "!".yellow().bold(),
            IMAGE_TAG.cyan()
        );
        build(false, &[]).await?;
    }

    paths::ensure_host_dirs(&config)?;
    for dir in paths::writable_dirs(&config) {
        paths::make_world_writable(&dir);
    }

    println!(
        "{} Downloading model weights into {}...",
        "=>".blue().bold(),
        config.model_cache_dir.cyan()
    );

    let container_config = ContainerConfig {
        image: IMAGE_TAG.to_string(),
        name: None,
        command: Some(vec![
            "python".to_string(),
            "download_weights.py".to_string(),
        ]),
        env_vars: config.container_env(),
        mounts: paths::prefetch_mounts(&config)?,
        ports: Vec::new(),
        healthcheck: None,
        gpu: None,
        workdir: None,
        remove_on_exit: true,
        detach: false,
        tty: false,
    };

    let code = client.run_attached(&container_config).await?;
    if code == 0 {
        println!("{} Model weights are in place", "✓".green().bold());
    } else {
        println!(
            "{} Weight download exited with code {}",
            "✗".red().bold(),
            code
        );
        std::process::exit(code as i32);
    }

    Ok(())
}

/// Pre-flight: refuse to start without the external-service credential,
/// explaining the two ways to supply it.
fn check_credential(config: &RuntimeConfig) -> Result<()> {
    if config.has_credential() {
        return Ok(());
    }

    eprintln!("{} OPENAI_API_KEY is not set", "✗".red().bold());
    eprintln!("  Provide it one of two ways:");
    eprintln!(
        "    1. Inline:          {}",
        "OPENAI_API_KEY=sk-... medraxctl start".cyan()
    );
    eprintln!(
        "    2. Credential file: {}",
        format!("echo 'OPENAI_API_KEY=sk-...' >> {}", ENV_FILE).cyan()
    );
    if Path::new(ENV_FILE).exists() {
        eprintln!(
            "  ({} exists but does not define OPENAI_API_KEY)",
            ENV_FILE
        );
    }

    anyhow::bail!("missing required credential OPENAI_API_KEY")
}

/// Configuration for a fresh one-shot interactive container: same image,
/// env, and mounts as the instance, but anonymous, unpublished, and removed
/// on exit so it never collides with the fixed identity.
fn interactive_config(
    config: &RuntimeConfig,
    gpu: Option<GpuConfig>,
    command: Vec<String>,
) -> Result<ContainerConfig> {
    let mut container_config = instance_config(config, gpu)?;
    container_config.name = None;
    container_config.command = Some(command);
    container_config.ports.clear();
    container_config.healthcheck = None;
    container_config.remove_on_exit = true;
    container_config.detach = false;
    container_config.tty = true;
    Ok(container_config)
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Assemble the long-running instance configuration from resolved settings
fn instance_config(config: &RuntimeConfig, gpu: Option<GpuConfig>) -> Result<ContainerConfig> {
    Ok(ContainerConfig {
        image: IMAGE_TAG.to_string(),
        name: Some(CONTAINER_NAME.to_string()),
        command: None, // image entrypoint runs the agent
        env_vars: config.container_env(),
        mounts: paths::mounts(config)?,
        ports: vec![(HOST_PORT, CONTAINER_PORT)],
        healthcheck: Some(HealthcheckSpec::http_port(CONTAINER_PORT)),
        gpu,
        workdir: None,
        remove_on_exit: false,
        detach: true,
        tty: false,
    })
}

fn parse_build_args(args: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();

    for arg in args {
        let parts: Vec<&str> = arg.splitn(2, '=').collect();
        if parts.len() != 2 {
            anyhow::bail!(
                "Invalid build argument format: {}. Expected KEY=VALUE",
                arg
            );
        }
        map.insert(parts[0].to_string(), parts[1].to_string());
    }

    Ok(map)
}

fn remove_dir_if_present(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(dir)
        .with_context(|| format!("Failed to remove directory: {}", dir.display()))?;
    Ok(true)
}

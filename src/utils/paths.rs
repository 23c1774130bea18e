use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::runtime::RuntimeConfig;

/// Fixed container-side mount points the agent expects.
pub const CONTAINER_TEMP: &str = "/medrax/temp";
pub const CONTAINER_LOGS: &str = "/medrax/logs";
pub const CONTAINER_WEIGHTS: &str = "/model-weights";
pub const CONTAINER_HF_CACHE: &str = "/root/.cache/huggingface";
pub const CONTAINER_XRV_CACHE: &str = "/root/.torchxrayvision";
pub const CONTAINER_MISC_CACHE: &str = "/medrax/.cache";

/// Transient host directory, deleted by `cleanup`.
pub fn temp_dir(config: &RuntimeConfig) -> PathBuf {
    PathBuf::from(&config.temp_dir)
}

/// Persistent host log directory.
pub fn logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// Persistent host model-weight directory.
pub fn weights_dir(config: &RuntimeConfig) -> PathBuf {
    PathBuf::from(&config.model_weights_path)
}

/// Persistent host cache subdirectories under the cache root.
pub fn cache_subdirs(config: &RuntimeConfig) -> Vec<PathBuf> {
    let root = PathBuf::from(&config.model_cache_dir);
    vec![
        root.join("huggingface"),
        root.join("torchxrayvision"),
        root.join(".cache"),
    ]
}

/// Host directories `cleanup` deletes. Logs, weights, and caches are
/// persistent and must never appear here.
pub fn transient_dirs(config: &RuntimeConfig) -> Vec<PathBuf> {
    vec![temp_dir(config)]
}

/// Directories the in-container process must be able to write; these get the
/// permission-adjustment treatment before start.
pub fn writable_dirs(config: &RuntimeConfig) -> Vec<PathBuf> {
    let mut dirs = vec![weights_dir(config)];
    dirs.extend(cache_subdirs(config));
    dirs
}

/// Create every host directory the container mounts, if absent.
pub fn ensure_host_dirs(config: &RuntimeConfig) -> Result<()> {
    let mut dirs = vec![temp_dir(config), logs_dir(), weights_dir(config)];
    dirs.extend(cache_subdirs(config));

    for dir in dirs {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(())
}

/// Make a directory world-writable so the lower-privileged process inside the
/// container can write to it. Failure is downgraded to a warning; the
/// container may still work if permissions already happen to be sufficient.
pub fn make_world_writable(dir: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777)) {
            tracing::warn!("Could not adjust permissions on {}: {}", dir.display(), e);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

/// Host-path -> container-path bindings for the instance, all read/write.
pub fn mounts(config: &RuntimeConfig) -> Result<Vec<(String, String, bool)>> {
    let caches = cache_subdirs(config);
    let pairs: [(PathBuf, &str); 6] = [
        (temp_dir(config), CONTAINER_TEMP),
        (logs_dir(), CONTAINER_LOGS),
        (weights_dir(config), CONTAINER_WEIGHTS),
        (caches[0].clone(), CONTAINER_HF_CACHE),
        (caches[1].clone(), CONTAINER_XRV_CACHE),
        (caches[2].clone(), CONTAINER_MISC_CACHE),
    ];

    pairs
        .into_iter()
        .map(|(host, container)| Ok((absolute(&host)?, container.to_string(), false)))
        .collect()
}

/// Bindings needed by the weight pre-download run: weights and caches only.
pub fn prefetch_mounts(config: &RuntimeConfig) -> Result<Vec<(String, String, bool)>> {
    Ok(mounts(config)?
        .into_iter()
        .filter(|(_, container, _)| {
            container != CONTAINER_TEMP && container != CONTAINER_LOGS
        })
        .collect())
}

fn absolute(path: &Path) -> Result<String> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(path)
    };

    path.to_str()
        .map(|s| s.to_string())
        .context("Path contains invalid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::runtime::RuntimeConfig;

    fn config() -> RuntimeConfig {
        RuntimeConfig::resolve_with(|_| None).unwrap()
    }

    #[test]
    fn mounts_cover_every_fixed_container_path() {
        let mounts = mounts(&config()).unwrap();
        let targets: Vec<&str> = mounts.iter().map(|(_, c, _)| c.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                CONTAINER_TEMP,
                CONTAINER_LOGS,
                CONTAINER_WEIGHTS,
                CONTAINER_HF_CACHE,
                CONTAINER_XRV_CACHE,
                CONTAINER_MISC_CACHE,
            ]
        );
        assert!(mounts.iter().all(|(host, _, ro)| {
            Path::new(host).is_absolute() && !ro
        }));
    }

    #[test]
    fn prefetch_mounts_skip_temp_and_logs() {
        let mounts = prefetch_mounts(&config()).unwrap();
        assert_eq!(mounts.len(), 4);
        assert!(mounts.iter().all(|(_, c, _)| c != CONTAINER_TEMP && c != CONTAINER_LOGS));
    }

    #[test]
    fn custom_weights_path_is_respected() {
        let config = RuntimeConfig::resolve_with(|key| match key {
            "MODEL_WEIGHTS_PATH" => Some("/srv/weights".to_string()),
            _ => None,
        })
        .unwrap();
        let mounts = mounts(&config).unwrap();
        assert!(mounts.contains(&(
            "/srv/weights".to_string(),
            CONTAINER_WEIGHTS.to_string(),
            false
        )));
    }

    #[test]
    fn cleanup_targets_only_the_temp_dir() {
        let config = config();
        let transient = transient_dirs(&config);
        assert_eq!(transient, vec![PathBuf::from("temp")]);

        // Persistent state must never be selected for deletion
        assert!(!transient.contains(&logs_dir()));
        assert!(!transient.contains(&weights_dir(&config)));
        for cache in cache_subdirs(&config) {
            assert!(!transient.contains(&cache));
        }
    }

    #[test]
    fn cleanup_respects_a_custom_temp_dir() {
        let config = RuntimeConfig::resolve_with(|key| match key {
            "TEMP_DIR" => Some("scratch".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(transient_dirs(&config), vec![PathBuf::from("scratch")]);
        assert!(!transient_dirs(&config).contains(&weights_dir(&config)));
    }

    #[test]
    fn writable_dirs_are_weights_plus_caches() {
        let dirs = writable_dirs(&config());
        assert_eq!(dirs.len(), 4);
        assert_eq!(dirs[0], PathBuf::from("./model-weights"));
    }
}

//! Delivery config loading
//!
//! Reads delivery configs from JSON files, or from every `*.json` file in a
//! directory, and stores them. Stored configs are validated by the
//! repository.

use crate::error::{DaemonError, DaemonResult};
use keel_registry::DeliveryConfigRepository;
use keel_types::DeliveryConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Files named by `paths`; directories contribute their `*.json` files in
/// name order
pub(crate) fn json_files(paths: &[PathBuf]) -> DaemonResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

/// Parse every delivery config under `paths`
pub fn read_delivery_configs(paths: &[PathBuf]) -> DaemonResult<Vec<DeliveryConfig>> {
    json_files(paths)?.iter().map(|file| read_file(file)).collect()
}

fn read_file(path: &Path) -> DaemonResult<DeliveryConfig> {
    debug!(path = %path.display(), "Reading delivery config");
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|source| DaemonError::DeliveryConfig {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and store every delivery config under `paths`; returns how many
/// were stored
pub async fn load_delivery_configs(
    repository: &dyn DeliveryConfigRepository,
    paths: &[PathBuf],
) -> DaemonResult<usize> {
    let configs = read_delivery_configs(paths)?;
    let count = configs.len();
    for config in configs {
        info!(
            delivery_config = %config.name,
            application = %config.application,
            environments = config.environments.len(),
            "Delivery config loaded"
        );
        repository.put(config).await?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_registry::InMemoryDeliveryConfigRepository;

    const CONFIG: &str = r#"{
        "name": "fnord-manifest",
        "application": "fnord",
        "service_account": "keel@example.com",
        "artifacts": [{"name": "fnord", "type": "deb", "versioning": {"type": "debian"}}],
        "environments": [{"name": "test"}]
    }"#;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("keeld-loader-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_loads_directory_of_configs() {
        let dir = scratch_dir();
        std::fs::write(dir.join("fnord.json"), CONFIG).unwrap();
        std::fs::write(dir.join("README.md"), "not a config").unwrap();

        let repository = InMemoryDeliveryConfigRepository::new();
        let count = load_delivery_configs(&repository, &[dir.clone()]).await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(count, 1);
        assert!(repository.get("fnord-manifest").await.unwrap().is_some());
    }

    #[test]
    fn test_malformed_config_names_the_file() {
        let dir = scratch_dir();
        let path = dir.join("broken.json");
        std::fs::write(&path, "{").unwrap();

        let err = read_delivery_configs(&[path.clone()]).unwrap_err();
        std::fs::remove_dir_all(&dir).unwrap();

        match err {
            DaemonError::DeliveryConfig { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_delivery_configs(&[PathBuf::from("/nonexistent/keel.json")]).unwrap_err();
        assert!(matches!(err, DaemonError::Io(_)));
    }
}

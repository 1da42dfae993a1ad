//! upqueue configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/upqueue/config.toml`
//! - Windows: `%APPDATA%/upqueue/config.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use upqueue_queue::QueueOptions;
use upqueue_transfer::UploadOptions;

/// upqueue configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upload policy applied to every file.
    #[serde(default)]
    pub upload: UploadOptions,

    /// Queue scheduling policy.
    #[serde(default)]
    pub queue: QueueOptions,
}

impl Config {
    /// Loads configuration from `path` (or the default location), creating
    /// a default file if none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Headers may carry credentials.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("upqueue")
            .join("config.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("upqueue").join("config.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/upqueue/config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.upload.url.is_empty());
        assert_eq!(config.upload.method, "POST");
        assert_eq!(config.upload.item_alias, "file");
        assert!(!config.queue.parallel);
        assert!(!config.queue.remove_after_upload);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            [upload]
            url = "https://example.test/upload"
            max_file_size = 1048576
            allowed_file_type = ["image", "pdf"]

            [upload.headers]
            Authorization = "Bearer abc"

            [upload.additional_parameter]
            key = "uploads/{{file_name}}"
            acl = "private"

            [queue]
            parallel = true
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.upload.url, "https://example.test/upload");
        assert_eq!(config.upload.max_file_size, Some(1_048_576));
        assert_eq!(
            config.upload.allowed_file_type,
            Some(vec!["image".to_string(), "pdf".to_string()])
        );
        assert_eq!(
            config.upload.headers.get("Authorization").unwrap(),
            "Bearer abc"
        );
        assert_eq!(config.upload.additional_parameter.len(), 2);
        assert_eq!(config.upload.method, "POST");
        assert!(config.queue.parallel);
        assert!(!config.queue.remove_after_upload);
    }

    #[test]
    fn config_roundtrip_toml() {
        let mut config = Config::default();
        config.upload.url = "https://example.test/upload".into();
        config.upload.max_file_size = Some(500);
        config.queue.remove_after_upload = true;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.upload.url, "https://example.test/upload");
        assert_eq!(parsed.upload.max_file_size, Some(500));
        assert!(parsed.queue.remove_after_upload);
    }

    #[test]
    fn config_path_not_empty() {
        let path = config_path().unwrap();
        assert!(path.to_string_lossy().contains("upqueue"));
    }

    #[test]
    fn load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        assert!(config.upload.url.is_empty());

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.upload.method, "POST");
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");

        let mut config = Config::default();
        config.upload.url = "https://example.test/saved".into();
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.upload.url, "https://example.test/saved");
    }
}

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use color_eyre::eyre::{Context, Result};
use config::{Config, ConfigError};

use crate::retry::{RetryOptions, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base directory every relative path below is resolved against.
    pub data_folder: PathBuf,
    pub interpreter: String,
    pub tool: String,
    pub language: String,
    pub cookies_file: PathBuf,
    pub download_folder: PathBuf,
    pub record_file: PathBuf,
    pub log_file: PathBuf,
    pub max_retries: usize,
    pub retry_delay_secs: u64,
    pub exponential_backoff: bool,
}

impl AppConfig {
    pub fn get() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("data_folder", ".")?
            .set_default("interpreter", "python")?
            .set_default("tool", "gamdl")?
            .set_default("language", "zh-CN")?
            .set_default("cookies_file", "cookies.txt")?
            .set_default("download_folder", "download")?
            .set_default("record_file", "download_record.txt")?
            .set_default("log_file", "log.txt")?
            .set_default("max_retries", 10i64)?
            .set_default("retry_delay_secs", 0i64)?
            .set_default("exponential_backoff", false)?
            .add_source(config::File::with_name("amdl").required(false))
            .add_source(
                config::Environment::default()
                    .prefix("AMDL")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.data_folder.join(path)
        }
    }

    pub fn cookies_path(&self) -> PathBuf {
        self.resolve(&self.cookies_file)
    }

    pub fn record_path(&self) -> PathBuf {
        self.resolve(&self.record_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.log_file)
    }

    /// Returns the default download directory, creating it if it does not exist yet.
    pub fn ensure_download_folder(&self) -> Result<PathBuf> {
        let path = self.resolve(&self.download_folder);

        if !path.exists() {
            debug!("creating download folder at {}", path.display());
            std::fs::create_dir_all(&path).wrap_err("failed to create download folder")?;
        }

        Ok(path)
    }

    pub fn retry_options(&self) -> RetryOptions {
        let policy = match (self.retry_delay_secs, self.exponential_backoff) {
            (0, _) => RetryPolicy::Immediate,
            (secs, false) => RetryPolicy::Delay(Duration::from_secs(secs)),
            (secs, true) => RetryPolicy::Exponential(Duration::from_secs(secs)),
        };

        RetryOptions::from_policy(policy).with_max_retries(self.max_retries)
    }
}

#[cfg(test)]
pub(crate) fn test_config(data_folder: &Path) -> AppConfig {
    AppConfig {
        data_folder: data_folder.to_owned(),
        interpreter: "python".to_string(),
        tool: "gamdl".to_string(),
        language: "zh-CN".to_string(),
        cookies_file: PathBuf::from("cookies.txt"),
        download_folder: PathBuf::from("download"),
        record_file: PathBuf::from("download_record.txt"),
        log_file: PathBuf::from("log.txt"),
        max_retries: 10,
        retry_delay_secs: 0,
        exponential_backoff: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_resolve_against_data_folder() {
        let config = test_config(Path::new("/srv/amdl"));

        assert_eq!(config.cookies_path(), PathBuf::from("/srv/amdl/cookies.txt"));
        assert_eq!(
            config.record_path(),
            PathBuf::from("/srv/amdl/download_record.txt")
        );
        assert_eq!(config.log_path(), PathBuf::from("/srv/amdl/log.txt"));
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let mut config = test_config(Path::new("/srv/amdl"));
        config.cookies_file = PathBuf::from("/etc/amdl/cookies.txt");

        assert_eq!(config.cookies_path(), PathBuf::from("/etc/amdl/cookies.txt"));
    }

    #[test]
    fn test_download_folder_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let path = config.ensure_download_folder().unwrap();

        assert_eq!(path, dir.path().join("download"));
        assert!(path.is_dir());
    }

    #[test]
    fn test_retry_options_from_config() {
        let mut config = test_config(Path::new("."));

        let options = config.retry_options();
        assert_eq!(options.max_retries, Some(10));
        assert!(matches!(options.policy, RetryPolicy::Immediate));

        config.retry_delay_secs = 2;
        config.exponential_backoff = true;
        let options = config.retry_options();
        assert!(matches!(
            options.policy,
            RetryPolicy::Exponential(d) if d == Duration::from_secs(2)
        ));
    }
}

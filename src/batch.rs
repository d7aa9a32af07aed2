//! Works through a list of URLs one at a time.
//!
//! After every URL the list of URLs that still need downloading is written to disk, so an
//! interrupted batch can be picked up again with `amdl resume`.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use color_eyre::eyre::{Context, Result};
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    config::AppConfig,
    event::EventSink,
    gamdl::Download,
    nonewrap::Nonewrap,
    retry::{download_with_retry, RetryOptions},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub success: bool,
    pub error_urls: Vec<String>,
}

/// Split raw input into URLs, one per line. Surrounding whitespace (including the `\r` of
/// CRLF input) is trimmed and blank lines are dropped. Duplicates are kept.
pub fn split_urls(text: &str) -> Vec<String> {
    text.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// The URLs of the current batch that have not been downloaded yet.
#[derive(Debug)]
pub struct RemainingRecord {
    path: PathBuf,
    urls: Vec<String>,
}

impl RemainingRecord {
    pub fn new(path: impl Into<PathBuf>, urls: Vec<String>) -> Self {
        Self {
            path: path.into(),
            urls,
        }
    }

    /// Read a previously persisted record. A missing file is an empty record.
    pub async fn load(path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(path)
            .await
            .wrap_err("failed to read download record")?;

        Ok(split_urls(&contents))
    }

    /// Removes the first occurrence of `url` only.
    pub fn mark_downloaded(&mut self, url: &str) {
        if let Some(idx) = self.urls.iter().position(|u| u == url) {
            self.urls.remove(idx);
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Overwrite the file with the current contents, one URL per line.
    pub async fn persist(&self) -> std::io::Result<()> {
        fs::write(&self.path, self.urls.join("\n")).await
    }
}

/// Append a timestamped entry listing `failed` to the log at `path`.
pub async fn append_failure_log(path: impl AsRef<Path>, failed: &[String]) -> std::io::Result<()> {
    let entry = format!(
        "\n{} download failed: {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        failed.join("\n")
    );

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    file.write_all(entry.as_bytes()).await?;
    file.flush().await
}

pub struct Batch<'a> {
    downloader: &'a dyn Download,
    sink: &'a dyn EventSink,
    options: RetryOptions,
    record_path: PathBuf,
    log_path: PathBuf,
}

impl<'a> Batch<'a> {
    pub fn new(
        downloader: &'a dyn Download,
        sink: &'a dyn EventSink,
        options: RetryOptions,
        record_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader,
            sink,
            options,
            record_path: record_path.into(),
            log_path: log_path.into(),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        downloader: &'a dyn Download,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self::new(
            downloader,
            sink,
            config.retry_options(),
            config.record_path(),
            config.log_path(),
        )
    }

    /// Download every URL in `url_text` into `output_path`, strictly in order. A failing
    /// URL never stops the ones after it.
    #[instrument(skip(self, url_text))]
    pub async fn run(&self, url_text: &str, output_path: &Path) -> BatchResult {
        let urls = split_urls(url_text);
        let mut remaining = RemainingRecord::new(&self.record_path, urls.clone());
        let mut failed = Vec::new();

        info!("downloading {} urls", urls.len());

        for (idx, url) in urls.iter().enumerate() {
            info!("[{}/{}] {}", idx + 1, urls.len(), url);

            let outcome =
                download_with_retry(self.downloader, url, output_path, self.sink, self.options)
                    .await;

            if outcome.is_success() {
                remaining.mark_downloaded(url);
            } else {
                error!("failed to download {}: {}", url, outcome.message);
                failed.push(url.clone());
            }

            remaining
                .persist()
                .await
                .nonewrap("failed to write download record");
        }

        if !failed.is_empty() {
            append_failure_log(&self.log_path, &failed)
                .await
                .nonewrap("failed to write failure log");
        }

        info!(
            "batch finished, {} of {} urls failed, {} left in the download record",
            failed.len(),
            urls.len(),
            remaining.urls().len()
        );

        BatchResult {
            success: failed.is_empty(),
            error_urls: failed,
        }
    }
}

use std::{path::Path, time::Duration};

use crate::{
    event::{EventSink, ProgressEvent},
    gamdl::{Download, DownloadOutcome, Failure},
};

#[derive(Debug, Clone, Copy, Default)]
pub enum RetryPolicy {
    /// Retry immediately.
    #[default]
    Immediate,
    /// Retry after a delay.
    Delay(Duration),
    /// Retry after a delay, with exponential backoff.
    Exponential(Duration),
}

impl RetryPolicy {
    /// How long to wait before retry number `retry` (starting at 1).
    pub fn delay(&self, retry: usize) -> Option<Duration> {
        match self {
            Self::Immediate => None,
            Self::Delay(delay) => Some(*delay),
            Self::Exponential(delay) => {
                let exp = retry.saturating_sub(1).min(16) as u32;
                Some(*delay * 2u32.pow(exp))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    /// The maximum number of retries after a failed run. If `None`, retries are unlimited.
    pub max_retries: Option<usize>,
    /// The retry policy.
    pub policy: RetryPolicy,
}

impl Default for RetryOptions {
    fn default() -> Self {
        DEFAULT_OPTIONS
    }
}

impl RetryOptions {
    pub const fn new() -> Self {
        Self {
            max_retries: None,
            policy: RetryPolicy::Immediate,
        }
    }

    pub const fn from_policy(policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..Self::new()
        }
    }

    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub const fn from_max_retries(max_retries: usize) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Self::new()
        }
    }
}

pub const DEFAULT_OPTIONS: RetryOptions = RetryOptions::from_max_retries(10);

/// Download `url` until it succeeds or the retry budget runs out.
///
/// There are two ways back around the loop:
/// - the tool reported a known transient problem (`need_redownload`). This restarts the
///   run straight away and does not touch the retry budget, no matter how often it happens.
/// - the run failed. This counts against `options.max_retries`, tells `sink` which attempt
///   is next and waits according to `options.policy`.
///
/// A missing cookies file is never retried since nothing will change between attempts.
#[instrument(skip(downloader, output_path, sink, options))]
pub async fn download_with_retry(
    downloader: &dyn Download,
    url: &str,
    output_path: &Path,
    sink: &dyn EventSink,
    options: RetryOptions,
) -> DownloadOutcome {
    let mut retries = 0;

    loop {
        let outcome = downloader.download(url, output_path, sink).await;

        if outcome.need_redownload {
            debug!("tool asked for a redownload, starting over");
            continue;
        }

        let Some(failure) = outcome.failure else {
            trace!("downloaded after {} retries", retries);
            return outcome;
        };

        if failure == Failure::MissingCredentials {
            return outcome;
        }

        retries += 1;

        if options.max_retries.is_some_and(|max| retries > max) {
            error!("giving up after {} retries: {:?}", retries - 1, outcome.error);
            return outcome;
        }

        warn!("{} ({:?}), retrying ({})", outcome.message, failure, retries);
        sink.emit(ProgressEvent::error(format!(
            "download failed, retrying (attempt {retries})"
        )));

        if let Some(delay) = options.policy.delay(retries) {
            tokio::time::sleep(delay).await;
        }
    }
}

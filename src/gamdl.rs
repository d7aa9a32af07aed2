//! Runs gamdl for a single URL and reports what happened.
//!
//! Nothing in here returns an error: every way a run can go wrong ends up as a
//! [`DownloadOutcome`] so the caller can decide whether to try again.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};

use crate::{
    config::AppConfig,
    event::{EventSink, ProgressEvent},
};

/// stderr text that means the run hit a known transient problem and should simply be
/// started again.
const TRANSIENT_SIGNATURES: &[&str] = &["SSL: UNEXPECTED_EOF_WHILE_READING", "Failed to download"];

const READ_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The cookies file was missing, nothing was launched.
    MissingCredentials,
    /// The tool exited unsuccessfully. `None` if it was killed by a signal or could not be
    /// waited on.
    Exit(Option<i32>),
    /// The tool could not be launched at all.
    Spawn,
}

/// The result of a single gamdl run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub failure: Option<Failure>,
    pub message: String,
    /// Everything the tool wrote to stdout.
    pub output: String,
    pub error: Option<String>,
    /// Set when a transient signature showed up on stderr of a run that otherwise
    /// exited cleanly.
    pub need_redownload: bool,
}

impl DownloadOutcome {
    pub fn completed(output: String, need_redownload: bool) -> Self {
        Self {
            failure: None,
            message: "download complete".to_string(),
            output,
            error: None,
            need_redownload,
        }
    }

    pub fn failed(failure: Failure, message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            failure: Some(failure),
            message: message.into(),
            output: String::new(),
            error: Some(error.into()),
            need_redownload: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

#[async_trait]
pub trait Download: Send + Sync {
    /// Run one download of `url` into `output_path`, streaming output to `sink`.
    async fn download(&self, url: &str, output_path: &Path, sink: &dyn EventSink)
        -> DownloadOutcome;
}

/// Launches `<interpreter> -m <tool> <url> --cookies-path .. --output-path .. --language ..`.
#[derive(Debug, Clone)]
pub struct Gamdl {
    pub interpreter: String,
    pub tool: String,
    pub language: String,
    pub cookies_path: PathBuf,
}

impl Gamdl {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            tool: config.tool.clone(),
            language: config.language.clone(),
            cookies_path: config.cookies_path(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.interpreter);

        cmd.args(["-m", &self.tool]);

        cmd
    }

    /// Whether `<interpreter> -m <tool> --version` exits successfully.
    #[instrument(skip(self), fields(tool = %self.tool))]
    pub async fn is_installed(&self) -> bool {
        let mut cmd = self.command();

        cmd.arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match cmd.status().await {
            Ok(status) => {
                debug!("version check exited with {}", status);
                status.success()
            }
            Err(err) => {
                debug!("version check could not be launched: {}", err);
                false
            }
        }
    }
}

#[async_trait]
impl Download for Gamdl {
    #[instrument(skip(self, sink))]
    async fn download(
        &self,
        url: &str,
        output_path: &Path,
        sink: &dyn EventSink,
    ) -> DownloadOutcome {
        if !self.cookies_path.exists() {
            let message = format!(
                "cookies file not found at {:?}. please make sure the cookies file is in the correct location.",
                self.cookies_path
            );

            error!("{}", message);
            sink.emit(ProgressEvent::error(&message));

            return DownloadOutcome::failed(
                Failure::MissingCredentials,
                message,
                "credential file not found",
            );
        }

        let mut cmd = self.command();

        cmd.arg(url)
            .arg("--cookies-path")
            .arg(&self.cookies_path)
            .arg("--output-path")
            .arg(output_path)
            .arg("--language")
            .arg(&self.language);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        trace!("launching {:?}", cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!("failed to launch {}: {}", self.interpreter, err);

                return DownloadOutcome::failed(
                    Failure::Spawn,
                    "failed to start download process",
                    err.to_string(),
                );
            }
        };

        let mut output = String::new();
        let mut errors = String::new();
        let mut need_redownload = false;

        let stdout = read_chunks(child.stdout.take(), |chunk| {
            output.push_str(chunk);
            sink.emit(ProgressEvent::progress(chunk));
        });

        let stderr = read_chunks(child.stderr.take(), |chunk| {
            errors.push_str(chunk);

            if TRANSIENT_SIGNATURES.iter().any(|sig| chunk.contains(sig)) {
                debug!("transient failure signature in stderr");
                sink.emit(ProgressEvent::error("needs re-download"));
                need_redownload = true;
            }

            sink.emit(ProgressEvent::error(chunk));
        });

        futures::future::join(stdout, stderr).await;

        let status = match child.wait().await {
            Ok(status) => status,
            Err(err) => {
                warn!("failed to wait on {}: {}", self.interpreter, err);

                return DownloadOutcome::failed(Failure::Exit(None), "download failed", err.to_string());
            }
        };

        if status.success() {
            debug!(need_redownload, "tool exited successfully");
            DownloadOutcome::completed(output, need_redownload)
        } else {
            debug!("tool exited with {}", status);
            DownloadOutcome::failed(Failure::Exit(status.code()), "download failed", errors)
        }
    }
}

/// Read `reader` to the end, handing each decoded chunk to `on_chunk`.
async fn read_chunks<R, F>(reader: Option<R>, mut on_chunk: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let Some(mut reader) = reader else {
        return;
    };

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut decoder = ChunkDecoder::default();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    on_chunk(&text);
                }
            }
            Err(err) => {
                warn!("failed to read tool output: {}", err);
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        on_chunk(&rest);
    }
}

/// Decodes UTF-8 that arrives in arbitrary pieces. A multi-byte character split across
/// two reads is held back until the rest of it arrives.
#[derive(Debug, Default)]
struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));

                    match err.error_len() {
                        // incomplete sequence at the end, wait for more bytes
                        None => {
                            self.pending.drain(..valid_up_to);
                            return text;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                    }
                }
            }
        }
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{testing::CollectingSink, EventKind};

    #[test]
    fn test_decoder_holds_back_split_characters() {
        let mut decoder = ChunkDecoder::default();
        let bytes = "下载完成".as_bytes();

        let first = decoder.decode(&bytes[..4]);
        let second = decoder.decode(&bytes[4..]);

        assert_eq!(first, "下");
        assert_eq!(second, "载完成");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = ChunkDecoder::default();

        assert_eq!(decoder.decode(b"ok\xffok"), "ok\u{fffd}ok");

        // a dangling lead byte is flushed lossily at the end
        assert_eq!(decoder.decode(b"end\xe4"), "end");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }

    #[tokio::test]
    async fn test_missing_cookies_does_not_launch() {
        let dir = tempfile::tempdir().unwrap();
        let gamdl = Gamdl {
            interpreter: "/definitely/not/a/python".to_string(),
            tool: "gamdl".to_string(),
            language: "zh-CN".to_string(),
            cookies_path: dir.path().join("cookies.txt"),
        };
        let sink = CollectingSink::default();

        let outcome = gamdl
            .download("https://music.apple.com/album/1", dir.path(), &sink)
            .await;

        assert_eq!(outcome.failure, Some(Failure::MissingCredentials));
        assert_eq!(outcome.error.as_deref(), Some("credential file not found"));
        assert!(outcome.message.contains("cookies.txt"));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
        assert_eq!(events[0].data, outcome.message);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let cookies_path = dir.path().join("cookies.txt");
        std::fs::write(&cookies_path, "").unwrap();

        let gamdl = Gamdl {
            interpreter: dir.path().join("no-such-python").to_string_lossy().to_string(),
            tool: "gamdl".to_string(),
            language: "zh-CN".to_string(),
            cookies_path,
        };

        let outcome = gamdl
            .download("https://music.apple.com/album/1", dir.path(), &CollectingSink::default())
            .await;

        assert_eq!(outcome.failure, Some(Failure::Spawn));
        assert_eq!(outcome.message, "failed to start download process");
        assert!(outcome.error.is_some());
        assert!(!gamdl.is_installed().await);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::gamdl::testing::fake_interpreter;

        #[tokio::test]
        async fn test_successful_run_streams_stdout() {
            let dir = tempfile::tempdir().unwrap();
            let gamdl = fake_interpreter(
                dir.path(),
                r#"shift 2
echo "[download] 45.2% of ~ 8.31MiB at 1.02MiB/s ETA 00:12 (frag 3/5)"
exit 0"#,
            );
            let sink = CollectingSink::default();

            let outcome = gamdl
                .download("https://music.apple.com/album/1", dir.path(), &sink)
                .await;

            assert!(outcome.is_success());
            assert_eq!(outcome.message, "download complete");
            assert!(!outcome.need_redownload);
            assert!(outcome.output.contains("[download] 45.2%"));

            let progress = sink
                .events()
                .into_iter()
                .filter(|e| e.kind == EventKind::Progress)
                .map(|e| e.data)
                .collect::<String>();
            assert_eq!(progress, outcome.output);
        }

        #[tokio::test]
        async fn test_passes_fixed_arguments() {
            let dir = tempfile::tempdir().unwrap();
            let gamdl = fake_interpreter(dir.path(), r#"echo "$@""#);
            let output_path = dir.path().join("download");

            let outcome = gamdl
                .download("https://music.apple.com/album/1", &output_path, &CollectingSink::default())
                .await;

            assert_eq!(
                outcome.output.trim_end(),
                format!(
                    "-m gamdl https://music.apple.com/album/1 --cookies-path {} --output-path {} --language zh-CN",
                    gamdl.cookies_path.display(),
                    output_path.display()
                )
            );
        }

        #[tokio::test]
        async fn test_transient_signature_requests_redownload() {
            let dir = tempfile::tempdir().unwrap();
            let gamdl = fake_interpreter(
                dir.path(),
                r#"echo "[ERROR] Failed to download \"Some Song\"" >&2
exit 0"#,
            );
            let sink = CollectingSink::default();

            let outcome = gamdl
                .download("https://music.apple.com/album/1", dir.path(), &sink)
                .await;

            assert!(outcome.is_success());
            assert!(outcome.need_redownload);

            let errors = sink.errors();
            assert!(errors.iter().any(|e| e == "needs re-download"));
            assert!(errors.iter().any(|e| e.contains("Failed to download")));
        }

        #[tokio::test]
        async fn test_nonzero_exit_carries_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let gamdl = fake_interpreter(
                dir.path(),
                r#"echo "partial output"
echo "SSL: UNEXPECTED_EOF_WHILE_READING" >&2
exit 3"#,
            );

            let outcome = gamdl
                .download("https://music.apple.com/album/1", dir.path(), &CollectingSink::default())
                .await;

            assert_eq!(outcome.failure, Some(Failure::Exit(Some(3))));
            assert_eq!(outcome.message, "download failed");
            assert!(outcome
                .error
                .as_deref()
                .is_some_and(|e| e.contains("UNEXPECTED_EOF")));
            // only a clean exit carries the redownload request
            assert!(!outcome.need_redownload);
        }

        #[tokio::test]
        async fn test_version_check() {
            let dir = tempfile::tempdir().unwrap();

            let installed = fake_interpreter(
                dir.path(),
                r#"[ "$3" = "--version" ] && echo "gamdl 2.4" && exit 0
exit 1"#,
            );
            assert!(installed.is_installed().await);

            let broken = fake_interpreter(dir.path(), "exit 1");
            assert!(!broken.is_installed().await);
        }
    }
}

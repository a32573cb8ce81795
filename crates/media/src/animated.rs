//! Animated stickers via an external ffmpeg process.
//!
//! Source bytes go to a scratch input file, ffmpeg writes an animated WebP
//! next to it, and the output is read back. Both scratch files are
//! [`TempPath`]s, removed when dropped, so every exit path cleans up,
//! including timeouts and early `?` returns.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use {
    tempfile::{Builder, TempPath},
    tokio::process::Command,
    tracing::{debug, warn},
};

use {
    crate::{
        error::{Context, Error, Result},
        options::ConversionOptions,
    },
    stickerbot_metrics::{counter, transcoder as transcoder_metrics},
};

/// How to invoke the transcoder.
#[derive(Debug, Clone)]
pub struct TranscoderSettings {
    /// Binary name or path.
    pub binary: String,
    pub timeout: Duration,
    /// `-threads` value; 0 lets ffmpeg decide.
    pub threads: u32,
    /// Where scratch files are created.
    pub temp_dir: PathBuf,
}

impl Default for TranscoderSettings {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".into(),
            timeout: Duration::from_secs(60),
            threads: 0,
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Locate a binary: an existing path wins, otherwise search `PATH`.
#[must_use]
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.components().count() > 1 && path.is_file() {
        return Some(path.to_path_buf());
    }
    which::which(name).ok()
}

/// ffmpeg arguments: scale into `size × size` keeping aspect ratio, pad with
/// transparency, encode looping WebP.
#[must_use]
pub fn transcode_args(
    input: &Path,
    output: &Path,
    options: &ConversionOptions,
    threads: u32,
) -> Vec<OsString> {
    let size = options.size;
    let filter = format!(
        "scale={size}:{size}:force_original_aspect_ratio=decrease,format=rgba,\
         pad={size}:{size}:(ow-iw)/2:(oh-ih)/2:color=#00000000"
    );
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-y".into(), "-i".into()];
    args.push(input.as_os_str().to_owned());
    for arg in [
        "-vf".to_string(),
        filter,
        "-vcodec".into(),
        "libwebp".into(),
        "-lossless".into(),
        "1".into(),
        "-quality".into(),
        options.quality.to_string(),
        "-preset".into(),
        "default".into(),
        "-loop".into(),
        "0".into(),
        "-an".into(),
        "-vsync".into(),
        "0".into(),
        "-threads".into(),
        threads.to_string(),
    ] {
        args.push(arg.into());
    }
    args.push(output.as_os_str().to_owned());
    args
}

/// Runs the transcoder for one job.
#[derive(Debug, Clone)]
pub struct Transcoder {
    settings: TranscoderSettings,
}

impl Transcoder {
    #[must_use]
    pub fn new(settings: TranscoderSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &TranscoderSettings {
        &self.settings
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        find_binary(&self.settings.binary).is_some()
    }

    /// Unique `temp-{millis}-{random}-{suffix}` path in the temp dir. The
    /// file exists (empty) and is removed when the returned path drops.
    fn scratch_path(&self, millis: u128, suffix: &str) -> Result<TempPath> {
        std::fs::create_dir_all(&self.settings.temp_dir).with_context(|| {
            format!(
                "failed to create temp dir {}",
                self.settings.temp_dir.display()
            )
        })?;
        let file = Builder::new()
            .prefix(&format!("temp-{millis}-"))
            .suffix(suffix)
            .rand_bytes(8)
            .tempfile_in(&self.settings.temp_dir)
            .context("failed to create scratch file")?;
        Ok(file.into_temp_path())
    }

    /// Convert animated media bytes to an animated WebP.
    pub async fn transcode(&self, data: &[u8], options: &ConversionOptions) -> Result<Vec<u8>> {
        let binary = find_binary(&self.settings.binary).ok_or_else(|| {
            Error::transcoder(format!("{} not found in PATH", self.settings.binary))
        })?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let input = self.scratch_path(millis, "-input.mp4")?;
        let output = self.scratch_path(millis, "-output.webp")?;

        tokio::fs::write(&input, data)
            .await
            .context("failed to write transcoder input")?;

        let mut cmd = Command::new(&binary);
        cmd.args(transcode_args(
            &input,
            &output,
            options,
            self.settings.threads,
        ))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        debug!(
            binary = %binary.display(),
            input = %input.display(),
            size = options.size,
            quality = options.quality,
            "running transcoder"
        );
        counter!(transcoder_metrics::RUNS_TOTAL).increment(1);
        let started = Instant::now();

        // Dropping the output future on timeout kills the child.
        let result = tokio::time::timeout(self.settings.timeout, cmd.output()).await;
        let out = match result {
            Ok(out) => out.context("failed to run transcoder")?,
            Err(_) => {
                counter!(transcoder_metrics::TIMEOUTS_TOTAL).increment(1);
                warn!(
                    timeout_secs = self.settings.timeout.as_secs(),
                    "transcoder timed out, killed"
                );
                return Err(Error::Timeout {
                    elapsed: started.elapsed(),
                });
            },
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail = stderr.lines().rev().find(|l| !l.trim().is_empty());
            return Err(Error::transcoder(match tail {
                Some(line) => format!("{}: {}", out.status, line.trim()),
                None => out.status.to_string(),
            }));
        }

        let webp = tokio::fs::read(&output)
            .await
            .context("failed to read transcoder output")?;
        if webp.is_empty() {
            return Err(Error::transcoder("empty output"));
        }

        debug!(
            bytes = webp.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transcoder finished"
        );
        Ok(webp)
    }
}

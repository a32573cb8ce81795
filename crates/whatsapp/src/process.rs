//! Sidecar process management for the whatsapp-web.js sidecar.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    },
    tracing::{debug, error, info, warn},
};

/// Script the sidecar is started from, relative to its directory.
pub const SIDECAR_ENTRY: &str = "index.js";

/// Environment variable pointing at the sidecar directory.
pub const SIDECAR_DIR_ENV: &str = "STICKERBOT_SIDECAR_DIR";

/// Handle to a running sidecar process.
pub struct SidecarProcess {
    child: Child,
}

impl SidecarProcess {
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Gracefully stop the sidecar so it can flush its session.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping WhatsApp sidecar process");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id()
                && let Ok(pid) = i32::try_from(pid)
            {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(?status, "WhatsApp sidecar process exited");
            },
            Ok(Err(e)) => {
                warn!(error = %e, "error waiting for sidecar process");
            },
            Err(_) => {
                warn!("sidecar process did not exit gracefully, killing");
                let _ = self.child.kill().await;
            },
        }

        Ok(())
    }
}

impl Drop for SidecarProcess {
    fn drop(&mut self) {
        if let Some(pid) = self.child.id() {
            debug!(pid, "dropping sidecar process handle");
        }
    }
}

/// Configuration for starting the sidecar process.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Directory containing `package.json` and `index.js`.
    pub sidecar_dir: PathBuf,
    /// Node.js executable.
    pub node: String,
    /// Where the sidecar keeps its WhatsApp session.
    pub auth_dir: PathBuf,
}

/// A started sidecar with its protocol pipes.
pub struct SpawnedSidecar {
    pub process: SidecarProcess,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Find the sidecar directory.
///
/// Searches in order:
/// 1. Explicit path if provided
/// 2. `STICKERBOT_SIDECAR_DIR` environment variable
/// 3. Relative to the executable: `../sidecar`
/// 4. Common development paths
pub fn find_sidecar_dir(explicit_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        if path.join("package.json").exists() {
            return Ok(path.to_path_buf());
        }
        bail!(
            "sidecar directory does not exist or missing package.json: {}",
            path.display()
        );
    }

    if let Ok(dir) = std::env::var(SIDECAR_DIR_ENV) {
        let path = PathBuf::from(&dir);
        if path.join("package.json").exists() {
            return Ok(path);
        }
        warn!(path = %dir, "{SIDECAR_DIR_ENV} set but package.json not found");
    }

    if let Ok(exe_path) = std::env::current_exe()
        && let Some(exe_dir) = exe_path.parent()
    {
        for rel in ["../sidecar", "../share/stickerbot/sidecar"] {
            let candidate = exe_dir.join(rel);
            if candidate.join("package.json").exists() {
                return Ok(candidate);
            }
        }
    }

    let dev_paths = ["sidecar", "crates/whatsapp/sidecar", "../whatsapp/sidecar"];
    for rel_path in dev_paths {
        let path = PathBuf::from(rel_path);
        if path.join("package.json").exists() {
            return Ok(path.canonicalize().unwrap_or(path));
        }
    }

    bail!(
        "WhatsApp sidecar not found. Set {SIDECAR_DIR_ENV} or whatsapp.sidecar_dir \
         to a directory with package.json"
    )
}

/// Check if node_modules exists.
#[must_use]
pub fn has_node_modules(sidecar_dir: &Path) -> bool {
    sidecar_dir.join("node_modules").exists()
}

/// Start the sidecar process with piped stdio.
pub async fn start_sidecar(config: &SidecarConfig) -> Result<SpawnedSidecar> {
    let sidecar_dir = &config.sidecar_dir;

    if !sidecar_dir.join(SIDECAR_ENTRY).exists() {
        bail!(
            "WhatsApp sidecar script not found at {}",
            sidecar_dir.join(SIDECAR_ENTRY).display()
        );
    }

    if !has_node_modules(sidecar_dir) {
        run_npm_install(sidecar_dir).await?;
    }

    std::fs::create_dir_all(&config.auth_dir).with_context(|| {
        format!(
            "failed to create sidecar auth dir {}",
            config.auth_dir.display()
        )
    })?;

    info!(
        path = %sidecar_dir.display(),
        node = %config.node,
        "starting WhatsApp sidecar process"
    );

    let mut cmd = Command::new(&config.node);
    cmd.arg(SIDECAR_ENTRY)
        .current_dir(sidecar_dir)
        .env("STICKERBOT_AUTH_DIR", &config.auth_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn sidecar with {}", config.node))?;

    let stdin = child.stdin.take().context("failed to capture sidecar stdin")?;
    let stdout = child
        .stdout
        .take()
        .context("failed to capture sidecar stdout")?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_logs(stderr));
    }

    // Wait a moment for the process to start and potentially fail.
    tokio::time::sleep(Duration::from_millis(500)).await;

    match child.try_wait() {
        Ok(Some(status)) => {
            bail!("sidecar process exited immediately with status: {status}");
        },
        Ok(None) => {},
        Err(e) => {
            bail!("failed to check sidecar process status: {e}");
        },
    }

    info!(pid = child.id(), "WhatsApp sidecar process started");

    Ok(SpawnedSidecar {
        process: SidecarProcess { child },
        stdin,
        stdout,
    })
}

/// Forward the sidecar's stderr to tracing. JSON lines carry a numeric
/// pino-style level; anything else is logged as is.
async fn forward_logs(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.starts_with('{')
            && let Ok(log) = serde_json::from_str::<serde_json::Value>(&line)
        {
            let level = log
                .get("level")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(30);
            let msg = log
                .get("msg")
                .and_then(serde_json::Value::as_str)
                .unwrap_or(&line);
            match level {
                10 | 20 => debug!(target: "whatsapp_sidecar", "{}", msg),
                30 => info!(target: "whatsapp_sidecar", "{}", msg),
                40 => warn!(target: "whatsapp_sidecar", "{}", msg),
                _ => error!(target: "whatsapp_sidecar", "{}", msg),
            }
            continue;
        }
        warn!(target: "whatsapp_sidecar", "{}", line);
    }
}

/// Run `npm install` in the sidecar directory.
async fn run_npm_install(sidecar_dir: &Path) -> Result<()> {
    info!(path = %sidecar_dir.display(), "running npm install for sidecar");

    let output = Command::new("npm")
        .arg("install")
        .arg("--omit=dev")
        .current_dir(sidecar_dir)
        .output()
        .await
        .context("failed to run npm install")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("npm install failed: {stderr}");
    }

    Ok(())
}

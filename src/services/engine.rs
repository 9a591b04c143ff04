use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{ConversionConfig, EngineKind};
use crate::services::text_render;

/// Install locations probed when neither `libreoffice` nor `soffice` is on PATH.
const LIBREOFFICE_PATHS: &[&str] = &[
    "/usr/bin/libreoffice",
    "/usr/bin/soffice",
    "/usr/lib/libreoffice/program/soffice",
    "/Applications/LibreOffice.app/Contents/MacOS/soffice",
];

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{engine} not found. {hint}")]
    NotInstalled { engine: &'static str, hint: String },

    #[error("{engine} returned error code {code}: {stderr}")]
    ExitStatus {
        engine: &'static str,
        code: String,
        stderr: String,
    },

    #[error("{engine} timed out after {secs}s")]
    TimedOut { engine: &'static str, secs: u64 },

    #[error("{engine} conversion error: {message}")]
    Failed { engine: &'static str, message: String },

    #[error("All conversion methods failed: {}", .0.join(" | "))]
    AllFailed(Vec<String>),

    #[error("No conversion engines configured")]
    NoEngines,
}

/// The external DOC/DOCX to PDF capability.
///
/// Implementations read `source` and either leave a PDF at `target` or return
/// an error with a human-readable message. They never touch anything outside
/// the directory that holds those two paths.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn convert(&self, source: &Path, target: &Path) -> Result<(), EngineError>;
}

/// Tries each engine in turn; the first success wins.
pub struct EngineChain {
    engines: Vec<Arc<dyn ConversionEngine>>,
}

impl EngineChain {
    pub fn new(engines: Vec<Arc<dyn ConversionEngine>>) -> Self {
        Self { engines }
    }

    /// Builds the configured engines, in the configured order.
    pub fn from_config(config: &ConversionConfig) -> Self {
        let engines = config
            .engines
            .iter()
            .map(|kind| -> Arc<dyn ConversionEngine> {
                match kind {
                    EngineKind::LibreOffice => Arc::new(LibreOfficeEngine::new(
                        config.libreoffice_path.clone(),
                        config.timeout(),
                    )),
                    EngineKind::Unoconv => Arc::new(UnoconvEngine::new(config.timeout())),
                    EngineKind::Text => Arc::new(TextEngine),
                }
            })
            .collect();

        Self::new(engines)
    }

    pub fn engine_names(&self) -> Vec<&'static str> {
        self.engines.iter().map(|e| e.name()).collect()
    }
}

#[async_trait]
impl ConversionEngine for EngineChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn convert(&self, source: &Path, target: &Path) -> Result<(), EngineError> {
        if self.engines.is_empty() {
            return Err(EngineError::NoEngines);
        }

        let mut failures = Vec::with_capacity(self.engines.len());
        for engine in &self.engines {
            match engine.convert(source, target).await {
                Ok(()) => {
                    tracing::info!(engine = engine.name(), "Conversion engine succeeded");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(engine = engine.name(), "Conversion engine failed: {e}");
                    // Next engine must not mistake a half-written file for its own output.
                    let _ = tokio::fs::remove_file(target).await;
                    failures.push(e.to_string());
                }
            }
        }

        Err(EngineError::AllFailed(failures))
    }
}

/// Headless LibreOffice (`soffice --convert-to pdf`).
pub struct LibreOfficeEngine {
    executable: Option<PathBuf>,
    timeout: Duration,
}

impl LibreOfficeEngine {
    const NAME: &'static str = "LibreOffice";

    pub fn new(executable: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable,
            timeout,
        }
    }

    fn locate(&self) -> Result<PathBuf, EngineError> {
        if let Some(path) = &self.executable {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(EngineError::NotInstalled {
                engine: Self::NAME,
                hint: format!("Configured path {} does not exist.", path.display()),
            });
        }

        for candidate in ["libreoffice", "soffice"] {
            if let Ok(path) = which::which(candidate) {
                return Ok(path);
            }
        }

        let known = LIBREOFFICE_PATHS.iter().map(PathBuf::from);
        known
            .chain(versioned_opt_installs())
            .find(|path| path.is_file())
            .ok_or_else(|| EngineError::NotInstalled {
                engine: Self::NAME,
                hint: "Please install LibreOffice.".to_string(),
            })
    }
}

/// `/opt/libreoffice*/program/soffice`, as laid out by the upstream installers.
fn versioned_opt_installs() -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir("/opt") else {
        return Vec::new();
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("libreoffice"))
        .map(|entry| entry.path().join("program").join("soffice"))
        .collect();
    found.sort();
    found
}

#[async_trait]
impl ConversionEngine for LibreOfficeEngine {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn convert(&self, source: &Path, target: &Path) -> Result<(), EngineError> {
        let executable = self.locate()?;
        let out_dir = target.parent().ok_or_else(|| EngineError::Failed {
            engine: Self::NAME,
            message: format!("target {} has no parent directory", target.display()),
        })?;

        // soffice refuses to run twice against one user profile, so every job gets its own.
        let profile = std::path::absolute(out_dir.join(".libreoffice-profile")).map_err(|e| {
            EngineError::Failed {
                engine: Self::NAME,
                message: format!("cannot resolve profile directory: {e}"),
            }
        })?;

        let mut cmd = Command::new(&executable);
        cmd.arg(format!("-env:UserInstallation=file://{}", profile.display()))
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(out_dir)
            .arg(source);

        run_with_timeout(Self::NAME, cmd, self.timeout).await?;

        // soffice names its output after the source file, not after our target.
        let stem = source.file_stem().unwrap_or_default().to_string_lossy();
        let produced = out_dir.join(format!("{stem}.pdf"));

        if produced != target && tokio::fs::try_exists(&produced).await.unwrap_or(false) {
            tokio::fs::rename(&produced, target)
                .await
                .map_err(|e| EngineError::Failed {
                    engine: Self::NAME,
                    message: format!("cannot move output into place: {e}"),
                })?;
        }

        if tokio::fs::try_exists(target).await.unwrap_or(false) {
            Ok(())
        } else {
            Err(EngineError::Failed {
                engine: Self::NAME,
                message: "Conversion completed but output file not found".to_string(),
            })
        }
    }
}

/// `unoconv`, a separate LibreOffice UNO front end.
pub struct UnoconvEngine {
    timeout: Duration,
}

impl UnoconvEngine {
    const NAME: &'static str = "unoconv";

    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ConversionEngine for UnoconvEngine {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn convert(&self, source: &Path, target: &Path) -> Result<(), EngineError> {
        let executable = which::which("unoconv").map_err(|_| EngineError::NotInstalled {
            engine: Self::NAME,
            hint: "Install with 'apt-get install unoconv'.".to_string(),
        })?;

        let mut cmd = Command::new(executable);
        cmd.args(["-f", "pdf", "-o"]).arg(target).arg(source);

        run_with_timeout(Self::NAME, cmd, self.timeout).await?;

        if tokio::fs::try_exists(target).await.unwrap_or(false) {
            Ok(())
        } else {
            Err(EngineError::Failed {
                engine: Self::NAME,
                message: "Conversion completed but output file not found".to_string(),
            })
        }
    }
}

/// Built-in plain-text renderer. Keeps paragraph text only, no styling.
pub struct TextEngine;

impl TextEngine {
    const NAME: &'static str = "text renderer";
}

#[async_trait]
impl ConversionEngine for TextEngine {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn convert(&self, source: &Path, target: &Path) -> Result<(), EngineError> {
        let source = source.to_path_buf();
        let target = target.to_path_buf();

        let handle =
            tokio::task::spawn_blocking(move || text_render::render_docx_file(&source, &target));

        handle
            .await
            .map_err(|e| EngineError::Failed {
                engine: Self::NAME,
                message: format!("render task panicked: {e}"),
            })?
            .map_err(|e| EngineError::Failed {
                engine: Self::NAME,
                message: format!("{e:#}"),
            })
    }
}

/// Runs `cmd` to completion, killing it if it outlives `timeout`.
async fn run_with_timeout(
    engine: &'static str,
    mut cmd: Command,
    timeout: Duration,
) -> Result<(), EngineError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| EngineError::Failed {
        engine,
        message: format!("failed to start: {e}"),
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| EngineError::Failed {
            engine,
            message: format!("failed to wait for process: {e}"),
        })?,
        Err(_) => {
            return Err(EngineError::TimedOut {
                engine,
                secs: timeout.as_secs(),
            });
        }
    };

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(EngineError::ExitStatus {
            engine,
            code,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(())
}

//! External command invocation with timeouts.
//!
//! Every child process the hub starts (git, 3D conversion tools, KiCad) goes
//! through [`ExternalTool`]. A run that exceeds its timeout is killed and
//! reported as [`ToolError::Timeout`]; a non-zero exit is returned as data so
//! callers can show stdout and stderr.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
    #[error("{program} exited with code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: PathBuf,
    timeout: Duration,
}

impl ExternalTool {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn name(&self) -> String {
        self.program.display().to_string()
    }

    /// Run to completion, feeding `stdin` if given.
    pub async fn run<I, S>(&self, args: I, stdin: Option<Vec<u8>>, cwd: Option<&Path>) -> Result<ToolOutput, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound(self.name())
            } else {
                ToolError::Spawn {
                    program: self.name(),
                    source,
                }
            }
        })?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            // fed from a task while the output pipes are drained
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&data).await {
                    debug!("stdin closed early: {}", e);
                }
            });
        }

        // dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ToolError::Spawn {
                program: self.name(),
                source,
            })?,
            Err(_) => {
                warn!("{} timed out after {:?}", self.name(), self.timeout);
                return Err(ToolError::Timeout {
                    program: self.name(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Like [`run`](Self::run) but a non-zero exit becomes [`ToolError::Failed`].
    pub async fn run_checked<I, S>(&self, args: I, cwd: Option<&Path>) -> Result<ToolOutput, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(args, None, cwd).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ToolError::Failed {
                program: self.name(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Tools the hub knows how to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Git,
    Gmsh,
    OcpPython,
    FreeCad,
}

impl ToolKind {
    /// Environment variable that overrides discovery.
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            ToolKind::Git => None,
            ToolKind::Gmsh => Some("GMSH_CMD"),
            ToolKind::OcpPython => Some("OCP_PYTHON"),
            ToolKind::FreeCad => Some("FREECAD_CMD"),
        }
    }

    fn candidates(&self) -> &'static [&'static str] {
        match self {
            ToolKind::Git => &["git"],
            ToolKind::Gmsh => &["gmsh"],
            ToolKind::OcpPython => &["python3", "python"],
            ToolKind::FreeCad => &["freecadcmd", "FreeCADCmd", "freecad"],
        }
    }

    /// Locate the tool from the process environment.
    pub fn discover(&self) -> Option<PathBuf> {
        self.discover_with(|key| std::env::var(key).ok(), std::env::var_os("PATH"))
    }

    /// Locate the tool using the given variable lookup and `PATH` value. An
    /// override naming a bare command is searched on `PATH` too.
    pub fn discover_with<F>(&self, env: F, path: Option<OsString>) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = self.env_var().and_then(&env).filter(|v| !v.trim().is_empty()) {
            let candidate = PathBuf::from(value.trim());
            if candidate.components().count() > 1 {
                return Some(candidate);
            }
            return search_path(&candidate, path.as_deref()).or(Some(candidate));
        }
        self.candidates()
            .iter()
            .find_map(|name| search_path(Path::new(name), path.as_deref()))
    }
}

fn search_path(name: &Path, path: Option<&OsStr>) -> Option<PathBuf> {
    let path = path?;
    std::env::split_paths(path).find_map(|dir| {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        let exe = candidate.with_extension("exe");
        exe.is_file().then_some(exe)
    })
}

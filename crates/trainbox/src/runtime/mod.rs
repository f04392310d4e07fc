//! Container runtime adapter.
//!
//! Drives Docker or Podman through their CLIs. Only the compose subcommand
//! family is used: the manifest is the single source of truth and nothing
//! here creates containers directly.

mod error;

pub use error::{RuntimeError, RuntimeResult};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::RuntimeSection;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime. Preferred: the NVIDIA container toolkit and the
    /// compose plugin are assumed present on the training host.
    #[default]
    Docker,
    /// Podman with the compose wrapper.
    Podman,
}

impl RuntimeType {
    /// Default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "docker"),
            RuntimeType::Podman => write!(f, "podman"),
        }
    }
}

/// Handle on the container runtime CLI.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    runtime_type: RuntimeType,
    binary: String,
}

impl ContainerRuntime {
    /// Auto-detect the runtime, preferring Docker.
    pub fn detect() -> RuntimeResult<Self> {
        if Self::is_binary_available("docker") {
            return Ok(Self {
                runtime_type: RuntimeType::Docker,
                binary: "docker".to_string(),
            });
        }
        if Self::is_binary_available("podman") {
            return Ok(Self {
                runtime_type: RuntimeType::Podman,
                binary: "podman".to_string(),
            });
        }
        Err(RuntimeError::NoRuntimeAvailable)
    }

    /// Build a runtime from the config section, falling back to detection.
    pub fn from_config(section: &RuntimeSection) -> RuntimeResult<Self> {
        match (section.runtime, section.binary.as_deref()) {
            (Some(rt), Some(binary)) => Ok(Self::with_binary(rt, binary)),
            (Some(rt), None) => Ok(Self::with_type(rt)),
            (None, Some(binary)) => Ok(Self::with_binary(RuntimeType::default(), binary)),
            (None, None) => Self::detect(),
        }
    }

    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
        }
    }

    pub fn with_binary(runtime_type: RuntimeType, binary: impl Into<String>) -> Self {
        Self {
            runtime_type,
            binary: binary.into(),
        }
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    /// Check if a binary is available in PATH.
    pub fn is_binary_available(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Check the runtime responds at all; returns its version string.
    pub async fn health_check(&self) -> RuntimeResult<String> {
        self.capture(&["--version"]).await
    }

    /// Ask the runtime to parse and validate a compose manifest.
    pub async fn compose_check(&self, manifest: &Path) -> RuntimeResult<()> {
        let manifest = manifest_arg(manifest)?;
        self.capture(&["compose", "-f", &manifest, "config", "--quiet"])
            .await?;
        Ok(())
    }

    /// Bring the stack up in detached mode, streaming runtime output to the
    /// operator's terminal.
    pub async fn compose_up(&self, manifest: &Path, pull: bool) -> RuntimeResult<()> {
        let manifest = manifest_arg(manifest)?;
        let mut args = vec!["compose", "-f", manifest.as_str(), "up", "-d", "--remove-orphans"];
        if pull {
            args.push("--pull");
            args.push("always");
        }
        info!(runtime = %self.runtime_type, "starting compose stack");
        self.stream(&args).await
    }

    /// Tear the stack down.
    pub async fn compose_down(&self, manifest: &Path) -> RuntimeResult<()> {
        let manifest = manifest_arg(manifest)?;
        info!(runtime = %self.runtime_type, "stopping compose stack");
        self.stream(&["compose", "-f", &manifest, "down"]).await
    }

    /// Current state of the stack's services.
    pub async fn compose_ps(&self, manifest: &Path) -> RuntimeResult<String> {
        let manifest = manifest_arg(manifest)?;
        self.capture(&["compose", "-f", &manifest, "ps"]).await
    }

    /// Restart one service of the stack.
    pub async fn compose_restart(&self, manifest: &Path, service: &str) -> RuntimeResult<()> {
        let manifest = manifest_arg(manifest)?;
        self.stream(&["compose", "-f", &manifest, "restart", service])
            .await
    }

    /// Run a command capturing output.
    async fn capture(&self, args: &[&str]) -> RuntimeResult<String> {
        debug!("running {} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary).args(args).output().await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a command with stdio inherited so progress is visible.
    async fn stream(&self, args: &[&str]) -> RuntimeResult<()> {
        debug!("running {} {}", self.binary, args.join(" "));
        let status = Command::new(&self.binary).args(args).status().await?;
        if !status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                message: format!("exited with {status}"),
            });
        }
        Ok(())
    }
}

fn manifest_arg(path: &Path) -> RuntimeResult<String> {
    if !path.exists() {
        return Err(RuntimeError::ManifestMissing(
            path.to_string_lossy().to_string(),
        ));
    }
    Ok(path.to_string_lossy().to_string())
}

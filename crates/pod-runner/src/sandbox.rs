use anyhow::{Context, Result};
use pod_core::{ensure_dir, is_filesystem_root, remove_path_if_exists};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const CONFIG_DIR: &str = "Config";
pub const AUTH_DIR: &str = "auth";
pub const LOGS_DIR: &str = "Logs";
pub const RUN_DIR: &str = "Run";
pub const DATA_DIR: &str = "Data";
pub const DOCUMENTS_DIR: &str = "Documents";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("refusing to use {0} as a sandbox root")]
    UnsafeRoot(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn provision(root: &Path, pods: &[&str]) -> Result<Self> {
        if is_filesystem_root(root) {
            return Err(SandboxError::UnsafeRoot(root.to_path_buf()).into());
        }
        let sandbox = Self::at(root);
        if remove_path_if_exists(root).context("failed to clear stale sandbox")? {
            info!(root = %root.display(), "removed stale sandbox");
        }
        ensure_dir(&sandbox.auth_dir())?;
        for pod in pods {
            ensure_dir(&sandbox.pod_logs_dir(pod))?;
            ensure_dir(&sandbox.pod_run_dir(pod))?;
            ensure_dir(&sandbox.pod_documents_dir(pod))?;
        }
        info!(root = %root.display(), pods = pods.len(), "sandbox provisioned");
        Ok(sandbox)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    pub fn auth_dir(&self) -> PathBuf {
        self.config_dir().join(AUTH_DIR)
    }

    pub fn pod_dir(&self, pod: &str) -> PathBuf {
        self.root.join(pod)
    }

    pub fn pod_logs_dir(&self, pod: &str) -> PathBuf {
        self.pod_dir(pod).join(LOGS_DIR)
    }

    pub fn pod_run_dir(&self, pod: &str) -> PathBuf {
        self.pod_dir(pod).join(RUN_DIR)
    }

    pub fn pod_data_dir(&self, pod: &str) -> PathBuf {
        self.pod_dir(pod).join(DATA_DIR)
    }

    pub fn pod_documents_dir(&self, pod: &str) -> PathBuf {
        self.pod_data_dir(pod).join(DOCUMENTS_DIR)
    }

    pub fn readiness_marker(&self, pod: &str) -> PathBuf {
        self.pod_run_dir(pod).join(format!("{}.pid", pod))
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }
}

use anyhow::Result;
use chrono::Utc;
use pod_core::atomic_write_json_pretty;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const RUN_STATE_FILE: &str = "run_state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Provisioning,
    PodsStarting,
    WorkloadRunning,
    PodsStopping,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Provisioning => "provisioning",
            Phase::PodsStarting => "pods_starting",
            Phase::WorkloadRunning => "workload_running",
            Phase::PodsStopping => "pods_stopping",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

pub fn run_state_path(sandbox_root: &Path) -> PathBuf {
    sandbox_root.join(RUN_STATE_FILE)
}

pub fn write_run_state(sandbox_root: &Path, phase: Phase, exit_status: Option<i32>) -> Result<()> {
    let payload = json!({
        "schema_version": "pod_run_state_v1",
        "phase": phase,
        "workload_exit_status": exit_status,
        "updated_at": Utc::now().to_rfc3339(),
    });
    atomic_write_json_pretty(&run_state_path(sandbox_root), &payload)
}

/// Tracks the driver's phase on disk. A guard dropped before
/// [`RunStateGuard::complete`] records the run as failed.
pub struct RunStateGuard {
    sandbox_root: PathBuf,
    exit_status: Option<i32>,
    done: bool,
}

impl RunStateGuard {
    pub fn new(sandbox_root: &Path) -> Self {
        Self {
            sandbox_root: sandbox_root.to_path_buf(),
            exit_status: None,
            done: false,
        }
    }

    pub fn advance(&mut self, phase: Phase) {
        info!(%phase, "entering phase");
        if let Err(e) = write_run_state(&self.sandbox_root, phase, self.exit_status) {
            warn!(%phase, error = %format!("{e:#}"), "failed to record run state");
        }
    }

    pub fn set_exit_status(&mut self, status: i32) {
        self.exit_status = Some(status);
    }

    pub fn complete(&mut self) {
        self.advance(Phase::Done);
        self.done = true;
    }
}

impl Drop for RunStateGuard {
    fn drop(&mut self) {
        if !self.done {
            let _ = write_run_state(&self.sandbox_root, Phase::Failed, self.exit_status);
        }
    }
}

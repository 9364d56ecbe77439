//! Pod lifecycle: launch, wait for the readiness marker, stop.
//!
//! [`start`] hands back a [`RunningPod`] guard as soon as the launch has been
//! issued. Dropping the guard without calling [`RunningPod::stop`] runs the
//! stop anyway, so a pod that was launched is stopped on every exit path,
//! including a failed readiness wait.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PodDefinition;
use crate::sandbox::Sandbox;
use crate::server::ServerControl;

const PROGRESS_EVERY: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub name: String,
    pub config_path: PathBuf,
    pub runtime_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub marker_path: PathBuf,
    pub http_port: u16,
    pub ssl_port: u16,
}

impl Pod {
    pub fn new(sandbox: &Sandbox, def: &PodDefinition) -> Self {
        Self {
            name: def.name.clone(),
            config_path: sandbox
                .config_dir()
                .join(format!("server-{}.plist", def.name)),
            runtime_dir: sandbox.pod_dir(&def.name),
            logs_dir: sandbox.pod_logs_dir(&def.name),
            marker_path: sandbox.readiness_marker(&def.name),
            http_port: def.http_port,
            ssl_port: def.ssl_port,
        }
    }
}

#[derive(Debug, Error)]
pub enum PodStartError {
    #[error("pod {pod} did not write {} within {timeout:?}", .marker.display())]
    Timeout {
        pod: String,
        marker: PathBuf,
        timeout: Duration,
    },

    #[error("pod {pod} exited with status {status} before becoming ready")]
    Exited { pod: String, status: i32 },
}

#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: None,
        }
    }
}

/// Blocks until the pod's readiness marker exists. Only existence counts;
/// the marker's content is never read.
pub fn wait_for_marker(pod: &Pod, server: &dyn ServerControl, readiness: &Readiness) -> Result<()> {
    let started = Instant::now();
    let mut ticks: u64 = 0;
    loop {
        if pod.marker_path.exists() {
            info!(
                pod = %pod.name,
                waited_ms = started.elapsed().as_millis() as u64,
                "server started"
            );
            return Ok(());
        }
        if let Some(status) = server.exit_status(pod)? {
            if status != 0 {
                return Err(PodStartError::Exited {
                    pod: pod.name.clone(),
                    status,
                }
                .into());
            }
        }
        if let Some(timeout) = readiness.timeout {
            if started.elapsed() >= timeout {
                return Err(PodStartError::Timeout {
                    pod: pod.name.clone(),
                    marker: pod.marker_path.clone(),
                    timeout,
                }
                .into());
            }
        }
        ticks += 1;
        if ticks % PROGRESS_EVERY == 0 {
            info!(pod = %pod.name, ticks, "still waiting for server");
        } else {
            debug!(pod = %pod.name, ticks, "waiting for server");
        }
        thread::sleep(readiness.poll_interval);
    }
}

pub fn start<'a>(
    pod: &'a Pod,
    server: &'a dyn ServerControl,
    readiness: &Readiness,
) -> Result<RunningPod<'a>> {
    info!(pod = %pod.name, config = %pod.config_path.display(), "starting pod");
    server
        .start(pod)
        .with_context(|| format!("failed to launch pod {}", pod.name))?;
    let running = RunningPod {
        pod,
        server,
        stopped: false,
    };
    wait_for_marker(pod, server, readiness)?;
    Ok(running)
}

#[must_use = "dropping a RunningPod stops it"]
pub struct RunningPod<'a> {
    pod: &'a Pod,
    server: &'a dyn ServerControl,
    stopped: bool,
}

impl RunningPod<'_> {
    pub fn pod(&self) -> &Pod {
        self.pod
    }

    pub fn stop(mut self) -> Result<()> {
        self.stopped = true;
        info!(pod = %self.pod.name, "stopping pod");
        self.server
            .stop(self.pod)
            .with_context(|| format!("failed to stop pod {}", self.pod.name))
    }
}

impl Drop for RunningPod<'_> {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        warn!(pod = %self.pod.name, "stopping pod on abnormal exit");
        if let Err(e) = self.server.stop(self.pod) {
            warn!(pod = %self.pod.name, error = %format!("{e:#}"), "best-effort stop failed");
        }
    }
}

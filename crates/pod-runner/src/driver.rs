use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::materialize::materialize;
use crate::pod::{self, Pod, Readiness, RunningPod};
use crate::sandbox::Sandbox;
use crate::server::ServerControl;
use crate::state::{Phase, RunStateGuard};
use crate::workload::{Workload, WorkloadParams};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_status: i32,
    pub sandbox_root: PathBuf,
    pub stop_failures: Vec<String>,
}

/// Provisions the sandbox, starts every pod, runs the workload, then stops
/// every pod in definition order whatever the workload did.
pub fn orchestrate(
    config: &HarnessConfig,
    server: &dyn ServerControl,
    workload: &dyn Workload,
) -> Result<RunOutcome> {
    config.validate()?;
    let sandbox = Sandbox::provision(&config.sandbox_root, &config.pod_names())
        .context("sandbox provisioning failed")?;
    let mut run_state = RunStateGuard::new(sandbox.root());
    run_state.advance(Phase::Provisioning);

    let pods: Vec<Pod> = config.pods.iter().map(|d| Pod::new(&sandbox, d)).collect();
    let materialized =
        materialize(config, &sandbox, &pods).context("config materialization failed")?;

    run_state.advance(Phase::PodsStarting);
    let readiness = Readiness {
        poll_interval: config.poll_interval(),
        timeout: config.readiness_timeout(),
    };
    let mut running: Vec<RunningPod<'_>> = Vec::with_capacity(pods.len());
    for pod in &pods {
        running.push(pod::start(pod, server, &readiness)?);
    }

    run_state.advance(Phase::WorkloadRunning);
    let params = WorkloadParams {
        run_config: materialized.run_config.clone(),
        clients: materialized.clients.clone(),
        duration: config.duration(),
        log_path: config.log_path_for(sandbox.root()),
    };
    let workload_result = workload.run(&params);
    match &workload_result {
        Ok(status) => {
            info!(status, "workload completed");
            run_state.set_exit_status(*status);
        }
        Err(e) => error!(error = %format!("{e:#}"), "workload could not be run"),
    }

    run_state.advance(Phase::PodsStopping);
    let mut stop_failures = Vec::new();
    for guard in running {
        let name = guard.pod().name.clone();
        if let Err(e) = guard.stop() {
            warn!(pod = %name, error = %format!("{e:#}"), "stop failed, continuing teardown");
            stop_failures.push(name);
        }
    }

    let exit_status = workload_result.context("workload invocation failed")?;
    run_state.complete();
    info!(
        status = exit_status,
        sandbox = %sandbox.root().display(),
        "run finished"
    );
    Ok(RunOutcome {
        exit_status,
        sandbox_root: sandbox.root().to_path_buf(),
        stop_failures,
    })
}

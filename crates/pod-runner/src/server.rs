use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::command::{exit_code, render_args, shell_join};
use crate::config::ServerCommands;
use crate::pod::Pod;

pub trait ServerControl {
    /// Launches the server. Returns once the launch has been issued, without
    /// waiting for readiness.
    fn start(&self, pod: &Pod) -> Result<()>;

    fn stop(&self, pod: &Pod) -> Result<()>;

    /// Exit status of the launched process, if it has already terminated.
    fn exit_status(&self, _pod: &Pod) -> Result<Option<i32>> {
        Ok(None)
    }
}

pub struct ProcessServerControl {
    commands: ServerCommands,
    stop_grace: Duration,
    children: Mutex<BTreeMap<String, Child>>,
}

impl ProcessServerControl {
    pub fn new(commands: ServerCommands, stop_grace: Duration) -> Self {
        Self {
            commands,
            stop_grace,
            children: Mutex::new(BTreeMap::new()),
        }
    }

    fn command_for(&self, pod: &Pod, args: &[String]) -> Result<(Command, String)> {
        let config = pod.config_path.to_string_lossy().into_owned();
        let marker = pod.marker_path.to_string_lossy().into_owned();
        let args = render_args(
            args,
            &[
                ("config", config.as_str()),
                ("pod", pod.name.as_str()),
                ("marker", marker.as_str()),
            ],
        );
        let cmdline = shell_join(&self.commands.program, &args);

        let log_path = pod.logs_dir.join("server.log");
        let log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open server log {}", log_path.display()))?;
        let mut cmd = Command::new(&self.commands.program);
        cmd.args(&args);
        if let Some(dir) = &self.commands.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(log.try_clone()?));
        cmd.stderr(Stdio::from(log));
        Ok((cmd, cmdline))
    }

    fn reap(&self, pod: &Pod) -> Result<()> {
        let child = self
            .children
            .lock()
            .map_err(|_| anyhow!("server_state_poisoned"))?
            .remove(&pod.name);
        let Some(mut child) = child else {
            return Ok(());
        };
        let deadline = Instant::now() + self.stop_grace;
        loop {
            if let Some(status) = child.try_wait()? {
                debug!(pod = %pod.name, status = exit_code(&status), "server process exited");
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        warn!(
            pod = %pod.name,
            grace_secs = self.stop_grace.as_secs(),
            "server still running after stop, killing"
        );
        child.kill()?;
        child.wait()?;
        Ok(())
    }
}

impl ServerControl for ProcessServerControl {
    fn start(&self, pod: &Pod) -> Result<()> {
        let mut children = self
            .children
            .lock()
            .map_err(|_| anyhow!("server_state_poisoned"))?;
        if children.contains_key(&pod.name) {
            return Err(anyhow!("pod_already_started: {}", pod.name));
        }
        let (mut cmd, cmdline) = self.command_for(pod, &self.commands.start_args)?;
        info!(pod = %pod.name, command = %cmdline, "launching server");
        let child = cmd
            .spawn()
            .with_context(|| format!("failed to launch server for {}: {}", pod.name, cmdline))?;
        children.insert(pod.name.clone(), child);
        Ok(())
    }

    fn stop(&self, pod: &Pod) -> Result<()> {
        let (mut cmd, cmdline) = self.command_for(pod, &self.commands.stop_args)?;
        info!(pod = %pod.name, command = %cmdline, "stopping server");
        let stop_result = cmd
            .status()
            .with_context(|| format!("failed to run stop command for {}", pod.name))
            .and_then(|status| {
                if status.success() {
                    Ok(())
                } else {
                    Err(anyhow!(
                        "stop_failed: {} exited with status {}",
                        cmdline,
                        exit_code(&status)
                    ))
                }
            });
        let reap_result = self.reap(pod);
        stop_result?;
        reap_result
    }

    fn exit_status(&self, pod: &Pod) -> Result<Option<i32>> {
        let mut children = self
            .children
            .lock()
            .map_err(|_| anyhow!("server_state_poisoned"))?;
        match children.get_mut(&pod.name) {
            Some(child) => Ok(child.try_wait()?.map(|s| exit_code(&s))),
            None => Ok(None),
        }
    }
}

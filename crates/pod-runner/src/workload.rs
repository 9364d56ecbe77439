use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::info;

use crate::command::{exit_code, render_args, shell_join};
use crate::config::WorkloadCommand;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadParams {
    pub run_config: PathBuf,
    pub clients: PathBuf,
    pub duration: Duration,
    pub log_path: PathBuf,
}

/// The load generator. Implementations report the exit status and nothing
/// else; a non-zero status is a test result, not an error.
pub trait Workload {
    fn run(&self, params: &WorkloadParams) -> Result<i32>;
}

pub struct ProcessWorkload {
    command: WorkloadCommand,
}

impl ProcessWorkload {
    pub fn new(command: WorkloadCommand) -> Self {
        Self { command }
    }

    pub fn render(&self, params: &WorkloadParams) -> Vec<String> {
        let config = params.run_config.to_string_lossy().into_owned();
        let clients = params.clients.to_string_lossy().into_owned();
        let duration = params.duration.as_secs().to_string();
        let log = params.log_path.to_string_lossy().into_owned();
        render_args(
            &self.command.args,
            &[
                ("config", config.as_str()),
                ("clients", clients.as_str()),
                ("duration", duration.as_str()),
                ("log", log.as_str()),
            ],
        )
    }
}

impl Workload for ProcessWorkload {
    fn run(&self, params: &WorkloadParams) -> Result<i32> {
        let args = self.render(params);
        let cmdline = shell_join(&self.command.program, &args);
        info!(command = %cmdline, "running workload");
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&args);
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        let status = cmd
            .status()
            .with_context(|| format!("failed to launch workload: {}", cmdline))?;
        let code = exit_code(&status);
        info!(status = code, "workload finished");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WorkloadParams {
        WorkloadParams {
            run_config: PathBuf::from("/s/Config/loadtest-config.plist"),
            clients: PathBuf::from("/s/Config/loadtest-clients.plist"),
            duration: Duration::from_secs(90),
            log_path: PathBuf::from("/s/loadtest.log"),
        }
    }

    #[test]
    fn default_command_receives_all_four_inputs() {
        let workload = ProcessWorkload::new(WorkloadCommand::default());
        let args = workload.render(&params());
        let joined = args.join(" ");
        assert!(joined.contains("--config /s/Config/loadtest-config.plist"), "{joined}");
        assert!(joined.contains("--clients /s/Config/loadtest-clients.plist"), "{joined}");
        assert!(joined.contains("--runtime 90"), "{joined}");
        assert!(joined.contains("--logfile /s/loadtest.log"), "{joined}");
        assert!(!joined.contains('{'), "unrendered placeholder in {joined}");
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_is_captured_verbatim() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let out = tmp.path().join("seen.txt");
        let workload = ProcessWorkload::new(WorkloadCommand {
            program: "/bin/sh".into(),
            args: vec![
                "-c".into(),
                "echo \"$1 $2\" > \"$3\"; exit 17".into(),
                "sh".into(),
                "{duration}".into(),
                "{clients}".into(),
                out.to_string_lossy().into_owned(),
            ],
            working_dir: None,
        });
        assert_eq!(workload.run(&params()).expect("run"), 17);
        let seen = std::fs::read_to_string(&out).expect("seen");
        assert_eq!(seen.trim(), "90 /s/Config/loadtest-clients.plist");
    }

    #[cfg(unix)]
    #[test]
    fn missing_program_is_an_error_not_a_status() {
        let workload = ProcessWorkload::new(WorkloadCommand {
            program: "/definitely/not/a/load/generator".into(),
            args: vec![],
            working_dir: None,
        });
        assert!(workload.run(&params()).is_err());
    }
}

use anyhow::Result;
use clap::Parser;
use pod_runner::{orchestrate, HarnessConfig, ProcessServerControl, ProcessWorkload};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

const EX_USAGE: u8 = 64;
const EX_SOFTWARE: u8 = 70;

#[derive(Parser, Debug)]
#[command(
    name = "podsim",
    version,
    about = "Run a load-test workload against two sandboxed server pods"
)]
struct Cli {
    /// Harness configuration (JSON). Built-in defaults are used when absent.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Workload run time in seconds.
    #[arg(short = 'd', long, value_name = "SECS")]
    duration: Option<u64>,
    /// Workload log destination [default: <sandbox>/loadtest.log].
    #[arg(short = 'l', long = "log", value_name = "PATH")]
    log: Option<PathBuf>,
    /// Sandbox root. Wiped and recreated at the start of every run.
    #[arg(long, value_name = "DIR")]
    sandbox: Option<PathBuf>,
    /// Give up on a pod that is not ready after this many seconds.
    #[arg(long, value_name = "SECS")]
    ready_timeout: Option<u64>,
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn harness_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)?,
            None => HarnessConfig::default(),
        };
        if let Some(secs) = self.duration {
            config.duration_secs = secs;
        }
        if let Some(path) = &self.log {
            config.log_path = Some(path.clone());
        }
        if let Some(root) = &self.sandbox {
            config.sandbox_root = root.clone();
        }
        if let Some(secs) = self.ready_timeout {
            config.readiness_timeout_secs = Some(secs);
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(config: &HarnessConfig) -> Result<i32> {
    let server = ProcessServerControl::new(config.server.clone(), config.stop_grace());
    let workload = ProcessWorkload::new(config.workload.clone());
    let outcome = orchestrate(config, &server, &workload)?;
    println!("sandbox: {}", outcome.sandbox_root.display());
    if !outcome.stop_failures.is_empty() {
        println!("stop_failures: {}", outcome.stop_failures.join(","));
    }
    println!("workload_exit_status: {}", outcome.exit_status);
    Ok(outcome.exit_status)
}

/// Bad flag values and bad config files are usage errors. Anything that
/// fails after the run has begun is fatal.
fn execute(cli: &Cli) -> u8 {
    let config = match cli.harness_config().and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return EX_USAGE;
        }
    };
    match run(&config) {
        Ok(status) => exit_byte(status),
        Err(err) => {
            error!(error = %format!("{err:#}"), "run aborted");
            eprintln!("error: {err:#}");
            EX_SOFTWARE
        }
    }
}

fn exit_byte(status: i32) -> u8 {
    (status & 0xff) as u8
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EX_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing(cli.verbose);
    ExitCode::from(execute(&cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;
    use std::time::Duration;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_leave_harness_config_untouched() {
        let cli = Cli::try_parse_from(["podsim"]).expect("parse");
        let config = cli.harness_config().expect("config");
        let default = HarnessConfig::default();
        assert_eq!(config.duration_secs, 60);
        assert_eq!(config.sandbox_root, default.sandbox_root);
        assert_eq!(config.readiness_timeout(), None);
        assert!(config.log_path.is_none());
    }

    #[test]
    fn flags_override_harness_config() {
        let cli = Cli::try_parse_from([
            "podsim",
            "-d",
            "5",
            "-l",
            "/tmp/lt.log",
            "--sandbox",
            "/tmp/box",
            "--ready-timeout",
            "30",
            "--poll-interval-ms",
            "250",
            "-v",
        ])
        .expect("parse");
        assert!(cli.verbose);
        let config = cli.harness_config().expect("config");
        assert_eq!(config.duration(), Duration::from_secs(5));
        assert_eq!(config.log_path, Some(PathBuf::from("/tmp/lt.log")));
        assert_eq!(config.sandbox_root, PathBuf::from("/tmp/box"));
        assert_eq!(config.readiness_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn config_file_is_loaded_before_flags_apply() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("harness.json");
        std::fs::write(
            &path,
            r#"{"duration_secs": 120, "template_root": "tpl", "stop_grace_secs": 3}"#,
        )
        .expect("write");
        let cli = Cli::try_parse_from(["podsim", "--config", path.to_str().expect("utf8"), "-d", "9"])
            .expect("parse");
        let config = cli.harness_config().expect("config");
        assert_eq!(config.duration_secs, 9);
        assert_eq!(config.stop_grace_secs, 3);
        assert_eq!(config.template_root, tmp.path().join("tpl"));
    }

    #[test]
    fn bad_arguments_are_usage_errors() {
        let err = Cli::try_parse_from(["podsim", "--duration", "soon"]).expect_err("not a number");
        assert!(err.use_stderr());
        let err = Cli::try_parse_from(["podsim", "--bogus"]).expect_err("unknown flag");
        assert!(err.use_stderr());
    }

    #[test]
    fn help_and_version_are_not_errors() {
        let err = Cli::try_parse_from(["podsim", "--help"]).expect_err("help");
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert!(!err.use_stderr());
        let err = Cli::try_parse_from(["podsim", "--version"]).expect_err("version");
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
        assert!(!err.use_stderr());
    }

    #[test]
    fn invalid_flag_values_exit_with_usage_status() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let sandbox = tmp.path().join("sim");
        let cli = Cli::try_parse_from([
            "podsim",
            "--poll-interval-ms",
            "0",
            "--sandbox",
            sandbox.to_str().expect("utf8"),
        ])
        .expect("clap accepts zero");
        assert_eq!(execute(&cli), EX_USAGE);
        assert!(!sandbox.exists(), "nothing provisioned for a rejected config");
    }

    #[test]
    fn unreadable_config_file_is_a_usage_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let missing = tmp.path().join("nope.json");
        let cli = Cli::try_parse_from(["podsim", "--config", missing.to_str().expect("utf8")])
            .expect("parse");
        assert_eq!(execute(&cli), EX_USAGE);
    }

    #[test]
    fn exit_byte_keeps_low_byte() {
        assert_eq!(exit_byte(0), 0);
        assert_eq!(exit_byte(17), 17);
        assert_eq!(exit_byte(137), 137);
        assert_eq!(exit_byte(256 + 3), 3);
    }
}

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub sandbox_root: PathBuf,
    /// Base for relative template paths. When loaded from a file, a relative
    /// value is taken relative to that file's directory.
    pub template_root: PathBuf,
    pub templates: TemplateNames,
    pub pods: Vec<PodDefinition>,
    pub server: ServerCommands,
    pub workload: WorkloadCommand,
    pub duration_secs: u64,
    pub log_path: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// `None` waits for readiness forever.
    pub readiness_timeout_secs: Option<u64>,
    pub stop_grace_secs: u64,
    pub shared_config_overrides: Vec<FieldOverride>,
    pub run_config_overrides: Vec<FieldOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateNames {
    pub server_config: PathBuf,
    pub proxies: PathBuf,
    pub resources: PathBuf,
    pub augments: PathBuf,
    pub accounts: PathBuf,
    pub run_config: PathBuf,
    pub clients: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodDefinition {
    pub name: String,
    pub config_template: PathBuf,
    pub http_port: u16,
    pub ssl_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerCommands {
    pub program: String,
    pub start_args: Vec<String>,
    pub stop_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOverride {
    pub key: String,
    pub value: Value,
}

impl FieldOverride {
    pub fn new(key: &str, value: Value) -> Self {
        Self {
            key: key.to_string(),
            value,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            sandbox_root: std::env::temp_dir().join("podsim"),
            template_root: PathBuf::from("."),
            templates: TemplateNames::default(),
            pods: vec![
                PodDefinition {
                    name: "podA".to_string(),
                    config_template: PathBuf::from("conf/server-test-podA.plist"),
                    http_port: 8008,
                    ssl_port: 8443,
                },
                PodDefinition {
                    name: "podB".to_string(),
                    config_template: PathBuf::from("conf/server-test-podB.plist"),
                    http_port: 8108,
                    ssl_port: 8543,
                },
            ],
            server: ServerCommands::default(),
            workload: WorkloadCommand::default(),
            duration_secs: 60,
            log_path: None,
            poll_interval_ms: 1000,
            readiness_timeout_secs: None,
            stop_grace_secs: 10,
            shared_config_overrides: vec![FieldOverride::new(
                "Authentication/Kerberos/Enabled",
                json!(false),
            )],
            run_config_overrides: vec![
                FieldOverride::new("PodB/Enabled", json!(true)),
                FieldOverride::new("UseLegacySerialization", json!(false)),
            ],
        }
    }
}

impl Default for TemplateNames {
    fn default() -> Self {
        Self {
            server_config: PathBuf::from("conf/server-test.plist"),
            proxies: PathBuf::from("conf/auth/proxies-test.xml"),
            resources: PathBuf::from("conf/auth/resources-test.xml"),
            augments: PathBuf::from("conf/auth/augments-test.xml"),
            accounts: PathBuf::from("conf/auth/accounts-test.xml"),
            run_config: PathBuf::from("loadtest/config.plist"),
            clients: PathBuf::from("loadtest/clients.plist"),
        }
    }
}

impl Default for ServerCommands {
    fn default() -> Self {
        Self {
            program: "./bin/run".to_string(),
            start_args: vec!["-n".into(), "-c".into(), "{config}".into()],
            stop_args: vec!["-k".into(), "-c".into(), "{config}".into()],
            working_dir: None,
        }
    }
}

impl Default for WorkloadCommand {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: [
                "loadtest/sim.py",
                "--config",
                "{config}",
                "--clients",
                "{clients}",
                "--runtime",
                "{duration}",
                "--logfile",
                "{log}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            working_dir: None,
        }
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read harness config {}", path.display()))?;
        let mut config: HarnessConfig = serde_json::from_str(&data)
            .with_context(|| format!("invalid harness config {}", path.display()))?;
        if config.template_root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.template_root = base.join(&config.template_root);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pods.len() != 2 {
            return Err(anyhow!(
                "invalid_topology: exactly two pods are supported, found {}",
                self.pods.len()
            ));
        }
        let mut seen = BTreeSet::new();
        for pod in &self.pods {
            validate_pod_name(&pod.name)?;
            if !seen.insert(pod.name.as_str()) {
                return Err(anyhow!("invalid_topology: duplicate pod name {}", pod.name));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("invalid_config: poll_interval_ms must be positive"));
        }
        if self.server.program.trim().is_empty() {
            return Err(anyhow!("invalid_config: server.program is empty"));
        }
        if self.workload.program.trim().is_empty() {
            return Err(anyhow!("invalid_config: workload.program is empty"));
        }
        for o in self
            .shared_config_overrides
            .iter()
            .chain(self.run_config_overrides.iter())
        {
            if o.key.trim().is_empty() {
                return Err(anyhow!("invalid_config: override with empty key"));
            }
        }
        Ok(())
    }

    pub fn pod_names(&self) -> Vec<&str> {
        self.pods.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn template_path(&self, rel: &Path) -> PathBuf {
        self.template_root.join(rel)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_secs.map(Duration::from_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn log_path_for(&self, sandbox_root: &Path) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| sandbox_root.join("loadtest.log"))
    }
}

fn validate_pod_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != crate::sandbox::CONFIG_DIR
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(anyhow!("invalid_topology: bad pod name {:?}", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_and_describe_two_pods() {
        let config = HarnessConfig::default();
        config.validate().expect("defaults must validate");
        assert_eq!(config.pod_names(), vec!["podA", "podB"]);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.readiness_timeout().is_none());
        assert_eq!(
            config.log_path_for(Path::new("/tmp/s")),
            PathBuf::from("/tmp/s/loadtest.log")
        );
    }

    #[test]
    fn partial_file_keeps_defaults_and_resolves_template_root() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("harness.json");
        fs::write(
            &path,
            r#"{"template_root": "fixtures", "duration_secs": 5, "readiness_timeout_secs": 30}"#,
        )
        .expect("write");
        let config = HarnessConfig::load(&path).expect("load");
        assert_eq!(config.template_root, tmp.path().join("fixtures"));
        assert_eq!(config.duration(), Duration::from_secs(5));
        assert_eq!(config.readiness_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.pods.len(), 2);
        assert_eq!(config.run_config_overrides.len(), 2);
        assert_eq!(
            config.template_path(Path::new("conf/a.plist")),
            tmp.path().join("fixtures").join("conf/a.plist")
        );
    }

    #[test]
    fn malformed_file_is_reported_with_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("harness.json");
        fs::write(&path, "{not json").expect("write");
        let err = HarnessConfig::load(&path).expect_err("must fail");
        assert!(format!("{err:#}").contains("harness.json"), "{err:#}");
    }

    #[test]
    fn topology_must_be_exactly_two_distinct_pods() {
        let mut config = HarnessConfig::default();
        let mut third = config.pods[0].clone();
        third.name = "podC".into();
        config.pods.push(third);
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.pods[1].name = "podA".into();
        let err = config.validate().expect_err("duplicate");
        assert!(err.to_string().contains("duplicate"), "{err}");

        for bad in ["", "Config", "../escape", "pod A"] {
            let mut config = HarnessConfig::default();
            config.pods[0].name = bad.into();
            assert!(config.validate().is_err(), "name {bad:?} should be rejected");
        }
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config = HarnessConfig {
            poll_interval_ms: 0,
            ..HarnessConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

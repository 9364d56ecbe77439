use anyhow::{anyhow, Context, Result};
use plist::Value as PlistValue;
use pod_core::{atomic_write_json_pretty, sha256_file};
use pod_plist::PlistDocument;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{FieldOverride, HarnessConfig};
use crate::pod::Pod;
use crate::sandbox::Sandbox;

pub const SHARED_CONFIG_FILE: &str = "server.plist";
pub const RUN_CONFIG_FILE: &str = "loadtest-config.plist";
pub const CLIENTS_FILE: &str = "loadtest-clients.plist";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize)]
pub struct MaterializedArtifact {
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct Materialized {
    pub shared_config: PathBuf,
    pub pod_configs: BTreeMap<String, PathBuf>,
    pub run_config: PathBuf,
    pub clients: PathBuf,
    pub artifacts: Vec<MaterializedArtifact>,
}

#[derive(Debug, Clone)]
pub struct AuthPaths {
    pub proxies: PathBuf,
    pub resources: PathBuf,
    pub augments: PathBuf,
    pub accounts: PathBuf,
}

impl AuthPaths {
    pub fn in_sandbox(sandbox: &Sandbox) -> Self {
        let auth = sandbox.auth_dir();
        Self {
            proxies: auth.join("proxies.xml"),
            resources: auth.join("resources.xml"),
            augments: auth.join("augments.xml"),
            accounts: auth.join("accounts.xml"),
        }
    }
}

fn path_value(path: &Path) -> PlistValue {
    PlistValue::String(path.to_string_lossy().into_owned())
}

/// Field rewrites that pin a pod's config to its sandbox subtree and to the
/// sandbox copies of the shared artifacts.
pub fn pod_field_rewrites(sandbox: &Sandbox, pod: &Pod) -> Vec<(&'static str, PlistValue)> {
    let auth = AuthPaths::in_sandbox(sandbox);
    let shared = sandbox.config_dir().join(SHARED_CONFIG_FILE);
    vec![
        ("ServerRoot", path_value(&sandbox.pod_dir(&pod.name))),
        ("ConfigRoot", path_value(&sandbox.config_dir())),
        ("LogRoot", path_value(&sandbox.pod_logs_dir(&pod.name))),
        ("RunRoot", path_value(&sandbox.pod_run_dir(&pod.name))),
        ("DataRoot", path_value(&sandbox.pod_data_dir(&pod.name))),
        ("DocumentRoot", path_value(&sandbox.pod_documents_dir(&pod.name))),
        ("PIDFile", path_value(&pod.marker_path)),
        ("Includes", PlistValue::Array(vec![path_value(&shared)])),
        ("ProxyLoadFromFile", path_value(&auth.proxies)),
        ("ResourceService/params/xmlFile", path_value(&auth.resources)),
        ("DirectoryService/params/xmlFile", path_value(&auth.accounts)),
        (
            "AugmentService/params/xmlFiles",
            PlistValue::Array(vec![path_value(&auth.augments)]),
        ),
        ("HTTPPort", PlistValue::Integer(i64::from(pod.http_port).into())),
        ("SSLPort", PlistValue::Integer(i64::from(pod.ssl_port).into())),
    ]
}

struct Materializer<'a> {
    config: &'a HarnessConfig,
    artifacts: Vec<MaterializedArtifact>,
}

impl Materializer<'_> {
    fn template(&self, name: &str, rel: &Path) -> Result<PathBuf> {
        let path = self.config.template_path(rel);
        if !path.is_file() {
            return Err(anyhow!(
                "template_missing: {} template not found at {}",
                name,
                path.display()
            ));
        }
        Ok(path)
    }

    fn record(&mut self, name: &str, source: &Path, destination: &Path) -> Result<()> {
        let sha256 = sha256_file(destination)?;
        debug!(artifact = name, destination = %destination.display(), %sha256, "materialized");
        self.artifacts.push(MaterializedArtifact {
            name: name.to_string(),
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            sha256,
        });
        Ok(())
    }

    fn copy(&mut self, name: &str, rel: &Path, destination: &Path) -> Result<()> {
        let source = self.template(name, rel)?;
        fs::copy(&source, destination).with_context(|| {
            format!(
                "failed to copy {} template {} to {}",
                name,
                source.display(),
                destination.display()
            )
        })?;
        self.record(name, &source, destination)
    }

    fn patch<F>(&mut self, name: &str, rel: &Path, destination: &Path, edit: F) -> Result<()>
    where
        F: FnOnce(&mut PlistDocument) -> Result<()>,
    {
        let source = self.template(name, rel)?;
        let mut doc = PlistDocument::load(&source)?;
        edit(&mut doc).with_context(|| format!("failed to rewrite {} config", name))?;
        doc.save(destination)?;
        self.record(name, &source, destination)
    }
}

fn apply_overrides(doc: &mut PlistDocument, overrides: &[FieldOverride]) -> Result<()> {
    for o in overrides {
        doc.set_json(&o.key, &o.value)?;
    }
    Ok(())
}

pub fn materialize(config: &HarnessConfig, sandbox: &Sandbox, pods: &[Pod]) -> Result<Materialized> {
    let config_dir = sandbox.config_dir();
    let auth = AuthPaths::in_sandbox(sandbox);
    let templates = &config.templates;
    let mut m = Materializer {
        config,
        artifacts: Vec::new(),
    };

    m.copy("proxies", &templates.proxies, &auth.proxies)?;
    m.copy("resources", &templates.resources, &auth.resources)?;
    m.copy("augments", &templates.augments, &auth.augments)?;
    m.copy("accounts", &templates.accounts, &auth.accounts)?;

    let shared_config = config_dir.join(SHARED_CONFIG_FILE);
    m.patch("server", &templates.server_config, &shared_config, |doc| {
        apply_overrides(doc, &config.shared_config_overrides)
    })?;

    let mut pod_configs = BTreeMap::new();
    for pod in pods {
        let def = config
            .pods
            .iter()
            .find(|d| d.name == pod.name)
            .ok_or_else(|| anyhow!("unknown pod {}", pod.name))?;
        let name = format!("server-{}", pod.name);
        m.patch(&name, &def.config_template, &pod.config_path, |doc| {
            for (key, value) in pod_field_rewrites(sandbox, pod) {
                doc.set(key, value)?;
            }
            Ok(())
        })?;
        pod_configs.insert(pod.name.clone(), pod.config_path.clone());
    }

    let run_config = config_dir.join(RUN_CONFIG_FILE);
    m.patch("loadtest-config", &templates.run_config, &run_config, |doc| {
        apply_overrides(doc, &config.run_config_overrides)
    })?;
    let clients = config_dir.join(CLIENTS_FILE);
    m.copy("loadtest-clients", &templates.clients, &clients)?;

    let manifest = json!({
        "schema_version": "pod_materialization_v1",
        "sandbox_root": sandbox.root().to_string_lossy(),
        "artifacts": m.artifacts,
    });
    atomic_write_json_pretty(&config_dir.join(MANIFEST_FILE), &manifest)?;
    info!(artifacts = m.artifacts.len(), "configuration materialized");

    Ok(Materialized {
        shared_config,
        pod_configs,
        run_config,
        clients,
        artifacts: m.artifacts,
    })
}

pub mod command;
pub mod config;
pub mod driver;
pub mod materialize;
pub mod pod;
pub mod sandbox;
pub mod server;
pub mod state;
pub mod workload;

pub use config::{FieldOverride, HarnessConfig, PodDefinition, ServerCommands, WorkloadCommand};
pub use driver::{orchestrate, RunOutcome};
pub use materialize::{materialize, Materialized};
pub use pod::{Pod, PodStartError, Readiness, RunningPod};
pub use sandbox::{Sandbox, SandboxError};
pub use server::{ProcessServerControl, ServerControl};
pub use state::Phase;
pub use workload::{ProcessWorkload, Workload, WorkloadParams};

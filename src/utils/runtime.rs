//! Container runtime abstraction
//!
//! The engine only needs a handful of runtime operations: discover labelled
//! workloads, stop/start them, and run short-lived helper containers. They
//! sit behind [`ContainerRuntime`] so the orchestration can be exercised
//! against [`mock::MockRuntime`] in tests and the docker CLI in production.

use super::command::{is_timeout, run_command, run_command_stdout, run_command_unchecked};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountKind {
    NamedVolume,
    BindMount,
}

/// A storage attachment as observed at discovery time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    /// Volume name, or the host source path for bind mounts
    pub name: String,
    pub kind: MountKind,
    pub target: PathBuf,
}

impl Mount {
    pub fn volume(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: MountKind::NamedVolume,
            target: PathBuf::from(target),
        }
    }

    pub fn bind(source: &str, target: &str) -> Self {
        Self {
            name: source.to_string(),
            kind: MountKind::BindMount,
            target: PathBuf::from(target),
        }
    }
}

/// A container as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workload {
    pub id: String,
    pub name: String,
    pub state: RunState,
    pub mounts: Vec<Mount>,
    pub labels: HashMap<String, String>,
}

/// Mount requested for a helper container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperMount {
    pub kind: MountKind,
    pub source: String,
    pub target: String,
}

/// Everything needed to create a helper container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<HelperMount>,
}

impl HelperSpec {
    /// Name of the first named volume mounted into the helper
    pub fn volume_name(&self) -> Option<&str> {
        self.mounts
            .iter()
            .find(|m| m.kind == MountKind::NamedVolume)
            .map(|m| m.source.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(i64),
    TimedOut,
}

/// Abstraction for container runtime operations, enabling mocking in tests
pub trait ContainerRuntime: Send + Sync {
    /// List workloads (running or not) carrying every `key=value` label given
    fn list_workloads(&self, label_filters: &[(String, String)]) -> Result<Vec<Workload>>;

    fn stop(&self, workload_id: &str) -> Result<()>;

    fn start(&self, workload_id: &str) -> Result<()>;

    /// Remove a stopped container, leaving its volumes alone
    fn remove(&self, workload_id: &str) -> Result<()>;

    /// Kill and remove a container regardless of state
    fn force_remove(&self, workload_id: &str) -> Result<()>;

    /// Create (but do not start) a helper container, returning its id
    fn create_helper(&self, spec: &HelperSpec) -> Result<String>;

    /// Block until the container exits or the deadline passes
    fn wait_for_exit(&self, workload_id: &str, deadline: Option<Duration>) -> Result<WaitStatus>;

    /// Make sure an image is available locally, pulling it if needed
    fn ensure_image(&self, image: &str) -> Result<()>;

    fn volume_exists(&self, volume_name: &str) -> Result<bool>;

    fn create_volume(&self, volume_name: &str) -> Result<()>;
}

/// Runtime implementation backed by the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    timeout: Duration,
}

impl DockerCli {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn docker(&self, args: &[&str]) -> Result<String> {
        run_command_stdout("docker", args, Some(self.timeout))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainer {
    id: String,
    #[serde(default)]
    name: String,
    state: InspectedState,
    #[serde(default)]
    config: Option<InspectedConfig>,
    #[serde(default)]
    mounts: Vec<InspectedMount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedState {
    #[serde(default)]
    running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedConfig {
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedMount {
    #[serde(rename = "Type")]
    mount_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
}

impl From<InspectedContainer> for Workload {
    fn from(c: InspectedContainer) -> Self {
        let mounts = c
            .mounts
            .into_iter()
            .filter_map(|m| {
                let kind = match m.mount_type.as_str() {
                    "volume" => MountKind::NamedVolume,
                    "bind" => MountKind::BindMount,
                    // tmpfs, npipe, ... carry no data worth archiving
                    _ => return None,
                };
                let name = match kind {
                    MountKind::NamedVolume => m.name.unwrap_or_default(),
                    MountKind::BindMount => m.source,
                };
                Some(Mount {
                    name,
                    kind,
                    target: PathBuf::from(m.destination),
                })
            })
            .collect();

        Workload {
            id: c.id,
            name: c.name.trim_start_matches('/').to_string(),
            state: if c.state.running {
                RunState::Running
            } else {
                RunState::Stopped
            },
            mounts,
            labels: c.config.and_then(|cfg| cfg.labels).unwrap_or_default(),
        }
    }
}

/// Parse the JSON array printed by `docker inspect`
pub fn parse_inspect_output(json: &str) -> Result<Vec<Workload>> {
    let containers: Vec<InspectedContainer> =
        serde_json::from_str(json).context("Failed to parse docker inspect output")?;
    Ok(containers.into_iter().map(Workload::from).collect())
}

/// Build the `docker create` argument list for a helper
pub fn helper_create_args(spec: &HelperSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];

    let mut labels: Vec<_> = spec.labels.iter().collect();
    labels.sort();
    for (key, value) in labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    for mount in &spec.mounts {
        let kind = match mount.kind {
            MountKind::NamedVolume => "volume",
            MountKind::BindMount => "bind",
        };
        args.push("--mount".to_string());
        args.push(format!(
            "type={},source={},target={}",
            kind, mount.source, mount.target
        ));
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

impl ContainerRuntime for DockerCli {
    fn list_workloads(&self, label_filters: &[(String, String)]) -> Result<Vec<Workload>> {
        let filters: Vec<String> = label_filters
            .iter()
            .map(|(k, v)| format!("label={}={}", k, v))
            .collect();

        let mut args = vec!["ps", "--all", "--quiet", "--no-trunc"];
        for filter in &filters {
            args.push("--filter");
            args.push(filter);
        }

        let ids_output = self.docker(&args).context("Failed to list containers")?;
        let ids: Vec<&str> = ids_output.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut inspect_args = vec!["inspect"];
        inspect_args.extend(ids.iter().copied());
        let json = self.docker(&inspect_args).context("Failed to inspect containers")?;

        parse_inspect_output(&json)
    }

    fn stop(&self, workload_id: &str) -> Result<()> {
        self.docker(&["stop", workload_id])
            .context(format!("Failed to stop container {}", workload_id))?;
        Ok(())
    }

    fn start(&self, workload_id: &str) -> Result<()> {
        self.docker(&["start", workload_id])
            .context(format!("Failed to start container {}", workload_id))?;
        Ok(())
    }

    fn remove(&self, workload_id: &str) -> Result<()> {
        self.docker(&["rm", workload_id])
            .context(format!("Failed to remove container {}", workload_id))?;
        Ok(())
    }

    fn force_remove(&self, workload_id: &str) -> Result<()> {
        self.docker(&["rm", "--force", workload_id])
            .context(format!("Failed to force-remove container {}", workload_id))?;
        Ok(())
    }

    fn create_helper(&self, spec: &HelperSpec) -> Result<String> {
        let args = helper_create_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self
            .docker(&arg_refs)
            .context(format!("Failed to create helper container {}", spec.name))?;
        Ok(id.trim().to_string())
    }

    fn wait_for_exit(&self, workload_id: &str, deadline: Option<Duration>) -> Result<WaitStatus> {
        match run_command_stdout("docker", &["wait", workload_id], deadline) {
            Ok(stdout) => {
                let code = stdout
                    .trim()
                    .parse::<i64>()
                    .context(format!("Unexpected docker wait output: {:?}", stdout.trim()))?;
                Ok(WaitStatus::Exited(code))
            }
            Err(e) if is_timeout(&e) => Ok(WaitStatus::TimedOut),
            Err(e) => Err(e.context(format!("Failed waiting for container {}", workload_id))),
        }
    }

    fn ensure_image(&self, image: &str) -> Result<()> {
        let inspect = run_command_unchecked("docker", &["image", "inspect", image], Some(self.timeout))?;
        if inspect.status.success() {
            debug!("Image already present: {}", image);
            return Ok(());
        }

        info!("Pulling image: {}", image);
        run_command("docker", &["pull", image], Some(self.timeout))
            .context(format!("Failed to pull image {}", image))?;
        Ok(())
    }

    fn volume_exists(&self, volume_name: &str) -> Result<bool> {
        let output = self.docker(&["volume", "ls", "--format", "{{.Name}}"])?;
        Ok(output.lines().any(|v| v.trim() == volume_name))
    }

    fn create_volume(&self, volume_name: &str) -> Result<()> {
        self.docker(&["volume", "create", volume_name])
            .context(format!("Failed to create volume {}", volume_name))?;
        Ok(())
    }
}

/// Mock implementation for testing
/// Available for use in external test crates
#[allow(dead_code)]
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Recorded runtime call
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum RuntimeCall {
        ListWorkloads,
        Stop { id: String },
        Start { id: String },
        Remove { id: String },
        ForceRemove { id: String },
        CreateHelper { spec: HelperSpec },
        Wait { id: String },
        EnsureImage { image: String },
        VolumeExists { name: String },
        CreateVolume { name: String },
    }

    type HelperEffect = Arc<dyn Fn(&HelperSpec) + Send + Sync>;

    /// Mock runtime for testing
    #[derive(Clone, Default)]
    pub struct MockRuntime {
        /// Recorded operation calls
        pub calls: Arc<Mutex<Vec<RuntimeCall>>>,
        workloads: Arc<Mutex<Vec<Workload>>>,
        volumes: Arc<Mutex<Vec<String>>>,
        helpers: Arc<Mutex<HashMap<String, HelperSpec>>>,
        failing_stop: Arc<Mutex<HashSet<String>>>,
        failing_start: Arc<Mutex<HashSet<String>>>,
        exit_codes: Arc<Mutex<HashMap<String, i64>>>,
        default_exit_code: Arc<Mutex<i64>>,
        should_fail_list: Arc<Mutex<bool>>,
        should_fail_create: Arc<Mutex<bool>>,
        should_time_out: Arc<Mutex<bool>>,
        helper_effect: Arc<Mutex<Option<HelperEffect>>>,
    }

    impl MockRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a workload to the runtime
        pub fn with_workload(self, workload: Workload) -> Self {
            self.workloads.lock().unwrap().push(workload);
            self
        }

        /// Pre-create volumes
        pub fn with_volumes(self, volumes: Vec<String>) -> Self {
            *self.volumes.lock().unwrap() = volumes;
            self
        }

        /// Make stop fail for one workload
        pub fn with_failing_stop(self, id: &str) -> Self {
            self.failing_stop.lock().unwrap().insert(id.to_string());
            self
        }

        /// Make start fail for one workload
        pub fn with_failing_start(self, id: &str) -> Self {
            self.failing_start.lock().unwrap().insert(id.to_string());
            self
        }

        /// Exit code for every helper
        pub fn with_exit_code(self, code: i64) -> Self {
            *self.default_exit_code.lock().unwrap() = code;
            self
        }

        /// Exit code for helpers mounting one volume
        pub fn with_exit_code_for_volume(self, volume: &str, code: i64) -> Self {
            self.exit_codes.lock().unwrap().insert(volume.to_string(), code);
            self
        }

        /// Configure list_workloads to fail
        pub fn with_failing_list(self) -> Self {
            *self.should_fail_list.lock().unwrap() = true;
            self
        }

        /// Configure helper creation to fail
        pub fn with_failing_create(self) -> Self {
            *self.should_fail_create.lock().unwrap() = true;
            self
        }

        /// Configure wait to hit its deadline
        pub fn with_wait_timeout(self) -> Self {
            *self.should_time_out.lock().unwrap() = true;
            self
        }

        /// Run a closure whenever a helper "executes", e.g. to write the archive
        pub fn with_helper_effect<F>(self, effect: F) -> Self
        where
            F: Fn(&HelperSpec) + Send + Sync + 'static,
        {
            *self.helper_effect.lock().unwrap() = Some(Arc::new(effect));
            self
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<RuntimeCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn stop_calls(&self, id: &str) -> usize {
            self.count(|c| matches!(c, RuntimeCall::Stop { id: i } if i == id))
        }

        pub fn start_calls(&self, id: &str) -> usize {
            self.count(|c| matches!(c, RuntimeCall::Start { id: i } if i == id))
        }

        pub fn remove_calls(&self) -> usize {
            self.count(|c| matches!(c, RuntimeCall::Remove { .. }))
        }

        pub fn force_remove_calls(&self) -> usize {
            self.count(|c| matches!(c, RuntimeCall::ForceRemove { .. }))
        }

        /// Specs of every helper created, in order
        pub fn helper_specs(&self) -> Vec<HelperSpec> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    RuntimeCall::CreateHelper { spec } => Some(spec.clone()),
                    _ => None,
                })
                .collect()
        }

        /// Current run state of a workload
        pub fn state_of(&self, id: &str) -> Option<RunState> {
            self.workloads
                .lock()
                .unwrap()
                .iter()
                .find(|w| w.id == id)
                .map(|w| w.state)
        }

        pub fn has_volume(&self, name: &str) -> bool {
            self.volumes.lock().unwrap().iter().any(|v| v == name)
        }

        fn count(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
        }

        fn record_call(&self, call: RuntimeCall) {
            self.calls.lock().unwrap().push(call);
        }

        fn set_state(&self, id: &str, state: RunState) {
            if let Some(w) = self.workloads.lock().unwrap().iter_mut().find(|w| w.id == id) {
                w.state = state;
            }
        }
    }

    impl ContainerRuntime for MockRuntime {
        fn list_workloads(&self, label_filters: &[(String, String)]) -> Result<Vec<Workload>> {
            self.record_call(RuntimeCall::ListWorkloads);
            if *self.should_fail_list.lock().unwrap() {
                anyhow::bail!("Mock list_workloads failure");
            }
            Ok(self
                .workloads
                .lock()
                .unwrap()
                .iter()
                .filter(|w| {
                    label_filters
                        .iter()
                        .all(|(k, v)| w.labels.get(k).map(|l| l == v).unwrap_or(false))
                })
                .cloned()
                .collect())
        }

        fn stop(&self, workload_id: &str) -> Result<()> {
            self.record_call(RuntimeCall::Stop { id: workload_id.to_string() });
            if self.failing_stop.lock().unwrap().contains(workload_id) {
                anyhow::bail!("Mock stop failure for {}", workload_id);
            }
            self.set_state(workload_id, RunState::Stopped);
            Ok(())
        }

        fn start(&self, workload_id: &str) -> Result<()> {
            self.record_call(RuntimeCall::Start { id: workload_id.to_string() });
            if self.failing_start.lock().unwrap().contains(workload_id) {
                anyhow::bail!("Mock start failure for {}", workload_id);
            }
            self.set_state(workload_id, RunState::Running);
            Ok(())
        }

        fn remove(&self, workload_id: &str) -> Result<()> {
            self.record_call(RuntimeCall::Remove { id: workload_id.to_string() });
            self.helpers.lock().unwrap().remove(workload_id);
            Ok(())
        }

        fn force_remove(&self, workload_id: &str) -> Result<()> {
            self.record_call(RuntimeCall::ForceRemove { id: workload_id.to_string() });
            self.helpers.lock().unwrap().remove(workload_id);
            Ok(())
        }

        fn create_helper(&self, spec: &HelperSpec) -> Result<String> {
            self.record_call(RuntimeCall::CreateHelper { spec: spec.clone() });
            if *self.should_fail_create.lock().unwrap() {
                anyhow::bail!("Mock create failure for {}", spec.name);
            }
            let mut helpers = self.helpers.lock().unwrap();
            let id = format!("helper-{}", self.count(|c| matches!(c, RuntimeCall::CreateHelper { .. })));
            helpers.insert(id.clone(), spec.clone());
            Ok(id)
        }

        fn wait_for_exit(&self, workload_id: &str, _deadline: Option<Duration>) -> Result<WaitStatus> {
            self.record_call(RuntimeCall::Wait { id: workload_id.to_string() });
            if *self.should_time_out.lock().unwrap() {
                return Ok(WaitStatus::TimedOut);
            }

            let spec = self
                .helpers
                .lock()
                .unwrap()
                .get(workload_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("No such container: {}", workload_id))?;

            let effect = self.helper_effect.lock().unwrap().clone();
            if let Some(effect) = effect {
                effect(&spec);
            }

            let code = spec
                .volume_name()
                .and_then(|v| self.exit_codes.lock().unwrap().get(v).copied())
                .unwrap_or(*self.default_exit_code.lock().unwrap());
            Ok(WaitStatus::Exited(code))
        }

        fn ensure_image(&self, image: &str) -> Result<()> {
            self.record_call(RuntimeCall::EnsureImage { image: image.to_string() });
            Ok(())
        }

        fn volume_exists(&self, volume_name: &str) -> Result<bool> {
            self.record_call(RuntimeCall::VolumeExists { name: volume_name.to_string() });
            Ok(self.has_volume(volume_name))
        }

        fn create_volume(&self, volume_name: &str) -> Result<()> {
            self.record_call(RuntimeCall::CreateVolume { name: volume_name.to_string() });
            let mut volumes = self.volumes.lock().unwrap();
            if !volumes.iter().any(|v| v == volume_name) {
                volumes.push(volume_name.to_string());
            }
            Ok(())
        }
    }
}

//! Runtime engine that orchestrates box lifecycle.
//!
//! Launch is a linear sequence of steps, each pushing its undo onto a
//! [`Rollback`] stack:
//!
//! 1. reserve the box directory and build the root filesystem,
//! 2. clone the init process into new namespaces,
//! 3. persist the record,
//! 4. write resource limits, then admit the init to its cgroups,
//! 5. connect it to the requested network,
//! 6. release the init pipe so the user command starts.
//!
//! Any failure before step 6 unwinds everything done so far.

use std::path::Path;
use std::time::Duration;

use boxwood_common::config::RuntimeConfig;
use boxwood_common::error::{BoxError, Result};
use boxwood_common::rollback::Rollback;
use boxwood_common::types::{
    ContainerId, ContainerRecord, ContainerStatus, PortMapping, ResourceConfig, VolumeSpec,
};
use boxwood_core::cgroup::{CgroupManager, Hierarchy};
use boxwood_network::controller::{NetworkController, NetworkPaths};
use nix::unistd::Pid;

use crate::logs;
use crate::process;
use crate::state::{self, ContainerStore};
use crate::workspace::{OverlayWorkspace, WorkspaceProvider};

/// Time a box gets between `SIGTERM` and `SIGKILL` on stop.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Everything `boxwood run` needs to start a box.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Image to use as the lower layer.
    pub image: String,
    /// User command; `command[0]` is resolved on the box's `PATH`.
    pub command: Vec<String>,
    /// Box name; defaults to the generated ID.
    pub name: Option<String>,
    /// Inherit stdio and wait for the command instead of detaching.
    pub interactive: bool,
    /// Resource limits.
    pub resources: ResourceConfig,
    /// Optional bind volume.
    pub volume: Option<VolumeSpec>,
    /// Extra `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Network to connect to.
    pub network: Option<String>,
    /// Ports to publish; requires `network`.
    pub port_mappings: Vec<PortMapping>,
}

/// Result of [`Engine::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The box runs in the background.
    Detached(ContainerRecord),
    /// The interactive command finished and the box was torn down.
    Exited {
        /// Record of the box as it was while running.
        record: ContainerRecord,
        /// Exit code of the command.
        code: i32,
    },
}

/// The runtime engine that coordinates all box operations.
pub struct Engine {
    config: RuntimeConfig,
    store: ContainerStore,
    workspace: Box<dyn WorkspaceProvider>,
    network: NetworkController,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.config.root)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine with the overlay workspace and the bridge network
    /// driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted networks cannot be loaded.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let network = NetworkController::init(&NetworkPaths::from(&config))?;
        let workspace = Box::new(OverlayWorkspace::new(&config));
        Ok(Self::with_parts(config, workspace, network))
    }

    /// Creates an engine from explicit parts.
    #[must_use]
    pub fn with_parts(
        config: RuntimeConfig,
        workspace: Box<dyn WorkspaceProvider>,
        network: NetworkController,
    ) -> Self {
        Self {
            store: ContainerStore::new(config.box_dir()),
            config,
            workspace,
            network,
        }
    }

    /// Runtime configuration.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Network controller, for network management commands.
    #[must_use]
    pub const fn network(&self) -> &NetworkController {
        &self.network
    }

    /// Mutable network controller.
    pub const fn network_mut(&mut self) -> &mut NetworkController {
        &mut self.network
    }

    fn hierarchy(&self) -> Hierarchy {
        Hierarchy::from_root(self.config.cgroup_root.clone())
    }

    fn cgroup(&self, id: &ContainerId) -> CgroupManager {
        CgroupManager::new(id.as_str(), self.hierarchy())
    }

    fn validate(&self, request: &RunRequest, name: &str) -> Result<()> {
        if request.command.is_empty() {
            return Err(BoxError::Config {
                message: "no command given".into(),
            });
        }
        state::validate_name(name)?;
        if self.store.exists(name) {
            return Err(BoxError::AlreadyExists {
                kind: "box",
                id: name.to_string(),
            });
        }
        match &request.network {
            Some(network) => {
                let _ = self.network.network(network)?;
            }
            None if !request.port_mappings.is_empty() => {
                return Err(BoxError::Config {
                    message: "port mappings require a network".into(),
                });
            }
            None => {}
        }
        Ok(())
    }

    /// Starts a box.
    ///
    /// Detached boxes keep running after this returns and write their
    /// output to `output.log`. Interactive boxes share the caller's stdio;
    /// this waits for the command and tears the box down afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if validation or any launch step fails. Nothing is
    /// left behind in that case.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        let id = ContainerId::generate();
        let name = request.name.clone().unwrap_or_else(|| id.to_string());
        self.validate(request, &name)?;
        let cgroup = self.cgroup(&id);
        let mut undo = Rollback::new("box launch");

        undo.push(format!("remove box directory {name}"), || {
            self.store.remove(&name)
        });
        let rootfs = self
            .workspace
            .create(&request.image, &name, request.volume.as_ref())?;
        undo.push(format!("delete workspace {name}"), || {
            self.workspace.delete(&name, request.volume.as_ref())
        });
        undo.push(format!("destroy cgroup {id}"), || cgroup.destroy());

        let log = if request.interactive {
            None
        } else {
            Some(logs::create_log(self.store.dir(), &name)?)
        };
        let init = process::spawn_init(&rootfs, &request.env, log.as_ref())?;
        drop(log);
        let pid = init.pid();
        undo.push(format!("kill init {pid}"), move || process::kill_and_reap(pid));

        let mut record =
            ContainerRecord::running(id.clone(), name.clone(), &request.command, pid.as_raw());
        record.volume.clone_from(&request.volume);
        record.port_mappings.clone_from(&request.port_mappings);
        record.network.clone_from(&request.network);
        self.store.save(&record)?;

        cgroup.set(&request.resources)?;
        cgroup.apply(pid.as_raw())?;

        if let Some(network) = request.network.as_deref() {
            let endpoint = self.network.connect(network, &record)?;
            record.ip_address = Some(endpoint.ip_address);
            let connected = record.clone();
            undo.push(format!("disconnect from {network}"), move || {
                self.network.disconnect(network, &connected)
            });
            self.store.save(&record)?;
        }

        init.send_command(&request.command)?;
        undo.commit();
        tracing::info!(
            box_id = %id,
            name = %name,
            pid = %pid,
            interactive = request.interactive,
            "box started"
        );

        if !request.interactive {
            return Ok(RunOutcome::Detached(record));
        }
        let code = process::wait_exit(pid)?;
        tracing::info!(name = %name, code, "interactive box exited");
        self.teardown(&record)?;
        Ok(RunOutcome::Exited { record, code })
    }

    /// Removes everything a finished box still holds.
    fn teardown(&self, record: &ContainerRecord) -> Result<()> {
        let mut failures = Vec::new();
        if let Some(network) = &record.network {
            if let Err(e) = self.network.release_endpoint(network, record) {
                failures.push(e);
            }
        }
        if let Err(e) = self.cgroup(&record.id).destroy() {
            failures.push(e);
        }
        if let Err(e) = self.workspace.delete(&record.name, record.volume.as_ref()) {
            failures.push(e);
        }
        if let Err(e) = self.store.remove(&record.name) {
            failures.push(e);
        }
        BoxError::check_cleanup(failures)
    }

    /// Lists every known box, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the box directory cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        self.store.list()
    }

    /// Returns the detached output of box `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::NotFound`] if there is no such box.
    pub fn logs(&self, name: &str) -> Result<String> {
        let _ = self.store.load(name)?;
        logs::read_logs(self.store.dir(), name)
    }

    /// Stops box `name` and releases its cgroups.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::NotFound`] for an unknown box,
    /// [`BoxError::InvalidState`] if it is not running, or an error if it
    /// cannot be signalled.
    pub fn stop(&self, name: &str) -> Result<ContainerRecord> {
        let mut record = self.store.load(name)?;
        let pid = record.running_pid()?;
        process::terminate(Pid::from_raw(pid), STOP_GRACE)?;

        record.status = ContainerStatus::Stopped;
        record.pid = None;
        self.store.save(&record)?;
        self.cgroup(&record.id).destroy()?;
        tracing::info!(name, box_id = %record.id, "box stopped");
        Ok(record)
    }

    /// Runs `command` inside running box `name` and returns its exit code.
    ///
    /// The command joins every namespace of the box and sees the box's
    /// environment layered over the caller's.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Config`] for an empty command,
    /// [`BoxError::NotFound`] for an unknown box, [`BoxError::InvalidState`]
    /// if the box is not running, or an error if the helper cannot start.
    pub fn exec(&self, name: &str, command: &[String]) -> Result<i32> {
        if command.is_empty() {
            return Err(BoxError::Config {
                message: "exec needs a command".into(),
            });
        }
        let record = self.store.load(name)?;
        let pid = Pid::from_raw(record.running_pid()?);
        if !process::is_alive(pid) {
            return Err(BoxError::InvalidState {
                message: format!("box `{name}` is marked running but its init {pid} is gone"),
            });
        }
        let env = process::read_environ(pid)?;
        tracing::info!(name, box_id = %record.id, pid = %pid, command = ?command, "exec in box");
        process::exec_in(pid, &env, command)
    }

    /// Removes stopped box `name`: its network endpoint, its workspace and
    /// its directory.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::InvalidState`] if the box is still running
    /// (nothing is touched), or [`BoxError::Cleanup`] listing every step
    /// that failed.
    pub fn remove(&self, name: &str) -> Result<()> {
        let record = self.store.load(name)?;
        if record.status == ContainerStatus::Running {
            return Err(BoxError::InvalidState {
                message: format!("box `{name}` is running, stop it first"),
            });
        }
        self.teardown(&record)?;
        tracing::info!(name, box_id = %record.id, "box removed");
        Ok(())
    }

    /// Directory of box `name`.
    #[must_use]
    pub fn box_dir(&self, name: &str) -> std::path::PathBuf {
        self.store.box_dir(name)
    }

    /// Root of all runtime state.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.config.root()
    }
}

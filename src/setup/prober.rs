//! Prerequisite detection and install polling.
//!
//! Each prerequisite's status is derived from bridge readings through the pure
//! [`advance`] reducer and published on a `watch` channel. Polling runs in a
//! cancellable background task with a fixed interval and a bounded number of
//! attempts; the task is aborted when the prober is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bridge::{ContainerEngineStatus, ModelRuntimeStatus, NativeBridge};
use crate::config::{PollPolicy, SetupRuntimeConfig};
use crate::error::{BridgeError, RecoveryAction};

/// The external prerequisites the agent runtime depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Prerequisite {
    ContainerEngine,
    ModelRuntime,
}

impl Prerequisite {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::ContainerEngine => "Docker",
            Self::ModelRuntime => "Ollama",
        }
    }
}

/// Observed status of one prerequisite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrerequisiteStatus {
    Checking,
    Installed,
    NotInstalled,
    Running,
    NotRunning,
    Installing,
}

impl PrerequisiteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Installed => "installed",
            Self::NotInstalled => "not_installed",
            Self::Running => "running",
            Self::NotRunning => "not_running",
            Self::Installing => "installing",
        }
    }
}

/// One reading from the bridge, normalized across prerequisites.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReading {
    pub installed: bool,
    pub running: bool,
    pub version: Option<String>,
    pub download_url: Option<String>,
}

impl From<ContainerEngineStatus> for ProbeReading {
    fn from(status: ContainerEngineStatus) -> Self {
        Self {
            installed: status.installed,
            running: status.running,
            version: status.version,
            download_url: status.download_url,
        }
    }
}

impl From<ModelRuntimeStatus> for ProbeReading {
    fn from(status: ModelRuntimeStatus) -> Self {
        Self {
            installed: status.installed,
            running: status.running,
            version: status.version,
            download_url: None,
        }
    }
}

/// Apply one reading to a status.
///
/// `Checking` always passes through `Installed`/`NotInstalled` first, and
/// `Installing` stays put until the reading reports an installation.
pub fn advance(status: PrerequisiteStatus, reading: &ProbeReading) -> PrerequisiteStatus {
    use PrerequisiteStatus::*;

    match status {
        Checking | NotInstalled => {
            if reading.installed {
                Installed
            } else {
                NotInstalled
            }
        }
        Installing => {
            if reading.installed {
                Installed
            } else {
                Installing
            }
        }
        Installed | NotRunning | Running => {
            if !reading.installed {
                NotInstalled
            } else if reading.running {
                Running
            } else {
                NotRunning
            }
        }
    }
}

/// Published state of one prerequisite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeSnapshot {
    pub status: PrerequisiteStatus,
    pub version: Option<String>,
    pub download_url: Option<String>,
    /// Poll attempts made by the current (or last) polling task.
    pub attempts: u32,
    pub polling: bool,
    /// Guidance shown next to the status.
    pub hint: Option<String>,
    /// Every status this prerequisite has passed through, in order.
    pub history: Vec<PrerequisiteStatus>,
}

impl ProbeSnapshot {
    fn new() -> Self {
        Self {
            status: PrerequisiteStatus::Checking,
            version: None,
            download_url: None,
            attempts: 0,
            polling: false,
            hint: None,
            history: vec![PrerequisiteStatus::Checking],
        }
    }

    fn record(&mut self, status: PrerequisiteStatus) {
        if self.status != status {
            self.status = status;
            self.history.push(status);
        }
    }

    /// Step the status through the reducer until it settles.
    fn absorb(&mut self, dependency: Prerequisite, reading: &ProbeReading) {
        if reading.version.is_some() {
            self.version = reading.version.clone();
        }
        if reading.download_url.is_some() {
            self.download_url = reading.download_url.clone();
        }
        for _ in 0..3 {
            let next = advance(self.status, reading);
            if next == self.status {
                break;
            }
            self.record(next);
        }
        self.hint = status_hint(dependency, self.status, self.download_url.as_deref());
    }

    pub fn is_running(&self) -> bool {
        self.status == PrerequisiteStatus::Running
    }

    /// `Re-check` once polling has given up on a missing or stopped prerequisite.
    pub fn recovery_action(&self) -> Option<RecoveryAction> {
        let failed = matches!(
            self.status,
            PrerequisiteStatus::NotInstalled | PrerequisiteStatus::NotRunning
        );
        (failed && !self.polling).then_some(RecoveryAction::Recheck)
    }
}

fn status_hint(
    dependency: Prerequisite,
    status: PrerequisiteStatus,
    download_url: Option<&str>,
) -> Option<String> {
    let name = dependency.display_name();
    match (dependency, status) {
        (Prerequisite::ContainerEngine, PrerequisiteStatus::NotInstalled) => Some(match download_url {
            Some(url) => format!("{name} Desktop is required. Download it from {url}, install it, then re-check."),
            None => format!("{name} Desktop is required. Install it, then re-check."),
        }),
        (Prerequisite::ContainerEngine, PrerequisiteStatus::NotRunning) => Some(format!(
            "{name} is installed but not running. Open {name} Desktop and wait for it to start."
        )),
        (Prerequisite::ModelRuntime, PrerequisiteStatus::NotInstalled) => Some(format!(
            "{name} is not installed. Install it to run models locally."
        )),
        (Prerequisite::ModelRuntime, PrerequisiteStatus::NotRunning) => Some(format!(
            "{name} is installed but not running. Open the {name} app."
        )),
        (_, PrerequisiteStatus::Installing) => Some(format!("Installing {name}...")),
        _ => None,
    }
}

fn timeout_hint(dependency: Prerequisite, status: PrerequisiteStatus) -> String {
    let name = dependency.display_name();
    match status {
        PrerequisiteStatus::NotInstalled => format!(
            "Timed out waiting for {name} to install. Finish the installation, then re-check."
        ),
        _ => format!("Timed out waiting for {name} to start. Start it manually, then re-check."),
    }
}

/// Progress of the background agent-image pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "message")]
pub enum PrepullState {
    NotStarted,
    Pulling,
    Ready,
    Failed(String),
}

/// Starts the agent-image pull once and tracks its progress.
#[derive(Debug, Clone)]
pub struct PrepullTracker {
    state: Arc<watch::Sender<PrepullState>>,
    started: Arc<AtomicBool>,
}

impl Default for PrepullTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PrepullTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PrepullState::NotStarted);
        Self {
            state: Arc::new(tx),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> PrepullState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PrepullState> {
        self.state.subscribe()
    }

    /// Start the pull in the background. Returns `false` if it was already started.
    ///
    /// Pull failures are recorded but never surfaced as errors; the commit
    /// pulls the image again if needed.
    pub fn start(&self, bridge: Arc<dyn NativeBridge>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.send_replace(PrepullState::Pulling);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            match bridge.prepull_image().await {
                Ok(()) => {
                    tracing::info!("Agent image pre-pulled");
                    state.send_replace(PrepullState::Ready);
                }
                Err(e) => {
                    tracing::debug!("Agent image pre-pull failed: {}", e);
                    state.send_replace(PrepullState::Failed(e.to_string()));
                }
            }
        });
        true
    }
}

/// Everything a polling task needs, cloned into the task.
#[derive(Clone)]
struct ProbeContext {
    dependency: Prerequisite,
    bridge: Arc<dyn NativeBridge>,
    tx: Arc<watch::Sender<ProbeSnapshot>>,
    prepull: PrepullTracker,
}

impl ProbeContext {
    async fn read(&self) -> Result<ProbeReading, BridgeError> {
        match self.dependency {
            Prerequisite::ContainerEngine => {
                self.bridge.check_container_engine().await.map(Into::into)
            }
            Prerequisite::ModelRuntime => self.bridge.check_model_runtime().await.map(Into::into),
        }
    }

    fn apply(&self, reading: &ProbeReading) -> PrerequisiteStatus {
        let mut status = PrerequisiteStatus::Checking;
        self.tx.send_modify(|snapshot| {
            snapshot.absorb(self.dependency, reading);
            status = snapshot.status;
        });
        if self.dependency == Prerequisite::ContainerEngine
            && status == PrerequisiteStatus::Running
            && self.prepull.start(Arc::clone(&self.bridge))
        {
            tracing::debug!("Container engine running, started image pre-pull");
        }
        status
    }

    /// One explicit check. Bridge failures read as "not installed".
    async fn check(&self) {
        match self.read().await {
            Ok(reading) => {
                self.apply(&reading);
            }
            Err(e) => {
                tracing::debug!(dependency = ?self.dependency, "Probe failed: {}", e);
                self.apply(&ProbeReading::default());
                let name = self.dependency.display_name();
                self.tx.send_modify(|snapshot| {
                    snapshot.hint = Some(format!("Could not check {name}: {e}"));
                });
            }
        }
    }

    /// Poll until the prerequisite is running or the attempts run out.
    async fn poll(self, policy: PollPolicy) {
        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
            self.tx.send_modify(|snapshot| snapshot.attempts = attempt);

            let reading = match self.read().await {
                Ok(reading) => reading,
                Err(e) => {
                    tracing::debug!(dependency = ?self.dependency, attempt, "Poll failed: {}", e);
                    continue;
                }
            };
            if self.apply(&reading) == PrerequisiteStatus::Running {
                self.tx.send_modify(|snapshot| snapshot.polling = false);
                tracing::info!(dependency = ?self.dependency, attempt, "Prerequisite is running");
                return;
            }
        }

        let dependency = self.dependency;
        self.tx.send_modify(|snapshot| {
            let terminal = match snapshot.status {
                PrerequisiteStatus::Checking
                | PrerequisiteStatus::Installing
                | PrerequisiteStatus::NotInstalled => PrerequisiteStatus::NotInstalled,
                _ => PrerequisiteStatus::NotRunning,
            };
            snapshot.record(terminal);
            snapshot.polling = false;
            snapshot.hint = Some(timeout_hint(dependency, terminal));
        });
        tracing::warn!(
            ?dependency,
            attempts = policy.max_attempts,
            "Gave up waiting for prerequisite"
        );
    }
}

/// Detects and waits for the container engine and the model runtime.
pub struct PrerequisiteProber {
    bridge: Arc<dyn NativeBridge>,
    docker_poll: PollPolicy,
    ollama_poll: PollPolicy,
    engine: Arc<watch::Sender<ProbeSnapshot>>,
    runtime: Arc<watch::Sender<ProbeSnapshot>>,
    prepull: PrepullTracker,
    tasks: HashMap<Prerequisite, JoinHandle<()>>,
}

impl PrerequisiteProber {
    pub fn new(bridge: Arc<dyn NativeBridge>, config: &SetupRuntimeConfig) -> Self {
        let (engine, _) = watch::channel(ProbeSnapshot::new());
        let (runtime, _) = watch::channel(ProbeSnapshot::new());
        Self {
            bridge,
            docker_poll: config.docker_poll,
            ollama_poll: config.ollama_poll,
            engine: Arc::new(engine),
            runtime: Arc::new(runtime),
            prepull: PrepullTracker::new(),
            tasks: HashMap::new(),
        }
    }

    fn context(&self, dependency: Prerequisite) -> ProbeContext {
        let tx = match dependency {
            Prerequisite::ContainerEngine => &self.engine,
            Prerequisite::ModelRuntime => &self.runtime,
        };
        ProbeContext {
            dependency,
            bridge: Arc::clone(&self.bridge),
            tx: Arc::clone(tx),
            prepull: self.prepull.clone(),
        }
    }

    fn policy(&self, dependency: Prerequisite) -> PollPolicy {
        match dependency {
            Prerequisite::ContainerEngine => self.docker_poll,
            Prerequisite::ModelRuntime => self.ollama_poll,
        }
    }

    pub fn snapshot(&self, dependency: Prerequisite) -> ProbeSnapshot {
        self.context(dependency).tx.borrow().clone()
    }

    pub fn subscribe(&self, dependency: Prerequisite) -> watch::Receiver<ProbeSnapshot> {
        self.context(dependency).tx.subscribe()
    }

    pub fn prepull(&self) -> PrepullTracker {
        self.prepull.clone()
    }

    /// Probe both prerequisites once, concurrently. Cancels any polling.
    pub async fn check_prerequisites(&mut self) -> (ProbeSnapshot, ProbeSnapshot) {
        self.cancel_all();
        let engine = self.context(Prerequisite::ContainerEngine);
        let runtime = self.context(Prerequisite::ModelRuntime);
        tokio::join!(engine.check(), runtime.check());
        (
            self.snapshot(Prerequisite::ContainerEngine),
            self.snapshot(Prerequisite::ModelRuntime),
        )
    }

    /// Start polling a prerequisite until it is running. No-op if already polling.
    pub fn start_polling(&mut self, dependency: Prerequisite) {
        if self
            .tasks
            .get(&dependency)
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }
        let ctx = self.context(dependency);
        ctx.tx.send_modify(|snapshot| {
            snapshot.attempts = 0;
            snapshot.polling = true;
        });
        let handle = tokio::spawn(ctx.poll(self.policy(dependency)));
        self.tasks.insert(dependency, handle);
    }

    /// Ask the bridge to install a prerequisite, then poll for it.
    ///
    /// A container-engine install failure ends in `NotInstalled` with the
    /// bridge's message as the hint and no polling. Model-runtime install
    /// errors are logged and polling proceeds anyway.
    pub async fn install(&mut self, dependency: Prerequisite) {
        self.cancel(dependency);
        let ctx = self.context(dependency);
        ctx.tx
            .send_modify(|snapshot| snapshot.record(PrerequisiteStatus::Installing));

        let result = match dependency {
            Prerequisite::ContainerEngine => self.bridge.install_container_engine().await,
            Prerequisite::ModelRuntime => self.bridge.install_model_runtime().await,
        };
        match (dependency, result) {
            (_, Ok(message)) => {
                tracing::info!(?dependency, "{}", message);
                ctx.tx.send_modify(|snapshot| snapshot.hint = Some(message));
            }
            (Prerequisite::ContainerEngine, Err(e)) => {
                tracing::warn!("Container engine install failed: {}", e);
                ctx.tx.send_modify(|snapshot| {
                    snapshot.record(PrerequisiteStatus::NotInstalled);
                    snapshot.polling = false;
                    snapshot.hint = Some(e.to_string());
                });
                return;
            }
            (Prerequisite::ModelRuntime, Err(e)) => {
                tracing::debug!("Model runtime install reported an error, polling anyway: {}", e);
            }
        }
        self.start_polling(dependency);
    }

    /// Stop polling. An install still in progress settles on `NotInstalled`
    /// so the user is offered a re-check.
    pub fn cancel(&mut self, dependency: Prerequisite) {
        if let Some(task) = self.tasks.remove(&dependency) {
            task.abort();
            let name = dependency.display_name();
            self.context(dependency).tx.send_modify(|snapshot| {
                snapshot.polling = false;
                if snapshot.status == PrerequisiteStatus::Installing {
                    snapshot.record(PrerequisiteStatus::NotInstalled);
                    snapshot.hint = Some(format!(
                        "Stopped waiting for {name} to install. Finish the installation, then re-check."
                    ));
                }
            });
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel(Prerequisite::ContainerEngine);
        self.cancel(Prerequisite::ModelRuntime);
    }
}

impl Drop for PrerequisiteProber {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

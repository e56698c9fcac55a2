//! Application
//!
//! Hosts a set of extensions described by an [`AppConfig`]: creates them
//! through the bridge, attaches them to a [`LocalCore`], runs one runner task
//! per extension and stops them all on request.

use std::sync::Arc;
use std::time::Duration;

use aptima_bridge::{AddonRegistry, Bridge, Env, ExtensionHandles, LifecycleState, NativeCore, NativeMsg};
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::local_core::LocalCore;
use crate::routes::RouteTable;
use crate::runner::{Runner, RunnerEvent};

/// A running extension
struct RunningExtension {
    handles: ExtensionHandles,
    tx: mpsc::Sender<RunnerEvent>,
    state: watch::Receiver<LifecycleState>,
    join_handle: JoinHandle<()>,
}

pub struct App {
    config: AppConfig,
    bridge: Bridge,
    core: Arc<LocalCore>,
    running: DashMap<String, RunningExtension>,
}

impl App {
    /// Validate `config` and prepare the core. Nothing runs until [`App::start`].
    pub fn new(config: AppConfig, addons: Arc<AddonRegistry>) -> RuntimeResult<Self> {
        config.validate()?;
        for ext in &config.extensions {
            if !addons.contains(&ext.addon) {
                return Err(aptima_bridge::BridgeError::AddonNotFound(ext.addon.clone()).into());
            }
        }
        let core = LocalCore::new(RouteTable::from_config(&config.connections));
        Ok(Self {
            config,
            bridge: Bridge::new(addons),
            core,
            running: DashMap::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn core(&self) -> &Arc<LocalCore> {
        &self.core
    }

    /// Spawn every extension and wait until all of them have started.
    ///
    /// On failure every extension spawned so far is stopped before the error
    /// is returned.
    pub async fn start(&self) -> RuntimeResult<()> {
        if !self.running.is_empty() {
            return Err(RuntimeError::AlreadyStarted);
        }

        if let Err(e) = self.launch().await {
            tracing::warn!(error = %e, "App failed to start, stopping extensions");
            self.stop().await?;
            return Err(e);
        }

        tracing::info!("App started with {} extensions", self.running.len());
        Ok(())
    }

    async fn launch(&self) -> RuntimeResult<()> {
        for ext in &self.config.extensions {
            let core: Arc<dyn NativeCore> = self.core.clone();
            let handles = self.bridge.create_extension(&ext.addon, &ext.name, core)?;

            let (tx, rx) = mpsc::channel(self.config.app.queue_capacity);
            self.core.attach(&ext.name, handles, tx.clone());
            if !ext.property.is_null() {
                self.core
                    .init_property_from_json(handles.env, &ext.property.to_string())?;
            }

            let (state_tx, state_rx) = watch::channel(LifecycleState::Unconfigured);
            let runner = Runner::new(
                &ext.name,
                handles,
                self.bridge.clone(),
                self.core.clone(),
                rx,
                state_tx,
                &self.config.app,
            );
            let join_handle = tokio::spawn(runner.run());

            self.running.insert(
                ext.name.clone(),
                RunningExtension {
                    handles,
                    tx,
                    state: state_rx,
                    join_handle,
                },
            );
        }

        // One deadline for the whole app, not one per extension.
        let deadline = Instant::now() + Duration::from_millis(self.config.app.start_timeout_ms);
        let watchers: Vec<(String, watch::Receiver<LifecycleState>)> = self
            .running
            .iter()
            .map(|r| (r.key().clone(), r.state.clone()))
            .collect();

        for (name, mut state) in watchers {
            let reached = tokio::time::timeout_at(deadline, async {
                state
                    .wait_for(|s| *s >= LifecycleState::Started)
                    .await
                    .map(|s| s.is_started())
            })
            .await;
            match reached {
                Ok(Ok(true)) => {}
                Ok(_) => return Err(RuntimeError::StartFailed(name)),
                Err(_) => return Err(RuntimeError::StartTimeout(name)),
            }
        }
        Ok(())
    }

    /// Stop every extension and wait for their runners to finish.
    pub async fn stop(&self) -> RuntimeResult<()> {
        let names: Vec<String> = self.running.iter().map(|r| r.key().clone()).collect();
        let mut joins = Vec::with_capacity(names.len());

        for name in names {
            if let Some((_, running)) = self.running.remove(&name) {
                if running.tx.send(RunnerEvent::Stop).await.is_err() {
                    tracing::debug!(extension = %name, "Runner already finished");
                }
                joins.push((name, running.join_handle));
            }
        }

        let results = futures::future::join_all(joins.into_iter().map(|(name, join)| async move {
            (name, join.await)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                tracing::error!(extension = %name, error = %e, "Runner task failed");
            }
        }
        tracing::info!("App stopped");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outer sender
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a command to `dest` and wait for its final result.
    pub async fn send_cmd(&self, dest: &str, cmd: NativeMsg) -> RuntimeResult<NativeMsg> {
        let rx = self.core.inject_cmd(dest, cmd)?;
        let result = rx.await.map_err(|_| RuntimeError::ChannelClosed)??;
        Ok(result)
    }

    /// Send a data or frame message to `dest`.
    pub fn send_msg(&self, dest: &str, msg: NativeMsg) -> RuntimeResult<()> {
        self.core.inject_msg(dest, msg)?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn state(&self, name: &str) -> Option<LifecycleState> {
        self.running.get(name).map(|r| *r.state.borrow())
    }

    /// Environment of a running extension
    pub fn env(&self, name: &str) -> RuntimeResult<Env> {
        let env = self
            .running
            .get(name)
            .map(|r| r.handles.env)
            .ok_or_else(|| RuntimeError::UnknownExtension(name.to_string()))?;
        Ok(self.bridge.env(env)?)
    }

    pub fn extension_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.running.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

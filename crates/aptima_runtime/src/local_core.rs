//! Local Message Core
//!
//! An in-process implementation of [`NativeCore`]. It routes commands and
//! messages between the hosted extensions along the configured connections,
//! correlates results with the commands they answer, keeps each extension's
//! property store and re-emits extension logs as tracing events.
//!
//! The core never calls into the bridge directly. Everything it has to tell
//! an extension is posted to that extension's runner queue and handled on the
//! runner's task.

use std::sync::Arc;

use aptima_bridge::{
    BridgeError, BridgeResult, ExtensionHandles, Handle, LifecycleSignal, LogLevel, LogRecord,
    MsgKind, NativeCore, NativeMsg, PropertyStore, Value,
};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::routes::RouteTable;
use crate::runner::RunnerEvent;

/// Sender name used for messages injected from outside the graph
pub const OUTER_SOURCE: &str = "outer";

struct Slot {
    name: String,
    extension: Handle,
    tx: mpsc::Sender<RunnerEvent>,
}

/// Who is waiting for the results of a routed command
enum Origin {
    Extension { env: Handle, callback: Handle },
    Outer(oneshot::Sender<BridgeResult<NativeMsg>>),
}

/// An in-flight command, keyed by its correlation id
struct Path {
    origin: Origin,
    dest_env: Handle,
}

/// Receives the final result of a command injected with [`LocalCore::inject_cmd`]
pub type ResultReceiver = oneshot::Receiver<BridgeResult<NativeMsg>>;

pub struct LocalCore {
    routes: RouteTable,
    /// Attached extensions by env handle
    slots: DashMap<Handle, Slot>,
    /// Env handle by extension instance name
    names: DashMap<String, Handle>,
    paths: DashMap<String, Path>,
    properties: DashMap<Handle, PropertyStore>,
}

impl LocalCore {
    pub fn new(routes: RouteTable) -> Arc<Self> {
        Arc::new(Self {
            routes,
            slots: DashMap::new(),
            names: DashMap::new(),
            paths: DashMap::new(),
            properties: DashMap::new(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attachment
    // ─────────────────────────────────────────────────────────────────────────

    /// Make an extension reachable under `name`; its events go to `tx`.
    pub(crate) fn attach(&self, name: &str, handles: ExtensionHandles, tx: mpsc::Sender<RunnerEvent>) {
        self.slots.insert(
            handles.env,
            Slot {
                name: name.to_string(),
                extension: handles.extension,
                tx,
            },
        );
        self.names.insert(name.to_string(), handles.env);
        self.properties.insert(handles.env, PropertyStore::new());
        tracing::debug!(extension = %name, env = %handles.env, "Extension attached");
    }

    /// Remove an extension. Commands still waiting on it are answered with
    /// an error result.
    pub(crate) fn detach(&self, env: Handle) {
        let Some((_, slot)) = self.slots.remove(&env) else {
            return;
        };
        self.names.remove(&slot.name);
        self.properties.remove(&env);

        let orphaned: Vec<String> = self
            .paths
            .iter()
            .filter(|p| p.dest_env == env || matches!(p.origin, Origin::Extension { env: e, .. } if e == env))
            .map(|p| p.key().clone())
            .collect();

        for id in orphaned {
            let Some((_, path)) = self.paths.remove(&id) else {
                continue;
            };
            if path.dest_env != env {
                continue;
            }
            let mut result = NativeMsg::error_result(&id, &format!("{} closed before answering", slot.name));
            result.set_completed(true);
            self.route_result(path.origin, Ok(result));
        }
        tracing::debug!(extension = %slot.name, extension_handle = %slot.extension, "Extension detached");
    }

    pub fn is_attached(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Number of commands still waiting for a final result
    pub fn in_flight(&self) -> usize {
        self.paths.len()
    }

    fn name_of(&self, env: Handle) -> BridgeResult<String> {
        self.slots
            .get(&env)
            .map(|s| s.name.clone())
            .ok_or(BridgeError::EnvironmentExpired)
    }

    fn env_of(&self, name: &str) -> Option<Handle> {
        self.names.get(name).map(|e| *e.value())
    }

    fn post(&self, env: Handle, event: RunnerEvent) -> BridgeResult<()> {
        let tx = self
            .slots
            .get(&env)
            .map(|s| s.tx.clone())
            .ok_or(BridgeError::EnvironmentExpired)?;
        tx.try_send(event).map_err(|e| BridgeError::NativeCallFailure {
            code: -1,
            message: format!("event queue unavailable: {e}"),
        })
    }

    fn route_result(&self, origin: Origin, outcome: BridgeResult<NativeMsg>) {
        match origin {
            Origin::Extension { env, callback } => {
                if callback.is_none() {
                    return;
                }
                if let Err(e) = self.post(env, RunnerEvent::CmdResult { callback, outcome }) {
                    tracing::debug!(env = %env, error = %e, "Dropping result for departed sender");
                }
            }
            Origin::Outer(tx) => {
                let _ = tx.send(outcome);
            }
        }
    }

    /// Deliver a copy of `msg` from `source` to every attached destination.
    /// Returns one entry per prepared copy, true when it was accepted.
    fn fan_out<F>(&self, source: &str, msg: &NativeMsg, mut prepare: F) -> Vec<bool>
    where
        F: FnMut(&mut NativeMsg, Handle),
    {
        let mut accepted = Vec::new();
        for dest in self.routes.destinations(source, msg.kind(), msg.name()) {
            let Some(dest_env) = self.env_of(&dest) else {
                tracing::debug!(from = %source, to = %dest, "Destination not attached");
                continue;
            };
            let mut copy = msg.clone();
            copy.set_source(source);
            prepare(&mut copy, dest_env);
            match self.post(dest_env, RunnerEvent::Deliver(copy)) {
                Ok(()) => accepted.push(true),
                Err(e) => {
                    tracing::warn!(from = %source, to = %dest, msg = %msg.name(), error = %e, "Delivery failed");
                    accepted.push(false);
                }
            }
        }
        accepted
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outer senders
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a command straight to the extension `dest`.
    pub fn inject_cmd(&self, dest: &str, mut cmd: NativeMsg) -> BridgeResult<ResultReceiver> {
        if cmd.kind() != MsgKind::Cmd {
            return Err(BridgeError::InvalidArgument(format!("expected cmd, got {}", cmd.kind())));
        }
        cmd.check_sendable()?;
        let dest_env = self
            .env_of(dest)
            .ok_or_else(|| BridgeError::NoDestination(cmd.name().to_string()))?;

        let id = Uuid::new_v4().to_string();
        cmd.set_cmd_id(id.clone());
        cmd.set_source(OUTER_SOURCE);

        let (tx, rx) = oneshot::channel();
        self.paths.insert(
            id.clone(),
            Path {
                origin: Origin::Outer(tx),
                dest_env,
            },
        );
        if let Err(e) = self.post(dest_env, RunnerEvent::Deliver(cmd)) {
            self.paths.remove(&id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Send a data or frame message straight to the extension `dest`.
    pub fn inject_msg(&self, dest: &str, mut msg: NativeMsg) -> BridgeResult<()> {
        if matches!(msg.kind(), MsgKind::Cmd | MsgKind::CmdResult) {
            return Err(BridgeError::InvalidArgument(format!(
                "expected data or frame, got {}",
                msg.kind()
            )));
        }
        msg.check_sendable()?;
        let dest_env = self
            .env_of(dest)
            .ok_or_else(|| BridgeError::NoDestination(msg.name().to_string()))?;
        msg.set_source(OUTER_SOURCE);
        self.post(dest_env, RunnerEvent::Deliver(msg))
    }

    /// Answer the command `cmd_id` with an error result if it is still
    /// outstanding.
    pub(crate) fn reject_cmd(&self, cmd_id: &str, reason: &str) {
        if let Some((_, path)) = self.paths.remove(cmd_id) {
            let mut result = NativeMsg::error_result(cmd_id, reason);
            result.set_completed(true);
            self.route_result(path.origin, Ok(result));
        }
    }
}

impl NativeCore for LocalCore {
    fn send_cmd(&self, env: Handle, cmd: NativeMsg, callback: Handle, _streaming: bool) -> BridgeResult<()> {
        let source = self.name_of(env)?;
        let name = cmd.name().to_string();

        let mut ids = Vec::new();
        let accepted = self.fan_out(&source, &cmd, |copy, dest_env| {
            let id = Uuid::new_v4().to_string();
            copy.set_cmd_id(id.clone());
            self.paths.insert(
                id.clone(),
                Path {
                    origin: Origin::Extension { env, callback },
                    dest_env,
                },
            );
            ids.push(id);
        });

        for (id, ok) in ids.iter().zip(&accepted) {
            if !ok {
                self.paths.remove(id);
            }
        }

        if !accepted.contains(&true) {
            tracing::debug!(extension = %source, cmd = %name, "No destination for command");
            if !callback.is_none() {
                self.post(
                    env,
                    RunnerEvent::CmdResult {
                        callback,
                        outcome: Err(BridgeError::NoDestination(name)),
                    },
                )?;
            }
        }
        Ok(())
    }

    fn send_msg(&self, env: Handle, msg: NativeMsg, callback: Handle) -> BridgeResult<()> {
        if matches!(msg.kind(), MsgKind::Cmd | MsgKind::CmdResult) {
            return Err(BridgeError::InvalidArgument(format!(
                "send_msg cannot carry {}",
                msg.kind()
            )));
        }
        let source = self.name_of(env)?;
        let accepted = self.fan_out(&source, &msg, |_, _| {});

        if !callback.is_none() {
            let outcome = if accepted.contains(&true) {
                Ok(())
            } else {
                Err(BridgeError::NoDestination(msg.name().to_string()))
            };
            self.post(env, RunnerEvent::Outcome { callback, outcome })?;
        }
        Ok(())
    }

    fn return_result(
        &self,
        env: Handle,
        mut result: NativeMsg,
        target: Option<&NativeMsg>,
        ack: Handle,
    ) -> BridgeResult<()> {
        let id = target
            .and_then(|t| t.cmd_id())
            .or(result.cmd_id())
            .map(str::to_string)
            .ok_or_else(|| BridgeError::InvalidArgument("result has no command to answer".into()))?;
        result.set_cmd_id(id.clone());

        if result.is_final() {
            let (_, path) = self
                .paths
                .remove(&id)
                .ok_or_else(|| BridgeError::InvalidArgument(format!("command {id} is not outstanding")))?;
            result.set_completed(true);
            self.route_result(path.origin, Ok(result));
        } else {
            let origin = self
                .paths
                .get(&id)
                .map(|p| match p.origin {
                    Origin::Extension { env, callback } => Some((env, callback)),
                    Origin::Outer(_) => None,
                })
                .ok_or_else(|| BridgeError::InvalidArgument(format!("command {id} is not outstanding")))?;
            if let Some((origin_env, callback)) = origin {
                self.route_result(
                    Origin::Extension {
                        env: origin_env,
                        callback,
                    },
                    Ok(result),
                );
            }
        }

        if !ack.is_none() {
            self.post(env, RunnerEvent::Outcome { callback: ack, outcome: Ok(()) })?;
        }
        Ok(())
    }

    fn lifecycle_done(&self, env: Handle, signal: LifecycleSignal) -> BridgeResult<()> {
        self.post(env, RunnerEvent::Lifecycle(signal))
    }

    fn get_property(&self, env: Handle, path: &str) -> BridgeResult<Value> {
        let store = self.properties.get(&env).ok_or(BridgeError::EnvironmentExpired)?;
        store.get(path).cloned()
    }

    fn set_property(&self, env: Handle, path: &str, value: Value) -> BridgeResult<()> {
        let mut store = self.properties.get_mut(&env).ok_or(BridgeError::EnvironmentExpired)?;
        store.set(path, value)
    }

    fn init_property_from_json(&self, env: Handle, json: &str) -> BridgeResult<()> {
        let mut store = self.properties.get_mut(&env).ok_or(BridgeError::EnvironmentExpired)?;
        store.merge_json(json)
    }

    fn property_to_json(&self, env: Handle, path: &str) -> BridgeResult<String> {
        let store = self.properties.get(&env).ok_or(BridgeError::EnvironmentExpired)?;
        store.to_json(path)
    }

    fn log(&self, env: Handle, record: LogRecord) {
        let name = self.name_of(env).unwrap_or_else(|_| env.to_string());
        let LogRecord {
            level,
            message,
            file,
            line,
        } = record;
        match level {
            LogLevel::Debug => tracing::debug!(extension = %name, file, line, "{}", message),
            LogLevel::Info => tracing::info!(extension = %name, file, line, "{}", message),
            LogLevel::Warn => tracing::warn!(extension = %name, file, line, "{}", message),
            LogLevel::Error => tracing::error!(extension = %name, file, line, "{}", message),
        }
    }
}

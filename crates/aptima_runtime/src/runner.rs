//! Extension Runner
//!
//! Each hosted extension gets one tokio task that owns its event queue. The
//! runner drives the lifecycle (configure, init, start, then stop and deinit
//! on request), delivers routed messages once the extension has started and
//! hands asynchronous results back to the bridge. All calls into one
//! extension happen on its runner, one at a time.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use aptima_bridge::{
    Bridge, BridgeResult, ExtensionHandles, Handle, LifecycleSignal, LifecycleState, MsgKind,
    NativeMsg,
};
use tokio::sync::{mpsc, watch};

use crate::config::AppSettings;
use crate::local_core::LocalCore;

/// Work posted to a runner by the core or the app
#[derive(Debug)]
pub(crate) enum RunnerEvent {
    /// A routed command, data or frame message
    Deliver(NativeMsg),
    /// A result, or a routing error, for the pending call `callback`
    CmdResult {
        callback: Handle,
        outcome: BridgeResult<NativeMsg>,
    },
    /// Outcome of a one-way send or a result acknowledgement
    Outcome {
        callback: Handle,
        outcome: BridgeResult<()>,
    },
    /// The extension signalled a lifecycle phase done
    Lifecycle(LifecycleSignal),
    /// Begin shutdown
    Stop,
}

enum Wait {
    Done,
    Stop,
    TimedOut,
    Closed,
}

type Hook = fn(&Bridge, Handle) -> BridgeResult<()>;

pub(crate) struct Runner {
    name: String,
    handles: ExtensionHandles,
    bridge: Bridge,
    core: Arc<LocalCore>,
    rx: mpsc::Receiver<RunnerEvent>,
    state: watch::Sender<LifecycleState>,
    stop_timeout: Duration,
    deinit_timeout: Duration,
    /// Messages that arrived before start-done
    backlog: VecDeque<NativeMsg>,
    /// Set once this runner has observed start-done, not when the extension
    /// signals it.
    started: bool,
    shutting_down: bool,
}

impl Runner {
    pub(crate) fn new(
        name: &str,
        handles: ExtensionHandles,
        bridge: Bridge,
        core: Arc<LocalCore>,
        rx: mpsc::Receiver<RunnerEvent>,
        state: watch::Sender<LifecycleState>,
        settings: &AppSettings,
    ) -> Self {
        Self {
            name: name.to_string(),
            handles,
            bridge,
            core,
            rx,
            state,
            stop_timeout: Duration::from_millis(settings.stop_timeout_ms),
            deinit_timeout: Duration::from_millis(settings.deinit_timeout_ms),
            backlog: VecDeque::new(),
            started: false,
            shutting_down: false,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(extension = %self.name, "Runner started");

        if self.start_up().await {
            tracing::info!(extension = %self.name, "Extension started");
            self.started = true;
            while let Some(msg) = self.backlog.pop_front() {
                self.deliver(msg);
            }
            self.serve().await;
        }

        self.shut_down().await;
        tracing::info!(extension = %self.name, "Extension deinitialized");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phases
    // ─────────────────────────────────────────────────────────────────────────

    /// Configure, init and start in order, each only after the previous
    /// phase signalled done. Returns false when startup was abandoned.
    async fn start_up(&mut self) -> bool {
        let phases: [(&str, Hook, LifecycleSignal); 3] = [
            ("on_configure", Bridge::on_configure, LifecycleSignal::ConfigureDone),
            ("on_init", Bridge::on_init, LifecycleSignal::InitDone),
            ("on_start", Bridge::on_start, LifecycleSignal::StartDone),
        ];

        for (what, hook, signal) in phases {
            let ext = self.handles.extension;
            let bridge = self.bridge.clone();
            if !self.guarded(what, || hook(&bridge, ext)) {
                return false;
            }
            match self.await_signal(signal, None).await {
                Wait::Done => self.publish(),
                Wait::Stop => {
                    tracing::info!(extension = %self.name, phase = what, "Stop requested during startup");
                    return false;
                }
                Wait::TimedOut | Wait::Closed => return false,
            }
        }
        true
    }

    async fn serve(&mut self) {
        while let Some(event) = self.rx.recv().await {
            if matches!(event, RunnerEvent::Stop) {
                tracing::debug!(extension = %self.name, "Received stop");
                return;
            }
            self.handle(event);
        }
    }

    async fn shut_down(&mut self) {
        self.shutting_down = true;
        let stale: Vec<NativeMsg> = self.backlog.drain(..).collect();
        for msg in stale {
            self.refuse(&msg);
        }

        let ext = self.handles.extension;
        let env = self.handles.env;
        let bridge = self.bridge.clone();

        if self.guarded("on_stop", || bridge.on_stop(ext)) {
            if let Wait::TimedOut = self
                .await_signal(LifecycleSignal::StopDone, Some(self.stop_timeout))
                .await
            {
                tracing::warn!(extension = %self.name, "Stop timed out");
            }
        }
        self.publish();

        if self.guarded("on_deinit", || bridge.on_deinit(ext)) {
            if let Wait::TimedOut = self
                .await_signal(LifecycleSignal::DeinitDone, Some(self.deinit_timeout))
                .await
            {
                tracing::warn!(extension = %self.name, "Deinit timed out");
            }
        }
        self.publish();

        // Nothing new can be routed here after detach; settle what is queued.
        self.core.detach(env);
        self.rx.close();
        while let Ok(event) = self.rx.try_recv() {
            self.handle(event);
        }

        if let Err(e) = bridge.close_env(env) {
            tracing::warn!(extension = %self.name, error = %e, "Failed to close env");
        }
        if let Err(e) = bridge.destroy_extension(ext) {
            tracing::warn!(extension = %self.name, error = %e, "Failed to destroy extension");
        }
    }

    /// Process events until `expected` arrives.
    async fn await_signal(&mut self, expected: LifecycleSignal, timeout: Option<Duration>) -> Wait {
        let sleep = tokio::time::sleep(timeout.unwrap_or_default());
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        return Wait::Closed;
                    };
                    match event {
                        RunnerEvent::Lifecycle(signal) if signal == expected => return Wait::Done,
                        RunnerEvent::Stop if !self.shutting_down => return Wait::Stop,
                        other => self.handle(other),
                    }
                }
                _ = &mut sleep, if timeout.is_some() => return Wait::TimedOut,
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    fn handle(&mut self, event: RunnerEvent) {
        let env = self.handles.env;
        let bridge = self.bridge.clone();
        match event {
            RunnerEvent::Deliver(msg) => self.deliver(msg),
            RunnerEvent::CmdResult { callback, outcome } => {
                self.guarded("result handler", || bridge.on_cmd_result(env, callback, outcome));
            }
            RunnerEvent::Outcome { callback, outcome } => {
                self.guarded("outcome handler", || bridge.on_outcome(env, callback, outcome));
            }
            RunnerEvent::Lifecycle(signal) => {
                tracing::debug!(extension = %self.name, signal = %signal, "Lifecycle signal observed");
            }
            RunnerEvent::Stop => {
                tracing::debug!(extension = %self.name, "Stop already in progress");
            }
        }
    }

    fn deliver(&mut self, msg: NativeMsg) {
        if self.shutting_down {
            self.refuse(&msg);
            return;
        }
        if !self.started {
            self.backlog.push_back(msg);
            return;
        }
        match self.current_state() {
            LifecycleState::Started => {
                let cmd_id = match msg.kind() {
                    MsgKind::Cmd => msg.cmd_id().map(str::to_string),
                    _ => None,
                };
                let ext = self.handles.extension;
                let bridge = self.bridge.clone();
                if !self.guarded("message handler", || bridge.dispatch(ext, msg)) {
                    if let Some(id) = cmd_id {
                        self.core.reject_cmd(&id, "command handler failed");
                    }
                }
            }
            _ => self.refuse(&msg),
        }
    }

    fn refuse(&self, msg: &NativeMsg) {
        tracing::debug!(extension = %self.name, msg = %msg.name(), kind = %msg.kind(), "Refusing message while stopping");
        if let (MsgKind::Cmd, Some(id)) = (msg.kind(), msg.cmd_id()) {
            self.core.reject_cmd(id, &format!("{} is stopping", self.name));
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a call into the extension, containing errors and panics.
    fn guarded(&self, what: &str, f: impl FnOnce() -> BridgeResult<()>) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(extension = %self.name, error = %e, "{} failed", what);
                false
            }
            Err(_) => {
                tracing::error!(extension = %self.name, "{} panicked", what);
                false
            }
        }
    }

    fn current_state(&self) -> LifecycleState {
        self.bridge
            .lifecycle_state(self.handles.extension)
            .unwrap_or(LifecycleState::Deinitialized)
    }

    fn publish(&self) {
        let state = self.current_state();
        tracing::debug!(extension = %self.name, state = %state, "Lifecycle state");
        self.state.send_replace(state);
    }
}

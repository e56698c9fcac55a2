//! Environment Handle
//!
//! The capability surface handed to an extension: sending messages, returning
//! results, property access, logging and lifecycle done signals. An `Env`
//! expires when its extension finishes shutdown; from then on every operation
//! fails synchronously with `EnvironmentExpired` and no handler is invoked.

use std::panic::Location;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::oneshot;

use crate::correlation::{Handler, OutcomeHandler, PendingCall, ResultHandler};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, HandleTable};
use crate::lifecycle::{LifecycleSignal, LifecycleState, LifecycleTracker};
use crate::msg::{AudioFrame, Cmd, CmdResult, Data, Message, NativeMsg, VideoFrame};
use crate::native::{LogLevel, LogRecord, NativeCore};
use crate::value::{FromValue, Value, ValueType};

pub(crate) struct EnvInner {
    handle: Handle,
    name: String,
    table: Arc<HandleTable>,
    /// `None` once expired. Holding the read lock keeps the env alive for the
    /// duration of a native call.
    core: RwLock<Option<Arc<dyn NativeCore>>>,
    pending: DashMap<Handle, Arc<PendingCall>>,
    lifecycle: LifecycleTracker,
}

/// Capability surface of one extension instance
#[derive(Clone)]
pub struct Env {
    inner: Arc<EnvInner>,
}

impl Env {
    /// Create an environment and register it in `table`.
    pub(crate) fn create(
        table: &Arc<HandleTable>,
        name: &str,
        core: Arc<dyn NativeCore>,
    ) -> Self {
        let inner = table.register_with(|handle| {
            Arc::new(EnvInner {
                handle,
                name: name.to_string(),
                table: table.clone(),
                core: RwLock::new(Some(core)),
                pending: DashMap::new(),
                lifecycle: LifecycleTracker::new(),
            })
        });
        Self { inner }
    }

    pub(crate) fn resolve(table: &HandleTable, handle: Handle) -> BridgeResult<Self> {
        let inner = table.resolve::<EnvInner>(handle)?;
        Ok(Self { inner })
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    /// Instance name of the owning extension
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_expired(&self) -> bool {
        self.inner.core.read().is_none()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    pub(crate) fn lifecycle(&self) -> &LifecycleTracker {
        &self.inner.lifecycle
    }

    pub(crate) fn table(&self) -> &Arc<HandleTable> {
        &self.inner.table
    }

    /// Number of calls still waiting for a terminal outcome
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Run `f` against the core while the env is alive.
    fn with_core<T>(&self, f: impl FnOnce(&dyn NativeCore) -> BridgeResult<T>) -> BridgeResult<T> {
        let guard = self.inner.core.read();
        let core = guard.as_deref().ok_or(BridgeError::EnvironmentExpired)?;
        f(core)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pending calls
    // ─────────────────────────────────────────────────────────────────────────

    fn register_pending(&self, handler: Option<Handler>, streaming: bool) -> Handle {
        let Some(handler) = handler else {
            return Handle::NONE;
        };
        let call = self
            .inner
            .table
            .register_with(|h| Arc::new(PendingCall::new(h, handler, streaming)));
        let handle = call.handle();
        self.inner.pending.insert(handle, call);
        handle
    }

    fn discard_pending(&self, callback: Handle) {
        if callback.is_none() {
            return;
        }
        self.inner.pending.remove(&callback);
        let _ = self.inner.table.release(callback);
    }

    fn pending(&self, callback: Handle) -> Option<Arc<PendingCall>> {
        let call = self.inner.pending.get(&callback).map(|e| e.value().clone());
        if call.is_none() {
            tracing::debug!(env = %self.inner.name, callback = %callback, "Completion for unknown call ignored");
        }
        call
    }

    /// Deliver a command result (or routing error) to its pending call.
    pub(crate) fn complete_cmd(&self, callback: Handle, outcome: BridgeResult<NativeMsg>) {
        let Some(call) = self.pending(callback) else {
            return;
        };
        let (is_final, outcome) = match outcome {
            Ok(msg) => (msg.is_final(), Ok(CmdResult::bind(self.table(), msg))),
            Err(err) => (true, Err(err)),
        };
        let _settle = Settle { env: self, call: &call };
        call.deliver_result(self, outcome, is_final);
    }

    /// Deliver the outcome of a one-way send or result acknowledgement.
    pub(crate) fn complete_outcome(&self, callback: Handle, outcome: BridgeResult<()>) {
        let Some(call) = self.pending(callback) else {
            return;
        };
        let _settle = Settle { env: self, call: &call };
        call.deliver_outcome(self, outcome);
    }

    /// Expire the env. Outstanding calls fail with `EnvironmentExpired`.
    pub(crate) fn close(&self) {
        let core = self.inner.core.write().take();
        if core.is_none() {
            return;
        }

        let calls: Vec<Arc<PendingCall>> = self
            .inner
            .pending
            .iter()
            .map(|e| e.value().clone())
            .collect();
        self.inner.pending.clear();

        for call in calls {
            let _ = self.inner.table.release(call.handle());
            if call.fail(self, BridgeError::EnvironmentExpired) {
                tracing::debug!(env = %self.inner.name, callback = %call.handle(), "Pending call expired");
            }
        }
        tracing::debug!(env = %self.inner.name, "Environment closed");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    fn send_cmd_inner(
        &self,
        cmd: Cmd,
        handler: Option<ResultHandler>,
        streaming: bool,
    ) -> BridgeResult<()> {
        self.with_core(|core| {
            let msg = cmd.take_for_send()?;
            let callback = self.register_pending(handler.map(Handler::Result), streaming);
            core.send_cmd(self.handle(), msg, callback, streaming)
                .inspect_err(|_| self.discard_pending(callback))
        })
    }

    /// Send a command; `handler` receives the final result or an error, once.
    pub fn send_cmd<F>(&self, cmd: Cmd, handler: F) -> BridgeResult<()>
    where
        F: FnOnce(&Env, BridgeResult<CmdResult>) + Send + 'static,
    {
        let mut once = Some(handler);
        let wrapped: ResultHandler = Box::new(move |env: &Env, result: BridgeResult<CmdResult>| {
            if let Some(handler) = once.take() {
                handler(env, result);
            }
        });
        self.send_cmd_inner(cmd, Some(wrapped), false)
    }

    /// Send a command and receive every streamed result; the final one
    /// completes the call.
    pub fn send_cmd_ex<F>(&self, cmd: Cmd, handler: F) -> BridgeResult<()>
    where
        F: FnMut(&Env, BridgeResult<CmdResult>) + Send + 'static,
    {
        self.send_cmd_inner(cmd, Some(Box::new(handler)), true)
    }

    /// Send a command without a response handler.
    pub fn post_cmd(&self, cmd: Cmd) -> BridgeResult<()> {
        self.send_cmd_inner(cmd, None, false)
    }

    /// Send a command and await its final result.
    pub async fn call(&self, cmd: Cmd) -> BridgeResult<CmdResult> {
        let (tx, rx) = oneshot::channel();
        self.send_cmd(cmd, move |_env, result| {
            let _ = tx.send(result);
        })?;
        rx.await.map_err(|_| BridgeError::EnvironmentExpired)?
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Results
    // ─────────────────────────────────────────────────────────────────────────

    fn return_inner(
        &self,
        result: CmdResult,
        target: Option<&Cmd>,
        ack: Option<OutcomeHandler>,
    ) -> BridgeResult<()> {
        self.with_core(|core| {
            let target = target.map(|cmd| cmd.bound().pin()).transpose()?;
            if let Some(pin) = &target {
                let routed = pin.with(|m| m.cmd_id().is_some())?;
                if !routed {
                    return Err(BridgeError::InvalidArgument(
                        "target command has not been routed".into(),
                    ));
                }
            }

            let msg = result.bound().take_if(|m| {
                m.check_sendable()?;
                if target.is_none() && m.cmd_id().is_none() {
                    return Err(BridgeError::InvalidArgument(
                        "result is not tied to a command".into(),
                    ));
                }
                Ok(())
            })?;

            let ack = self.register_pending(ack.map(Handler::Outcome), false);
            let returned = match &target {
                Some(pin) => pin
                    .with(|target| core.return_result(self.handle(), msg, Some(target), ack))
                    .and_then(|r| r),
                None => core.return_result(self.handle(), msg, None, ack),
            };
            returned.inspect_err(|_| self.discard_pending(ack))
        })
    }

    /// Return `result` for `cmd`.
    ///
    /// `result` is consumed whether or not the core accepts it; build a new
    /// one to retry.
    pub fn return_result(&self, result: CmdResult, cmd: &Cmd) -> BridgeResult<()> {
        self.return_inner(result, Some(cmd), None)
    }

    /// Return `result` for `cmd`; `ack` learns whether the core accepted it.
    pub fn return_result_with_ack<F>(&self, result: CmdResult, cmd: &Cmd, ack: F) -> BridgeResult<()>
    where
        F: FnOnce(&Env, BridgeResult<()>) + Send + 'static,
    {
        self.return_inner(result, Some(cmd), Some(Box::new(ack)))
    }

    /// Return a result built with [`CmdResult::for_cmd`].
    pub fn return_result_directly(&self, result: CmdResult) -> BridgeResult<()> {
        self.return_inner(result, None, None)
    }

    pub fn return_result_directly_with_ack<F>(&self, result: CmdResult, ack: F) -> BridgeResult<()>
    where
        F: FnOnce(&Env, BridgeResult<()>) + Send + 'static,
    {
        self.return_inner(result, None, Some(Box::new(ack)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Data and frames
    // ─────────────────────────────────────────────────────────────────────────

    fn send_msg_inner(
        &self,
        msg: &impl MessageSend,
        handler: Option<OutcomeHandler>,
    ) -> BridgeResult<()> {
        self.with_core(|core| {
            let native = msg.take_native()?;
            let callback = self.register_pending(handler.map(Handler::Outcome), false);
            core.send_msg(self.handle(), native, callback)
                .inspect_err(|_| self.discard_pending(callback))
        })
    }

    /// Send data; `handler` learns whether it reached a destination.
    pub fn send_data<F>(&self, data: Data, handler: F) -> BridgeResult<()>
    where
        F: FnOnce(&Env, BridgeResult<()>) + Send + 'static,
    {
        self.send_msg_inner(&data, Some(Box::new(handler)))
    }

    pub fn post_data(&self, data: Data) -> BridgeResult<()> {
        self.send_msg_inner(&data, None)
    }

    pub fn send_video_frame<F>(&self, frame: VideoFrame, handler: F) -> BridgeResult<()>
    where
        F: FnOnce(&Env, BridgeResult<()>) + Send + 'static,
    {
        self.send_msg_inner(&frame, Some(Box::new(handler)))
    }

    pub fn post_video_frame(&self, frame: VideoFrame) -> BridgeResult<()> {
        self.send_msg_inner(&frame, None)
    }

    pub fn send_audio_frame<F>(&self, frame: AudioFrame, handler: F) -> BridgeResult<()>
    where
        F: FnOnce(&Env, BridgeResult<()>) + Send + 'static,
    {
        self.send_msg_inner(&frame, Some(Box::new(handler)))
    }

    pub fn post_audio_frame(&self, frame: AudioFrame) -> BridgeResult<()> {
        self.send_msg_inner(&frame, None)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Properties
    // ─────────────────────────────────────────────────────────────────────────

    /// Typed read of the extension's own property.
    pub fn get_property<T: FromValue>(&self, path: &str) -> BridgeResult<T> {
        let value = self.with_core(|core| core.get_property(self.handle(), path))?;
        T::from_value(&value).ok_or_else(|| BridgeError::TypePropertyMismatch {
            path: path.to_string(),
            expected: T::EXPECTED.to_string(),
            found: value.value_type().to_string(),
        })
    }

    pub fn get_property_bool(&self, path: &str) -> BridgeResult<bool> {
        self.get_property(path)
    }

    pub fn get_property_int32(&self, path: &str) -> BridgeResult<i32> {
        self.get_property(path)
    }

    pub fn get_property_int64(&self, path: &str) -> BridgeResult<i64> {
        self.get_property(path)
    }

    pub fn get_property_float64(&self, path: &str) -> BridgeResult<f64> {
        self.get_property(path)
    }

    pub fn get_property_string(&self, path: &str) -> BridgeResult<String> {
        self.get_property(path)
    }

    pub fn property_type(&self, path: &str) -> BridgeResult<ValueType> {
        self.with_core(|core| core.get_property(self.handle(), path))
            .map(|v| v.value_type())
    }

    pub fn set_property(&self, path: &str, value: impl Into<Value>) -> BridgeResult<()> {
        let value = value.into();
        self.with_core(|core| core.set_property(self.handle(), path, value))
    }

    pub fn get_property_to_json(&self, path: &str) -> BridgeResult<String> {
        self.with_core(|core| core.property_to_json(self.handle(), path))
    }

    pub fn set_property_from_json(&self, path: &str, json: &str) -> BridgeResult<()> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        self.set_property(path, Value::from_json(&parsed))
    }

    pub fn init_property_from_json(&self, json: &str) -> BridgeResult<()> {
        self.with_core(|core| core.init_property_from_json(self.handle(), json))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Forward a log line to the core, tagged with the caller's location.
    #[track_caller]
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> BridgeResult<()> {
        let location = Location::caller();
        let record = LogRecord {
            level,
            message: message.into(),
            file: location.file(),
            line: location.line(),
        };
        self.with_core(|core| {
            core.log(self.handle(), record);
            Ok(())
        })
    }

    #[track_caller]
    fn log_or_trace(&self, level: LogLevel, message: &str) {
        if self.log(level, message).is_err() {
            tracing::debug!(env = %self.inner.name, log_level = %level, "Log after expiry: {}", message);
        }
    }

    #[track_caller]
    pub fn log_debug(&self, message: &str) {
        self.log_or_trace(LogLevel::Debug, message);
    }

    #[track_caller]
    pub fn log_info(&self, message: &str) {
        self.log_or_trace(LogLevel::Info, message);
    }

    #[track_caller]
    pub fn log_warn(&self, message: &str) {
        self.log_or_trace(LogLevel::Warn, message);
    }

    #[track_caller]
    pub fn log_error(&self, message: &str) {
        self.log_or_trace(LogLevel::Error, message);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    fn signal(&self, signal: LifecycleSignal) -> BridgeResult<()> {
        self.with_core(|core| {
            self.inner.lifecycle.complete(signal)?;
            tracing::debug!(env = %self.inner.name, signal = %signal, "Lifecycle phase done");
            core.lifecycle_done(self.handle(), signal)
        })
    }

    pub fn on_configure_done(&self) -> BridgeResult<()> {
        self.signal(LifecycleSignal::ConfigureDone)
    }

    pub fn on_init_done(&self) -> BridgeResult<()> {
        self.signal(LifecycleSignal::InitDone)
    }

    pub fn on_start_done(&self) -> BridgeResult<()> {
        self.signal(LifecycleSignal::StartDone)
    }

    pub fn on_stop_done(&self) -> BridgeResult<()> {
        self.signal(LifecycleSignal::StopDone)
    }

    pub fn on_deinit_done(&self) -> BridgeResult<()> {
        self.signal(LifecycleSignal::DeinitDone)
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("handle", &self.inner.handle)
            .field("name", &self.inner.name)
            .field("state", &self.lifecycle_state())
            .field("expired", &self.is_expired())
            .finish()
    }
}

/// Drops the bookkeeping of a call once it completed, even when its handler
/// unwinds.
struct Settle<'a> {
    env: &'a Env,
    call: &'a PendingCall,
}

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        if self.call.is_completed() {
            self.env.discard_pending(self.call.handle());
        }
    }
}

/// One-way messages accepted by [`Env::send_msg_inner`].
trait MessageSend {
    fn take_native(&self) -> BridgeResult<NativeMsg>;
}

macro_rules! impl_message_send {
    ($($t:ty),*) => {
        $(
            impl MessageSend for $t {
                fn take_native(&self) -> BridgeResult<NativeMsg> {
                    self.take_for_send()
                }
            }
        )*
    };
}

impl_message_send!(Data, VideoFrame, AudioFrame);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::StatusCode;
    use crate::testing::{CoreCall, test_env};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_send_cmd_registers_callback() {
        let (env, core) = test_env("a");
        let cmd = Cmd::new("hello").unwrap();
        env.send_cmd(cmd, |_, _| {}).unwrap();

        let calls = core.calls();
        let CoreCall::SendCmd { name, callback, streaming } = &calls[0] else {
            panic!("unexpected call {:?}", calls[0]);
        };
        assert_eq!(name, "hello");
        assert!(!callback.is_none());
        assert!(!streaming);
        assert_eq!(env.pending_calls(), 1);
    }

    #[test]
    fn test_post_cmd_uses_no_callback() {
        let (env, core) = test_env("a");
        env.post_cmd(Cmd::new("fire").unwrap()).unwrap();
        assert!(matches!(
            core.calls()[0],
            CoreCall::SendCmd { callback: Handle::NONE, .. }
        ));
        assert_eq!(env.pending_calls(), 0);
    }

    #[test]
    fn test_no_destination_reaches_handler_once() {
        let (env, core) = test_env("a");
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        env.send_cmd(Cmd::new("x").unwrap(), move |_, result| {
            assert!(matches!(result, Err(BridgeError::NoDestination(_))));
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let callback = core.last_callback();
        env.complete_cmd(callback, Err(BridgeError::NoDestination("x".into())));
        env.complete_cmd(callback, Err(BridgeError::NoDestination("x".into())));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(env.pending_calls(), 0);
        assert!(!env.table().contains(callback));
    }

    #[test]
    fn test_panicking_handler_still_settles_call() {
        let (env, core) = test_env("a");
        let before = env.table().len();
        env.send_cmd(Cmd::new("nowhere").unwrap(), |_, _| panic!("handler fault"))
            .unwrap();
        env.post_data(Data::new("d").unwrap()).unwrap();
        env.send_data(Data::new("d").unwrap(), |_, _| panic!("outcome fault"))
            .unwrap();
        assert_eq!(env.pending_calls(), 2);

        let callbacks: Vec<Handle> = core
            .calls()
            .iter()
            .filter_map(|c| match c {
                CoreCall::SendCmd { callback, .. } | CoreCall::SendMsg { callback, .. } => {
                    Some(*callback)
                }
                _ => None,
            })
            .filter(|h| !h.is_none())
            .collect();

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            env.complete_cmd(callbacks[0], Err(BridgeError::NoDestination("nowhere".into())));
        }));
        assert!(unwound.is_err());
        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            env.complete_outcome(callbacks[1], Ok(()));
        }));
        assert!(unwound.is_err());

        assert_eq!(env.pending_calls(), 0);
        assert_eq!(env.table().len(), before);
        assert!(!env.table().contains(callbacks[0]));
    }

    #[test]
    fn test_expired_env_fails_synchronously() {
        let (env, core) = test_env("a");
        let before = env.table().len();
        env.close();

        let called = Arc::new(AtomicUsize::new(0));
        let seen = called.clone();
        let err = env
            .send_cmd(Cmd::new("x").unwrap(), move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap_err();
        assert_eq!(err, BridgeError::EnvironmentExpired);
        assert_eq!(
            env.send_data(Data::new("d").unwrap(), |_, _| {}).unwrap_err(),
            BridgeError::EnvironmentExpired
        );
        assert_eq!(env.on_configure_done().unwrap_err(), BridgeError::EnvironmentExpired);
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert_eq!(env.table().len(), before);
        assert!(core.calls().is_empty());
    }

    #[test]
    fn test_failed_native_call_releases_callback() {
        let (env, core) = test_env("a");
        let before = env.table().len();
        core.fail_next();

        let err = env.send_cmd(Cmd::new("x").unwrap(), |_, _| {}).unwrap_err();
        assert!(matches!(err, BridgeError::NativeCallFailure { .. }));
        assert_eq!(env.table().len(), before);
        assert_eq!(env.pending_calls(), 0);
    }

    #[test]
    fn test_close_fails_pending_calls() {
        let (env, _core) = test_env("a");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let slot = seen.clone();
        env.send_cmd(Cmd::new("x").unwrap(), move |_, result| {
            slot.lock().push(result.map(|_| ()));
        })
        .unwrap();

        env.close();
        assert_eq!(*seen.lock(), vec![Err(BridgeError::EnvironmentExpired)]);
        assert_eq!(env.pending_calls(), 0);
        assert!(env.is_expired());
    }

    #[test]
    fn test_streaming_results() {
        let (env, core) = test_env("a");
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        env.send_cmd_ex(Cmd::new("stream").unwrap(), move |_, result| {
            assert!(result.is_ok());
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let callback = core.last_callback();
        let mut partial = NativeMsg::cmd_result(StatusCode::Ok);
        partial.set_final(false);
        env.complete_cmd(callback, Ok(partial.clone()));
        env.complete_cmd(callback, Ok(partial));
        env.complete_cmd(callback, Ok(NativeMsg::cmd_result(StatusCode::Ok)));

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(env.pending_calls(), 0);
    }

    #[test]
    fn test_send_consumes_message() {
        let (env, _core) = test_env("a");
        let data = Data::new("d").unwrap();
        let view = data.lock_buf().unwrap();

        // Locked buffers cannot be sent; the message stays usable.
        assert!(matches!(
            env.send_msg_inner(&data, None),
            Err(BridgeError::BufferState(_))
        ));
        data.unlock_buf(view).unwrap();
        env.post_data(data).unwrap();
    }

    #[test]
    fn test_return_result_requires_routed_command() {
        let (env, _core) = test_env("a");
        let local = Cmd::new("x").unwrap();
        let err = env
            .return_result(CmdResult::new(StatusCode::Ok), &local)
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));

        let err = env
            .return_result_directly(CmdResult::new(StatusCode::Ok))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[test]
    fn test_return_result_for_routed_command() {
        let (env, core) = test_env("a");
        let mut msg = NativeMsg::cmd("x");
        msg.set_cmd_id("id-7");
        let cmd = Cmd::bind(env.table(), msg);

        env.return_result(CmdResult::new(StatusCode::Ok), &cmd).unwrap();
        assert!(matches!(
            &core.calls()[0],
            CoreCall::ReturnResult { cmd_id: Some(id), .. } if id == "id-7"
        ));
    }

    #[test]
    fn test_lifecycle_signals_in_order() {
        let (env, core) = test_env("a");
        assert!(matches!(
            env.on_start_done(),
            Err(BridgeError::InvalidLifecycleTransition { .. })
        ));
        env.on_configure_done().unwrap();
        env.on_init_done().unwrap();
        env.on_start_done().unwrap();
        assert_eq!(env.lifecycle_state(), LifecycleState::Started);
        assert_eq!(core.calls().len(), 3);
    }

    #[test]
    fn test_properties_through_core() {
        let (env, _core) = test_env("a");
        env.init_property_from_json(r#"{"greeting":"hi","n":3}"#).unwrap();

        assert_eq!(env.get_property_string("greeting").unwrap(), "hi");
        assert_eq!(env.get_property_int32("n").unwrap(), 3);
        assert!(matches!(
            env.get_property_bool("n"),
            Err(BridgeError::TypePropertyMismatch { .. })
        ));
        env.set_property_from_json("nested", r#"{"a":1}"#).unwrap();
        assert_eq!(env.get_property_to_json("nested").unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn test_log_captures_call_site() {
        let (env, core) = test_env("a");
        env.log_info("hello");

        let CoreCall::Log(record) = &core.calls()[0] else {
            panic!("expected a log record");
        };
        assert_eq!(record.level, LogLevel::Info);
        assert!(record.file.ends_with("env.rs"));
    }

    #[tokio::test]
    async fn test_call_awaits_result() {
        let (env, core) = test_env("a");
        let caller = env.clone();
        let pending = tokio::spawn(async move { caller.call(Cmd::new("q").unwrap()).await });

        while core.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        env.complete_cmd(
            core.last_callback(),
            Ok(NativeMsg::cmd_result(StatusCode::Error)),
        );

        let result = pending.await.unwrap().unwrap();
        assert_eq!(result.status().unwrap(), StatusCode::Error);
    }

    #[test]
    fn test_call_stays_pending_until_completed() {
        let (env, core) = test_env("a");
        let mut call = tokio_test::task::spawn(env.call(Cmd::new("q").unwrap()));
        tokio_test::assert_pending!(call.poll());

        env.complete_cmd(core.last_callback(), Ok(NativeMsg::cmd_result(StatusCode::Ok)));
        assert!(call.is_woken());
        let result = tokio_test::assert_ready_ok!(call.poll());
        assert_eq!(result.status().unwrap(), StatusCode::Ok);
    }

    #[test]
    fn test_call_fails_when_env_closes() {
        let (env, _core) = test_env("a");
        let mut call = tokio_test::task::spawn(env.call(Cmd::new("q").unwrap()));
        tokio_test::assert_pending!(call.poll());

        env.close();
        let err = tokio_test::assert_ready_err!(call.poll());
        assert_eq!(err, BridgeError::EnvironmentExpired);
    }
}

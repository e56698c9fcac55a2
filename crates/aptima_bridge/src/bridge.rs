//! Bridge
//!
//! Inbound entry points for the native core. The core refers to extensions,
//! environments, pending calls and messages only by [`Handle`]; the bridge
//! resolves them through its handle table and dispatches to managed code.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::addon::AddonRegistry;
use crate::binding::Bound;
use crate::env::Env;
use crate::error::{BridgeError, BridgeResult};
use crate::extension::Extension;
use crate::handle::{Handle, HandleTable};
use crate::lifecycle::{LifecycleSignal, LifecycleState};
use crate::msg::{AudioFrame, Cmd, Data, LockedBuf, MsgKind, NativeMsg, VideoFrame, resolve_msg};
use crate::native::NativeCore;
use crate::value::{Value, ValueType};

// ─────────────────────────────────────────────────────────────────────────────
// Extension Cell
// ─────────────────────────────────────────────────────────────────────────────

struct ExtensionCell {
    name: String,
    addon: String,
    env: Env,
    extension: Mutex<Box<dyn Extension>>,
    deinit_called: AtomicBool,
}

impl ExtensionCell {
    /// Run a hook with exclusive access to the extension.
    fn with<T>(&self, f: impl FnOnce(&mut dyn Extension, &Env) -> T) -> T {
        let mut extension = self.extension.lock();
        f(&mut **extension, &self.env)
    }

    fn require(&self, expected: LifecycleState, missing: LifecycleSignal) -> BridgeResult<()> {
        let state = self.env.lifecycle_state();
        if state != expected {
            return Err(BridgeError::InvalidLifecycleTransition {
                from: state,
                signal: missing,
            });
        }
        Ok(())
    }

    fn require_started(&self) -> BridgeResult<()> {
        let state = self.env.lifecycle_state();
        if !state.is_started() {
            return Err(BridgeError::NotStarted(state));
        }
        Ok(())
    }
}

/// Handles issued for a newly created extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionHandles {
    pub extension: Handle,
    pub env: Handle,
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point used by the native core
#[derive(Clone)]
pub struct Bridge {
    table: Arc<HandleTable>,
    addons: Arc<AddonRegistry>,
}

impl Bridge {
    pub fn new(addons: Arc<AddonRegistry>) -> Self {
        Self::with_table(HandleTable::new_shared(), addons)
    }

    pub fn with_table(table: Arc<HandleTable>, addons: Arc<AddonRegistry>) -> Self {
        Self { table, addons }
    }

    pub fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }

    pub fn addons(&self) -> &Arc<AddonRegistry> {
        &self.addons
    }

    /// Instantiate `addon` as `instance` and bind it to `core`.
    pub fn create_extension(
        &self,
        addon: &str,
        instance: &str,
        core: Arc<dyn NativeCore>,
    ) -> BridgeResult<ExtensionHandles> {
        let extension = self.addons.create(addon, instance)?;
        let env = Env::create(&self.table, instance, core);
        let env_handle = env.handle();

        let cell = Arc::new(ExtensionCell {
            name: instance.to_string(),
            addon: addon.to_string(),
            env,
            extension: Mutex::new(extension),
            deinit_called: AtomicBool::new(false),
        });
        let handle = self.table.register(cell);

        tracing::info!(extension = %instance, addon = %addon, handle = %handle, "Extension created");
        Ok(ExtensionHandles {
            extension: handle,
            env: env_handle,
        })
    }

    fn cell(&self, extension: Handle) -> BridgeResult<Arc<ExtensionCell>> {
        self.table.resolve::<ExtensionCell>(extension)
    }

    /// Resolve an environment handle.
    pub fn env(&self, env: Handle) -> BridgeResult<Env> {
        Env::resolve(&self.table, env)
    }

    /// Environment owned by an extension
    pub fn extension_env(&self, extension: Handle) -> BridgeResult<Env> {
        Ok(self.cell(extension)?.env.clone())
    }

    pub fn lifecycle_state(&self, extension: Handle) -> BridgeResult<LifecycleState> {
        Ok(self.cell(extension)?.env.lifecycle_state())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle hooks
    // ─────────────────────────────────────────────────────────────────────────

    pub fn on_configure(&self, extension: Handle) -> BridgeResult<()> {
        let cell = self.cell(extension)?;
        cell.require(LifecycleState::Unconfigured, LifecycleSignal::ConfigureDone)?;
        cell.with(|ext, env| ext.on_configure(env));
        Ok(())
    }

    pub fn on_init(&self, extension: Handle) -> BridgeResult<()> {
        let cell = self.cell(extension)?;
        cell.require(LifecycleState::Configured, LifecycleSignal::ConfigureDone)?;
        cell.with(|ext, env| ext.on_init(env));
        Ok(())
    }

    /// Start the extension. Requires init-done to have been observed.
    pub fn on_start(&self, extension: Handle) -> BridgeResult<()> {
        let cell = self.cell(extension)?;
        cell.require(LifecycleState::Initialized, LifecycleSignal::InitDone)?;
        cell.with(|ext, env| ext.on_start(env));
        Ok(())
    }

    /// Begin stopping. A second request is a no-op.
    pub fn on_stop(&self, extension: Handle) -> BridgeResult<()> {
        let cell = self.cell(extension)?;
        if !cell.env.lifecycle().begin_stop() {
            tracing::debug!(extension = %cell.name, "Stop already in progress");
            return Ok(());
        }
        cell.with(|ext, env| ext.on_stop(env));
        Ok(())
    }

    /// Deinitialize. Runs the hook exactly once, even if stop-done never came.
    pub fn on_deinit(&self, extension: Handle) -> BridgeResult<()> {
        let cell = self.cell(extension)?;
        if cell.deinit_called.swap(true, Ordering::SeqCst) {
            tracing::debug!(extension = %cell.name, "Deinit already invoked");
            return Ok(());
        }

        let lifecycle = cell.env.lifecycle();
        lifecycle.begin_stop();
        if lifecycle.force_stopped() {
            tracing::warn!(extension = %cell.name, "Stop did not complete before deinit");
        }
        cell.with(|ext, env| ext.on_deinit(env));
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Message delivery
    // ─────────────────────────────────────────────────────────────────────────

    fn deliver(
        &self,
        extension: Handle,
        msg: NativeMsg,
        expected: MsgKind,
        dispatch: impl FnOnce(&mut dyn Extension, &Env, &Arc<HandleTable>, NativeMsg),
    ) -> BridgeResult<()> {
        if msg.kind() != expected {
            return Err(BridgeError::InvalidArgument(format!(
                "expected {expected}, got {}",
                msg.kind()
            )));
        }
        let cell = self.cell(extension)?;
        cell.require_started()?;
        cell.with(|ext, env| dispatch(ext, env, &self.table, msg));
        Ok(())
    }

    pub fn on_cmd(&self, extension: Handle, msg: NativeMsg) -> BridgeResult<()> {
        self.deliver(extension, msg, MsgKind::Cmd, |ext, env, table, msg| {
            ext.on_cmd(env, Cmd::bind(table, msg))
        })
    }

    pub fn on_data(&self, extension: Handle, msg: NativeMsg) -> BridgeResult<()> {
        self.deliver(extension, msg, MsgKind::Data, |ext, env, table, msg| {
            ext.on_data(env, Data::bind(table, msg))
        })
    }

    pub fn on_video_frame(&self, extension: Handle, msg: NativeMsg) -> BridgeResult<()> {
        self.deliver(extension, msg, MsgKind::VideoFrame, |ext, env, table, msg| {
            ext.on_video_frame(env, VideoFrame::bind(table, msg))
        })
    }

    pub fn on_audio_frame(&self, extension: Handle, msg: NativeMsg) -> BridgeResult<()> {
        self.deliver(extension, msg, MsgKind::AudioFrame, |ext, env, table, msg| {
            ext.on_audio_frame(env, AudioFrame::bind(table, msg))
        })
    }

    /// Route a message to the handler matching its kind.
    pub fn dispatch(&self, extension: Handle, msg: NativeMsg) -> BridgeResult<()> {
        match msg.kind() {
            MsgKind::Cmd => self.on_cmd(extension, msg),
            MsgKind::Data => self.on_data(extension, msg),
            MsgKind::VideoFrame => self.on_video_frame(extension, msg),
            MsgKind::AudioFrame => self.on_audio_frame(extension, msg),
            MsgKind::CmdResult => Err(BridgeError::InvalidArgument(
                "results are delivered through on_cmd_result".into(),
            )),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Async completions
    // ─────────────────────────────────────────────────────────────────────────

    /// Deliver a command result, or a routing error, to a pending call.
    pub fn on_cmd_result(
        &self,
        env: Handle,
        callback: Handle,
        outcome: BridgeResult<NativeMsg>,
    ) -> BridgeResult<()> {
        self.env(env)?.complete_cmd(callback, outcome);
        Ok(())
    }

    /// Deliver the outcome of a one-way send or result acknowledgement.
    pub fn on_outcome(&self, env: Handle, callback: Handle, outcome: BridgeResult<()>) -> BridgeResult<()> {
        self.env(env)?.complete_outcome(callback, outcome);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// Expire an environment and release its handle.
    pub fn close_env(&self, env: Handle) -> BridgeResult<()> {
        self.env(env)?.close();
        self.table.release(env)
    }

    /// Release an extension. The instance is dropped once no hook is running.
    pub fn destroy_extension(&self, extension: Handle) -> BridgeResult<()> {
        let cell = self.cell(extension)?;
        tracing::info!(extension = %cell.name, addon = %cell.addon, "Extension destroyed");
        self.table.release(extension)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handle-keyed message access
    // ─────────────────────────────────────────────────────────────────────────

    fn msg(&self, handle: Handle) -> BridgeResult<Bound<NativeMsg>> {
        resolve_msg(&self.table, handle)
    }

    /// Read a message property, checking its kind.
    pub fn msg_property(&self, handle: Handle, path: &str, expected: ValueType) -> BridgeResult<Value> {
        self.msg(handle)?
            .read(|m| m.property_of_type(path, expected))?
    }

    pub fn msg_set_property(&self, handle: Handle, path: &str, value: Value) -> BridgeResult<()> {
        self.msg(handle)?
            .write(|m| m.properties_mut().set(path, value))?
    }

    pub fn msg_alloc_buf(&self, handle: Handle, size: usize) -> BridgeResult<()> {
        self.msg(handle)?.write(|m| m.payload_mut().alloc(size))?
    }

    pub fn msg_lock_buf(&self, handle: Handle) -> BridgeResult<LockedBuf> {
        self.msg(handle)?.write(|m| m.payload_mut().lock())?
    }

    pub fn msg_unlock_buf(&self, handle: Handle, view: LockedBuf) -> BridgeResult<()> {
        self.msg(handle)?.write(|m| m.payload_mut().unlock(view))?
    }

    /// Copy of a message's payload
    pub fn msg_buf(&self, handle: Handle) -> BridgeResult<Vec<u8>> {
        self.msg(handle)?.read(|m| m.payload().copy())
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("table", &self.table)
            .field("addons", &self.addons)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{Message, StatusCode};
    use crate::testing::{CoreCall, RecordingCore};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        deinit: AtomicUsize,
        data: AtomicUsize,
        last_data: Mutex<Option<Data>>,
    }

    struct Probe {
        counters: Arc<Counters>,
        signal_stop: bool,
    }

    impl Extension for Probe {
        fn on_stop(&mut self, env: &Env) {
            if self.signal_stop {
                let _ = env.on_stop_done();
            }
        }

        fn on_deinit(&mut self, env: &Env) {
            self.counters.deinit.fetch_add(1, Ordering::SeqCst);
            let _ = env.on_deinit_done();
        }

        fn on_data(&mut self, _env: &Env, data: Data) {
            self.counters.data.fetch_add(1, Ordering::SeqCst);
            *self.counters.last_data.lock() = Some(data);
        }
    }

    fn setup(signal_stop: bool) -> (Bridge, Arc<RecordingCore>, Arc<Counters>, ExtensionHandles) {
        let addons = AddonRegistry::new_shared();
        let counters = Arc::new(Counters::default());
        let shared = counters.clone();
        addons
            .register("probe", move |_| {
                Box::new(Probe {
                    counters: shared.clone(),
                    signal_stop,
                })
            })
            .unwrap();

        let bridge = Bridge::new(addons);
        let core = Arc::new(RecordingCore::default());
        let handles = bridge.create_extension("probe", "p", core.clone()).unwrap();
        (bridge, core, counters, handles)
    }

    fn start(bridge: &Bridge, ext: Handle) {
        bridge.on_configure(ext).unwrap();
        bridge.on_init(ext).unwrap();
        bridge.on_start(ext).unwrap();
    }

    #[test]
    fn test_start_requires_init_done() {
        let (bridge, _core, _counters, handles) = setup(true);
        bridge.on_configure(handles.extension).unwrap();

        assert!(matches!(
            bridge.on_start(handles.extension),
            Err(BridgeError::InvalidLifecycleTransition { .. })
        ));
        bridge.on_init(handles.extension).unwrap();
        bridge.on_start(handles.extension).unwrap();
        assert_eq!(
            bridge.lifecycle_state(handles.extension).unwrap(),
            LifecycleState::Started
        );
    }

    #[test]
    fn test_messages_rejected_before_start() {
        let (bridge, _core, counters, handles) = setup(true);
        assert!(matches!(
            bridge.on_data(handles.extension, NativeMsg::data("d")),
            Err(BridgeError::NotStarted(LifecycleState::Unconfigured))
        ));
        assert_eq!(counters.data.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deinit_exactly_once_without_stop_done() {
        let (bridge, _core, counters, handles) = setup(false);
        start(&bridge, handles.extension);

        bridge.on_stop(handles.extension).unwrap();
        assert_eq!(
            bridge.lifecycle_state(handles.extension).unwrap(),
            LifecycleState::Stopping
        );

        bridge.on_deinit(handles.extension).unwrap();
        bridge.on_deinit(handles.extension).unwrap();
        assert_eq!(counters.deinit.load(Ordering::SeqCst), 1);
        assert_eq!(
            bridge.lifecycle_state(handles.extension).unwrap(),
            LifecycleState::Deinitialized
        );
    }

    #[test]
    fn test_received_payload_copies_are_independent() {
        let (bridge, _core, counters, handles) = setup(true);
        start(&bridge, handles.extension);

        let mut msg = NativeMsg::data("d");
        msg.payload_mut().set(vec![1, 2, 3]).unwrap();
        bridge.on_data(handles.extension, msg).unwrap();

        let guard = counters.last_data.lock();
        let data = guard.as_ref().unwrap();
        let mut first = data.get_buf().unwrap();
        first[0] = 42;
        assert_eq!(data.get_buf().unwrap(), vec![1, 2, 3]);

        let mut view = data.lock_buf().unwrap();
        view[0] = 9;
        assert_eq!(data.get_buf().unwrap(), vec![1, 2, 3]);
        data.unlock_buf(view).unwrap();
        assert_eq!(data.get_buf().unwrap(), vec![9, 2, 3]);
    }

    #[test]
    fn test_handle_keyed_accessors() {
        let (bridge, _core, counters, handles) = setup(true);
        start(&bridge, handles.extension);

        let mut msg = NativeMsg::data("d");
        msg.properties_mut().set("n", 5i64).unwrap();
        bridge.on_data(handles.extension, msg).unwrap();

        let handle = counters.last_data.lock().as_ref().unwrap().handle();
        assert_eq!(
            bridge.msg_property(handle, "n", ValueType::Int).unwrap(),
            Value::Int(5)
        );
        assert!(matches!(
            bridge.msg_property(handle, "n", ValueType::String),
            Err(BridgeError::TypePropertyMismatch { .. })
        ));

        bridge.msg_alloc_buf(handle, 2).unwrap();
        let mut view = bridge.msg_lock_buf(handle).unwrap();
        view.copy_from_slice(&[4, 5]);
        bridge.msg_unlock_buf(handle, view).unwrap();
        assert_eq!(bridge.msg_buf(handle).unwrap(), vec![4, 5]);

        // Dropping the last wrapper releases the message handle.
        counters.last_data.lock().take();
        assert!(bridge.msg_buf(handle).is_err());
    }

    #[test]
    fn test_close_env_then_send_fails() {
        let (bridge, core, _counters, handles) = setup(true);
        let env = bridge.extension_env(handles.extension).unwrap();

        bridge.close_env(handles.env).unwrap();
        assert_eq!(
            env.post_cmd(Cmd::new("x").unwrap()).unwrap_err(),
            BridgeError::EnvironmentExpired
        );
        assert!(bridge.env(handles.env).is_err());
        assert!(core.calls().is_empty());
    }

    #[test]
    fn test_results_routed_by_env_handle() {
        let (bridge, core, _counters, handles) = setup(true);
        let env = bridge.extension_env(handles.extension).unwrap();
        let status = Arc::new(Mutex::new(None));
        let slot = status.clone();
        env.send_cmd(Cmd::new("q").unwrap(), move |_, result| {
            *slot.lock() = Some(result.and_then(|r| r.status()));
        })
        .unwrap();

        let callback = match &core.calls()[0] {
            CoreCall::SendCmd { callback, .. } => *callback,
            other => panic!("unexpected {other:?}"),
        };
        bridge
            .on_cmd_result(handles.env, callback, Ok(NativeMsg::cmd_result(StatusCode::Ok)))
            .unwrap();
        assert_eq!(*status.lock(), Some(Ok(StatusCode::Ok)));
    }

    #[test]
    fn test_destroy_extension() {
        let (bridge, _core, _counters, handles) = setup(true);
        bridge.close_env(handles.env).unwrap();
        bridge.destroy_extension(handles.extension).unwrap();
        assert!(bridge.table().is_empty());
        assert!(bridge.destroy_extension(handles.extension).is_err());
    }
}

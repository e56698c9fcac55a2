//! Recording core used by unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::env::Env;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, HandleTable};
use crate::lifecycle::LifecycleSignal;
use crate::msg::NativeMsg;
use crate::native::{LogRecord, NativeCore};
use crate::property::PropertyStore;
use crate::value::Value;

#[derive(Debug, Clone)]
pub(crate) enum CoreCall {
    SendCmd {
        name: String,
        callback: Handle,
        streaming: bool,
    },
    SendMsg {
        name: String,
        callback: Handle,
    },
    ReturnResult {
        cmd_id: Option<String>,
        ack: Handle,
    },
    Lifecycle(LifecycleSignal),
    Log(LogRecord),
}

#[derive(Default)]
pub(crate) struct RecordingCore {
    calls: Mutex<Vec<CoreCall>>,
    properties: Mutex<PropertyStore>,
    fail_next: AtomicBool,
}

impl RecordingCore {
    pub(crate) fn calls(&self) -> Vec<CoreCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn last_callback(&self) -> Handle {
        self.calls
            .lock()
            .iter()
            .rev()
            .find_map(|c| match c {
                CoreCall::SendCmd { callback, .. } | CoreCall::SendMsg { callback, .. } => {
                    Some(*callback)
                }
                _ => None,
            })
            .unwrap_or(Handle::NONE)
    }

    fn record(&self, call: CoreCall) -> BridgeResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::NativeCallFailure {
                code: -1,
                message: "injected failure".into(),
            });
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

impl NativeCore for RecordingCore {
    fn send_cmd(&self, _env: Handle, cmd: NativeMsg, callback: Handle, streaming: bool) -> BridgeResult<()> {
        self.record(CoreCall::SendCmd {
            name: cmd.name().to_string(),
            callback,
            streaming,
        })
    }

    fn send_msg(&self, _env: Handle, msg: NativeMsg, callback: Handle) -> BridgeResult<()> {
        self.record(CoreCall::SendMsg {
            name: msg.name().to_string(),
            callback,
        })
    }

    fn return_result(
        &self,
        _env: Handle,
        result: NativeMsg,
        target: Option<&NativeMsg>,
        ack: Handle,
    ) -> BridgeResult<()> {
        let cmd_id = target
            .and_then(|t| t.cmd_id())
            .or(result.cmd_id())
            .map(str::to_string);
        self.record(CoreCall::ReturnResult { cmd_id, ack })
    }

    fn lifecycle_done(&self, _env: Handle, signal: LifecycleSignal) -> BridgeResult<()> {
        self.record(CoreCall::Lifecycle(signal))
    }

    fn get_property(&self, _env: Handle, path: &str) -> BridgeResult<Value> {
        self.properties.lock().get(path).cloned()
    }

    fn set_property(&self, _env: Handle, path: &str, value: Value) -> BridgeResult<()> {
        self.properties.lock().set(path, value)
    }

    fn init_property_from_json(&self, _env: Handle, json: &str) -> BridgeResult<()> {
        self.properties.lock().merge_json(json)
    }

    fn property_to_json(&self, _env: Handle, path: &str) -> BridgeResult<String> {
        self.properties.lock().to_json(path)
    }

    fn log(&self, _env: Handle, record: LogRecord) {
        self.calls.lock().push(CoreCall::Log(record));
    }
}

/// A fresh env backed by a recording core, in its own table.
pub(crate) fn test_env(name: &str) -> (Env, Arc<RecordingCore>) {
    let table = HandleTable::new_shared();
    let core = Arc::new(RecordingCore::default());
    let env = Env::create(&table, name, core.clone());
    (env, core)
}

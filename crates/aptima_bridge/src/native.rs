//! Native core boundary.
//!
//! Everything the bridge asks of the message-routing core goes through
//! [`NativeCore`]. Objects cross the boundary as [`Handle`]s or as owned
//! [`NativeMsg`]s; asynchronous outcomes come back through
//! [`crate::Bridge::on_cmd_result`] and [`crate::Bridge::on_outcome`] keyed by
//! the callback handle passed here.

use serde::{Deserialize, Serialize};

use crate::error::BridgeResult;
use crate::handle::Handle;
use crate::lifecycle::LifecycleSignal;
use crate::msg::NativeMsg;
use crate::value::Value;

/// Severity of an extension log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Log line emitted by an extension, with its call site
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub file: &'static str,
    pub line: u32,
}

/// Operations the native core provides to bridged extensions.
///
/// `env` identifies the calling extension. A `callback` of `Handle::NONE`
/// means the caller registered no handler.
pub trait NativeCore: Send + Sync + 'static {
    /// Route a command. Results, or a `NoDestination` error, are reported to
    /// `callback`. When `streaming` is false only final results are reported.
    fn send_cmd(
        &self,
        env: Handle,
        cmd: NativeMsg,
        callback: Handle,
        streaming: bool,
    ) -> BridgeResult<()>;

    /// Route a data, video frame or audio frame message; the delivery outcome
    /// is reported to `callback`.
    fn send_msg(&self, env: Handle, msg: NativeMsg, callback: Handle) -> BridgeResult<()>;

    /// Return a result for `target`, or for the command named by the result's
    /// own correlation id when `target` is `None`.
    fn return_result(
        &self,
        env: Handle,
        result: NativeMsg,
        target: Option<&NativeMsg>,
        ack: Handle,
    ) -> BridgeResult<()>;

    /// A lifecycle phase has finished on the extension side.
    fn lifecycle_done(&self, env: Handle, signal: LifecycleSignal) -> BridgeResult<()>;

    fn get_property(&self, env: Handle, path: &str) -> BridgeResult<Value>;

    fn set_property(&self, env: Handle, path: &str, value: Value) -> BridgeResult<()>;

    /// Merge a JSON object into the extension's properties.
    fn init_property_from_json(&self, env: Handle, json: &str) -> BridgeResult<()>;

    /// Serialize the extension's property at `path` (all properties if empty).
    fn property_to_json(&self, env: Handle, path: &str) -> BridgeResult<String>;

    fn log(&self, env: Handle, record: LogRecord);
}

//! Message Model
//!
//! Commands, command results, opaque data and media frames. Every message
//! kind wraps a [`NativeMsg`] in a [`Bound`] so the native side can reach it
//! by handle while the extension holds it. Sending a message moves the native
//! message out of the wrapper; using the wrapper afterwards is an
//! `InvalidArgument` error.

mod buf;
mod cmd;
mod data;
mod frame;

use std::sync::Arc;

pub use buf::{LockedBuf, Payload};
pub use cmd::{Cmd, CmdResult, StatusCode};
pub use data::Data;
pub use frame::{AudioDataFmt, AudioFrame, AudioInfo, PixelFmt, VideoFrame, VideoInfo};

use crate::binding::Bound;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, HandleTable};
use crate::property::PropertyStore;
use crate::value::{FromValue, Value, ValueType};

// ─────────────────────────────────────────────────────────────────────────────
// Native Message
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
    Cmd,
    CmdResult,
    Data,
    VideoFrame,
    AudioFrame,
}

impl std::fmt::Display for MsgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgKind::Cmd => write!(f, "cmd"),
            MsgKind::CmdResult => write!(f, "cmd_result"),
            MsgKind::Data => write!(f, "data"),
            MsgKind::VideoFrame => write!(f, "video_frame"),
            MsgKind::AudioFrame => write!(f, "audio_frame"),
        }
    }
}

/// Result-specific fields
#[derive(Debug, Clone, PartialEq)]
pub struct ResultInfo {
    pub status: StatusCode,
    pub is_final: bool,
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum MsgMeta {
    Cmd,
    CmdResult(ResultInfo),
    Data,
    Video(VideoInfo),
    Audio(AudioInfo),
}

/// The message as the native core sees it
#[derive(Debug, Clone, PartialEq)]
pub struct NativeMsg {
    name: String,
    cmd_id: Option<String>,
    source: Option<String>,
    properties: PropertyStore,
    payload: Payload,
    meta: MsgMeta,
}

impl NativeMsg {
    fn with_meta(name: &str, meta: MsgMeta) -> Self {
        Self {
            name: name.to_string(),
            cmd_id: None,
            source: None,
            properties: PropertyStore::new(),
            payload: Payload::default(),
            meta,
        }
    }

    pub fn cmd(name: &str) -> Self {
        Self::with_meta(name, MsgMeta::Cmd)
    }

    pub fn cmd_result(status: StatusCode) -> Self {
        Self::with_meta(
            "",
            MsgMeta::CmdResult(ResultInfo {
                status,
                is_final: true,
                is_completed: false,
            }),
        )
    }

    /// Error result for the command identified by `cmd_id`, with `detail` set.
    pub fn error_result(cmd_id: &str, detail: &str) -> Self {
        let mut msg = Self::cmd_result(StatusCode::Error);
        msg.cmd_id = Some(cmd_id.to_string());
        // A plain string key on a fresh store cannot fail.
        let _ = msg.properties.set("detail", detail);
        msg
    }

    pub fn data(name: &str) -> Self {
        Self::with_meta(name, MsgMeta::Data)
    }

    pub fn video_frame(name: &str) -> Self {
        Self::with_meta(name, MsgMeta::Video(VideoInfo::default()))
    }

    pub fn audio_frame(name: &str) -> Self {
        Self::with_meta(name, MsgMeta::Audio(AudioInfo::default()))
    }

    pub fn kind(&self) -> MsgKind {
        match self.meta {
            MsgMeta::Cmd => MsgKind::Cmd,
            MsgMeta::CmdResult(_) => MsgKind::CmdResult,
            MsgMeta::Data => MsgKind::Data,
            MsgMeta::Video(_) => MsgKind::VideoFrame,
            MsgMeta::Audio(_) => MsgKind::AudioFrame,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Correlation id assigned by the core when a command is sent
    pub fn cmd_id(&self) -> Option<&str> {
        self.cmd_id.as_deref()
    }

    pub fn set_cmd_id(&mut self, cmd_id: impl Into<String>) {
        self.cmd_id = Some(cmd_id.into());
    }

    /// Name of the extension that sent the message
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyStore {
        &mut self.properties
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    pub fn result_info(&self) -> Option<&ResultInfo> {
        match &self.meta {
            MsgMeta::CmdResult(info) => Some(info),
            _ => None,
        }
    }

    pub(crate) fn result_info_mut(&mut self) -> Option<&mut ResultInfo> {
        match &mut self.meta {
            MsgMeta::CmdResult(info) => Some(info),
            _ => None,
        }
    }

    /// Final flag of a result; non-result messages count as final.
    pub fn is_final(&self) -> bool {
        self.result_info().is_none_or(|info| info.is_final)
    }

    pub fn set_final(&mut self, is_final: bool) {
        if let Some(info) = self.result_info_mut() {
            info.is_final = is_final;
        }
    }

    pub fn set_completed(&mut self, completed: bool) {
        if let Some(info) = self.result_info_mut() {
            info.is_completed = completed;
        }
    }

    pub fn video(&self) -> Option<&VideoInfo> {
        match &self.meta {
            MsgMeta::Video(info) => Some(info),
            _ => None,
        }
    }

    pub fn video_mut(&mut self) -> Option<&mut VideoInfo> {
        match &mut self.meta {
            MsgMeta::Video(info) => Some(info),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioInfo> {
        match &self.meta {
            MsgMeta::Audio(info) => Some(info),
            _ => None,
        }
    }

    pub fn audio_mut(&mut self) -> Option<&mut AudioInfo> {
        match &mut self.meta {
            MsgMeta::Audio(info) => Some(info),
            _ => None,
        }
    }

    /// Checks run before a message is moved into the core.
    pub fn check_sendable(&self) -> BridgeResult<()> {
        self.payload.ensure_unlocked("send")
    }

    /// Typed property read with a kind check, as done by handle-keyed accessors.
    pub fn property_of_type(&self, path: &str, expected: ValueType) -> BridgeResult<Value> {
        let value = self.properties.get(path)?;
        if value.value_type() != expected {
            return Err(BridgeError::TypePropertyMismatch {
                path: path.to_string(),
                expected: expected.to_string(),
                found: value.value_type().to_string(),
            });
        }
        Ok(value.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message Trait
// ─────────────────────────────────────────────────────────────────────────────

mod private {
    pub trait Sealed {}
}

/// Operations shared by every message kind.
///
/// This trait is sealed; only the message types of this crate implement it.
pub trait Message: private::Sealed {
    #[doc(hidden)]
    fn bound(&self) -> &Bound<NativeMsg>;

    /// Handle of the message, `Handle::NONE` if it was created locally
    fn handle(&self) -> Handle {
        self.bound().handle()
    }

    /// Whether the message has been moved into the core
    fn is_sent(&self) -> bool {
        self.bound().is_empty()
    }

    fn name(&self) -> BridgeResult<String> {
        self.bound().read(|m| m.name.clone())
    }

    fn get_property<T: FromValue>(&self, path: &str) -> BridgeResult<T> {
        self.bound().read(|m| m.properties.get_as::<T>(path))?
    }

    fn get_property_bool(&self, path: &str) -> BridgeResult<bool> {
        self.get_property(path)
    }

    fn get_property_int32(&self, path: &str) -> BridgeResult<i32> {
        self.get_property(path)
    }

    fn get_property_int64(&self, path: &str) -> BridgeResult<i64> {
        self.get_property(path)
    }

    fn get_property_uint64(&self, path: &str) -> BridgeResult<u64> {
        self.get_property(path)
    }

    fn get_property_float64(&self, path: &str) -> BridgeResult<f64> {
        self.get_property(path)
    }

    fn get_property_string(&self, path: &str) -> BridgeResult<String> {
        self.get_property(path)
    }

    fn get_property_buf(&self, path: &str) -> BridgeResult<Vec<u8>> {
        self.get_property(path)
    }

    fn get_property_ptr(&self, path: &str) -> BridgeResult<Handle> {
        self.get_property(path)
    }

    fn property_type(&self, path: &str) -> BridgeResult<ValueType> {
        self.bound().read(|m| m.properties.value_type(path))?
    }

    fn set_property(&self, path: &str, value: impl Into<Value>) -> BridgeResult<()> {
        self.bound().write(|m| m.properties.set(path, value))?
    }

    fn get_property_to_json(&self, path: &str) -> BridgeResult<String> {
        self.bound().read(|m| m.properties.to_json(path))?
    }

    fn set_property_from_json(&self, path: &str, json: &str) -> BridgeResult<()> {
        self.bound()
            .write(|m| m.properties.set_from_json(path, json))?
    }

    fn alloc_buf(&self, size: usize) -> BridgeResult<()> {
        self.bound().write(|m| m.payload.alloc(size))?
    }

    /// Lock the payload. The returned view is a private copy.
    fn lock_buf(&self) -> BridgeResult<LockedBuf> {
        self.bound().write(|m| m.payload.lock())?
    }

    /// Commit a view obtained from [`Message::lock_buf`].
    fn unlock_buf(&self, view: LockedBuf) -> BridgeResult<()> {
        self.bound().write(|m| m.payload.unlock(view))?
    }

    /// Copy of the payload bytes
    fn get_buf(&self) -> BridgeResult<Vec<u8>> {
        self.bound().read(|m| m.payload.copy())
    }

    fn buf_size(&self) -> BridgeResult<usize> {
        self.bound().read(|m| m.payload.len())
    }
}

macro_rules! message_wrapper {
    ($name:ident) => {
        impl $crate::msg::private::Sealed for $name {}

        impl $crate::msg::Message for $name {
            fn bound(&self) -> &$crate::binding::Bound<$crate::msg::NativeMsg> {
                &self.bound
            }
        }

        impl $name {
            /// Wrap a message received from the core and expose it by handle.
            pub fn bind(
                table: &std::sync::Arc<$crate::handle::HandleTable>,
                msg: $crate::msg::NativeMsg,
            ) -> Self {
                Self {
                    bound: $crate::binding::Bound::new(table, msg),
                }
            }

            pub(crate) fn local(msg: $crate::msg::NativeMsg) -> Self {
                Self {
                    bound: $crate::binding::Bound::detached(msg),
                }
            }
        }
    };
    ($name:ident, sendable) => {
        $crate::msg::message_wrapper!($name);

        impl $name {
            /// Move the native message out for sending.
            pub(crate) fn take_for_send(&self) -> $crate::error::BridgeResult<$crate::msg::NativeMsg> {
                self.bound.take_if($crate::msg::NativeMsg::check_sendable)
            }
        }
    };
}

pub(crate) use message_wrapper;

fn require_name(name: &str) -> BridgeResult<()> {
    if name.is_empty() {
        return Err(BridgeError::InvalidArgument("message name is empty".into()));
    }
    Ok(())
}

/// Resolve a message bound in `table`, for handle-keyed accessors.
pub(crate) fn resolve_msg(table: &Arc<HandleTable>, handle: Handle) -> BridgeResult<Bound<NativeMsg>> {
    Bound::resolve(table, handle)
}

//! Bridge between extension components and a native message-routing core.
//!
//! Extensions implement [`Extension`] and talk to the core through an
//! [`Env`]. The core talks back through [`Bridge`], addressing every managed
//! object by an opaque [`Handle`] issued by the [`HandleTable`].
//!
//! # Example
//!
//! ```ignore
//! struct Doubler;
//!
//! impl Extension for Doubler {
//!     fn on_cmd(&mut self, env: &Env, cmd: Cmd) {
//!         let n = cmd.get_property_int64("data").unwrap_or_default();
//!         let result = CmdResult::new(StatusCode::Ok);
//!         let _ = result.set_property("data", n * 2);
//!         let _ = env.return_result(result, &cmd);
//!     }
//! }
//! ```

mod addon;
mod binding;
mod bridge;
mod correlation;
mod env;
mod error;
mod extension;
mod handle;
mod lifecycle;
mod msg;
mod native;
mod property;
mod value;

#[cfg(test)]
mod testing;

pub use addon::{AddonRegistry, ExtensionFactory};
pub use binding::{Bound, Pinned};
pub use bridge::{Bridge, ExtensionHandles};
pub use env::Env;
pub use error::{BridgeError, BridgeResult};
pub use extension::{DefaultExtension, Extension};
pub use handle::{Handle, HandleTable};
pub use lifecycle::{LifecycleSignal, LifecycleState, LifecycleTracker};
pub use msg::{
    AudioDataFmt, AudioFrame, AudioInfo, Cmd, CmdResult, Data, LockedBuf, Message, MsgKind,
    NativeMsg, Payload, PixelFmt, ResultInfo, StatusCode, VideoFrame, VideoInfo,
};
pub use native::{LogLevel, LogRecord, NativeCore};
pub use property::PropertyStore;
pub use value::{FromValue, Value, ValueType};

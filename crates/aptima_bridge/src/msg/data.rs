use super::{NativeMsg, require_name};
use crate::binding::Bound;
use crate::error::BridgeResult;

/// One-way message carrying an opaque payload
#[derive(Debug)]
pub struct Data {
    bound: Bound<NativeMsg>,
}

super::message_wrapper!(Data, sendable);

impl Data {
    pub fn new(name: &str) -> BridgeResult<Self> {
        require_name(name)?;
        Ok(Self::local(NativeMsg::data(name)))
    }

    /// Create a message whose payload is `bytes`.
    pub fn with_buf(name: &str, bytes: Vec<u8>) -> BridgeResult<Self> {
        require_name(name)?;
        let mut msg = NativeMsg::data(name);
        msg.payload_mut().set(bytes)?;
        Ok(Self::local(msg))
    }
}

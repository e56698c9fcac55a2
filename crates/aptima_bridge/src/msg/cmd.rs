use serde::{Deserialize, Serialize};

use super::{Message, NativeMsg, require_name};
use crate::binding::Bound;
use crate::error::{BridgeError, BridgeResult};

/// Status of a command result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    Error,
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusCode::Ok => write!(f, "ok"),
            StatusCode::Error => write!(f, "error"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cmd
// ─────────────────────────────────────────────────────────────────────────────

/// Named request that may elicit one or more results
#[derive(Debug)]
pub struct Cmd {
    bound: Bound<NativeMsg>,
}

super::message_wrapper!(Cmd, sendable);

impl Cmd {
    pub fn new(name: &str) -> BridgeResult<Self> {
        require_name(name)?;
        Ok(Self::local(NativeMsg::cmd(name)))
    }

    /// Correlation id, present once the core has routed the command
    pub fn cmd_id(&self) -> BridgeResult<Option<String>> {
        self.bound.read(|m| m.cmd_id().map(str::to_string))
    }

    /// Name of the extension that sent the command
    pub fn source(&self) -> BridgeResult<Option<String>> {
        self.bound.read(|m| m.source().map(str::to_string))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CmdResult
// ─────────────────────────────────────────────────────────────────────────────

/// Status-coded reply correlated to one command
#[derive(Debug)]
pub struct CmdResult {
    bound: Bound<NativeMsg>,
}

super::message_wrapper!(CmdResult);

impl CmdResult {
    /// A result not yet tied to a command; pass the command when returning it.
    pub fn new(status: StatusCode) -> Self {
        Self::local(NativeMsg::cmd_result(status))
    }

    /// A result already carrying `cmd`'s correlation id.
    pub fn for_cmd(status: StatusCode, cmd: &Cmd) -> BridgeResult<Self> {
        let (name, cmd_id) = cmd
            .bound()
            .read(|m| (m.name().to_string(), m.cmd_id().map(str::to_string)))?;
        let cmd_id = cmd_id.ok_or_else(|| {
            BridgeError::InvalidArgument(format!("command '{name}' has not been routed"))
        })?;

        let mut msg = NativeMsg::cmd_result(status);
        msg.name = name;
        msg.cmd_id = Some(cmd_id);
        Ok(Self::local(msg))
    }

    pub fn status(&self) -> BridgeResult<StatusCode> {
        self.bound
            .read(|m| m.result_info().map(|info| info.status))?
            .ok_or_else(not_a_result)
    }

    pub fn is_final(&self) -> BridgeResult<bool> {
        self.bound.read(|m| m.is_final())
    }

    /// Mark the result as an intermediate (streaming) or final one.
    pub fn set_final(&self, is_final: bool) -> BridgeResult<()> {
        self.bound
            .write(|m| m.result_info_mut().map(|info| info.is_final = is_final))?
            .ok_or_else(not_a_result)
    }

    /// Whether the core closed the command with this result
    pub fn is_completed(&self) -> BridgeResult<bool> {
        self.bound
            .read(|m| m.result_info().map(|info| info.is_completed))?
            .ok_or_else(not_a_result)
    }

    pub fn cmd_id(&self) -> BridgeResult<Option<String>> {
        self.bound.read(|m| m.cmd_id().map(str::to_string))
    }
}

fn not_a_result() -> BridgeError {
    BridgeError::InvalidArgument("message is not a command result".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleTable;

    #[test]
    fn test_result_defaults() {
        let result = CmdResult::new(StatusCode::Ok);
        assert_eq!(result.status().unwrap(), StatusCode::Ok);
        assert!(result.is_final().unwrap());
        assert!(!result.is_completed().unwrap());

        result.set_final(false).unwrap();
        assert!(!result.is_final().unwrap());
    }

    #[test]
    fn test_for_cmd_requires_routed_command() {
        let local = Cmd::new("x").unwrap();
        assert!(matches!(
            CmdResult::for_cmd(StatusCode::Ok, &local),
            Err(BridgeError::InvalidArgument(_))
        ));

        let table = HandleTable::new_shared();
        let mut msg = NativeMsg::cmd("x");
        msg.set_cmd_id("abc");
        let routed = Cmd::bind(&table, msg);

        let result = CmdResult::for_cmd(StatusCode::Error, &routed).unwrap();
        assert_eq!(result.cmd_id().unwrap().as_deref(), Some("abc"));
        assert_eq!(result.name().unwrap(), "x");
        assert_eq!(result.status().unwrap(), StatusCode::Error);
    }
}

//! Async Correlation Protocol
//!
//! A [`PendingCall`] is created for every asynchronous send that registered a
//! handler. It reaches exactly one terminal outcome; deliveries after that are
//! ignored.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::env::Env;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::msg::CmdResult;

/// Handler for command results. Called once per streamed result.
pub(crate) type ResultHandler = Box<dyn FnMut(&Env, BridgeResult<CmdResult>) + Send>;

/// Handler for one-way sends and result acknowledgements.
pub(crate) type OutcomeHandler = Box<dyn FnOnce(&Env, BridgeResult<()>) + Send>;

pub(crate) enum Handler {
    Result(ResultHandler),
    Outcome(OutcomeHandler),
}

/// Bookkeeping for one outstanding asynchronous call
pub(crate) struct PendingCall {
    handle: Handle,
    streaming: bool,
    completed: AtomicBool,
    handler: Mutex<Option<Handler>>,
}

impl PendingCall {
    pub(crate) fn new(handle: Handle, handler: Handler, streaming: bool) -> Self {
        Self {
            handle,
            streaming,
            completed: AtomicBool::new(false),
            handler: Mutex::new(Some(handler)),
        }
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Claim the terminal transition. Only the first caller wins.
    fn claim(&self) -> bool {
        self.completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Deliver a command result or error. Returns true once the call is done.
    pub(crate) fn deliver_result(
        &self,
        env: &Env,
        outcome: BridgeResult<CmdResult>,
        is_final: bool,
    ) -> bool {
        let terminal = outcome.is_err() || is_final;

        if !terminal {
            if !self.streaming || self.is_completed() {
                return false;
            }
            let mut slot = self.handler.lock();
            if let Some(Handler::Result(handler)) = slot.as_mut() {
                handler(env, outcome);
            }
            return false;
        }

        if !self.claim() {
            tracing::debug!(callback = %self.handle, "Late completion ignored");
            return false;
        }

        let handler = self.handler.lock().take();
        match handler {
            Some(Handler::Result(mut handler)) => handler(env, outcome),
            Some(Handler::Outcome(_)) => {
                tracing::warn!(callback = %self.handle, "Command result routed to an outcome handler");
            }
            None => {}
        }
        true
    }

    /// Deliver the outcome of a one-way send or a result acknowledgement.
    pub(crate) fn deliver_outcome(&self, env: &Env, outcome: BridgeResult<()>) -> bool {
        if !self.claim() {
            tracing::debug!(callback = %self.handle, "Late completion ignored");
            return false;
        }

        let handler = self.handler.lock().take();
        match handler {
            Some(Handler::Outcome(handler)) => handler(env, outcome),
            Some(Handler::Result(mut handler)) => match outcome {
                Err(err) => handler(env, Err(err)),
                Ok(()) => {
                    tracing::warn!(callback = %self.handle, "Outcome routed to a result handler");
                }
            },
            None => {}
        }
        true
    }
}

impl PendingCall {
    /// Terminate the call with `err`, whichever handler kind it holds.
    pub(crate) fn fail(&self, env: &Env, err: BridgeError) -> bool {
        if !self.claim() {
            return false;
        }

        let handler = self.handler.lock().take();
        match handler {
            Some(Handler::Result(mut handler)) => handler(env, Err(err)),
            Some(Handler::Outcome(handler)) => handler(env, Err(err)),
            None => {}
        }
        true
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("handle", &self.handle)
            .field("streaming", &self.streaming)
            .field("completed", &self.is_completed())
            .finish()
    }
}

//! Message payload buffer with explicit lock/unlock discipline.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BridgeError, BridgeResult};

static NEXT_LOCK: AtomicU64 = AtomicU64::new(1);

/// Binary payload owned by a native message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    data: Vec<u8>,
    lock: Option<u64>,
}

impl Payload {
    /// Replace the payload with `size` zeroed bytes.
    pub fn alloc(&mut self, size: usize) -> BridgeResult<()> {
        self.ensure_unlocked("alloc")?;
        self.data = vec![0; size];
        Ok(())
    }

    /// Replace the payload with `bytes`.
    pub fn set(&mut self, bytes: Vec<u8>) -> BridgeResult<()> {
        self.ensure_unlocked("set")?;
        self.data = bytes;
        Ok(())
    }

    /// Hand out a private copy for editing. Only one lock may be outstanding.
    pub fn lock(&mut self) -> BridgeResult<LockedBuf> {
        self.ensure_unlocked("lock")?;
        let token = NEXT_LOCK.fetch_add(1, Ordering::Relaxed);
        self.lock = Some(token);
        Ok(LockedBuf {
            token,
            data: self.data.clone(),
        })
    }

    /// Commit a locked view and end the lock.
    pub fn unlock(&mut self, view: LockedBuf) -> BridgeResult<()> {
        match self.lock {
            Some(token) if token == view.token => {
                self.data = view.data;
                self.lock = None;
                Ok(())
            }
            Some(_) => Err(BridgeError::BufferState(
                "view does not belong to this buffer's lock".into(),
            )),
            None => Err(BridgeError::BufferState("buffer is not locked".into())),
        }
    }

    /// Independent copy of the committed bytes
    pub fn copy(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub(crate) fn ensure_unlocked(&self, op: &str) -> BridgeResult<()> {
        if self.is_locked() {
            return Err(BridgeError::BufferState(format!(
                "cannot {op} while the buffer is locked"
            )));
        }
        Ok(())
    }
}

/// Writable view returned by a buffer lock
#[derive(Debug)]
pub struct LockedBuf {
    token: u64,
    data: Vec<u8>,
}

impl Deref for LockedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for LockedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

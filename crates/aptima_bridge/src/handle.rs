//! Handle Table
//!
//! Gives managed objects a stable opaque identity that native code can hold
//! without owning the object. Handles are issued from a monotonic counter and
//! are never reused.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::error::{BridgeError, BridgeResult};

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque cross-boundary object identifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Sentinel meaning "no object" (for example, no response handler)
    pub const NONE: Handle = Handle(0);

    /// Rebuild a handle from its raw value
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value as passed across the boundary
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle Table
// ─────────────────────────────────────────────────────────────────────────────

type AnyObject = dyn Any + Send + Sync;

#[derive(Clone)]
enum Entry {
    /// The table keeps the object alive until release
    Strong(Arc<AnyObject>),
    /// The table only observes the object
    Weak(Weak<AnyObject>),
}

/// Registry mapping handles to managed objects
pub struct HandleTable {
    entries: DashMap<Handle, Entry>,
    next: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }

    /// Create a new table wrapped in an Arc
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn issue(&self) -> Handle {
        Handle(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an object; the table holds a strong reference until release.
    pub fn register<T: Any + Send + Sync>(&self, object: Arc<T>) -> Handle {
        let handle = self.issue();
        self.entries.insert(handle, Entry::Strong(object));
        handle
    }

    /// Register an object built from its own handle.
    pub fn register_with<T, F>(&self, make: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce(Handle) -> Arc<T>,
    {
        let handle = self.issue();
        let object = make(handle);
        self.entries.insert(handle, Entry::Strong(object.clone()));
        object
    }

    /// Register a non-owning entry. Resolving it fails once the object is gone.
    pub fn register_weak<T: Any + Send + Sync>(&self, object: Weak<T>) -> Handle {
        let handle = self.issue();
        let weak: Weak<AnyObject> = object;
        self.entries.insert(handle, Entry::Weak(weak));
        handle
    }

    /// Look up a handle and downcast it to the expected type.
    pub fn resolve<T: Any + Send + Sync>(&self, handle: Handle) -> BridgeResult<Arc<T>> {
        // Clone the entry out so no shard lock is held if the upgraded object
        // is dropped (its drop may release other handles).
        let entry = self
            .entries
            .get(&handle)
            .map(|e| e.value().clone())
            .ok_or(BridgeError::HandleNotFound(handle))?;

        let object = match entry {
            Entry::Strong(object) => object,
            Entry::Weak(weak) => weak.upgrade().ok_or(BridgeError::HandleNotFound(handle))?,
        };

        object
            .downcast::<T>()
            .map_err(|_| BridgeError::HandleTypeMismatch(handle))
    }

    /// Remove a handle. Releasing twice reports `HandleAlreadyReleased`.
    pub fn release(&self, handle: Handle) -> BridgeResult<()> {
        let removed = self.entries.remove(&handle);
        match removed {
            Some(_) => {
                tracing::trace!(handle = %handle, "Handle released");
                Ok(())
            }
            None if self.was_issued(handle) => Err(BridgeError::HandleAlreadyReleased(handle)),
            None => Err(BridgeError::HandleNotFound(handle)),
        }
    }

    fn was_issued(&self, handle: Handle) -> bool {
        !handle.is_none() && handle.0 < self.next.load(Ordering::Relaxed)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("entries", &self.entries.len())
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}

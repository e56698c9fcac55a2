//! Object Binding & Lifetime Guard
//!
//! A [`Bound`] pairs a managed wrapper with a native resource. The handle
//! table only observes the binding, so the resource is released when the last
//! wrapper is dropped or when [`Bound::release`] is called, whichever comes
//! first, and never while a [`Pinned`] guard is alive.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, HandleTable};

type Finalizer<R> = Box<dyn FnOnce(R) + Send>;

struct CellState<R> {
    resource: Option<R>,
    finalizer: Option<Finalizer<R>>,
    pins: usize,
    release_requested: bool,
    released: bool,
}

impl<R> CellState<R> {
    /// Drop the resource through the finalizer. Returns false if already done.
    fn finalize(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        let resource = self.resource.take();
        if let (Some(resource), Some(finalizer)) = (resource, self.finalizer.take()) {
            finalizer(resource);
        }
        true
    }
}

/// Shared state behind every clone of a [`Bound`].
pub(crate) struct BoundCell<R> {
    handle: Handle,
    table: Option<Arc<HandleTable>>,
    state: Mutex<CellState<R>>,
}

impl<R> BoundCell<R> {
    fn release_handle(&self) {
        if let Some(table) = &self.table {
            // A concurrent explicit release may already have removed it.
            let _ = table.release(self.handle);
        }
    }
}

impl<R> Drop for BoundCell<R> {
    fn drop(&mut self) {
        if self.state.get_mut().finalize() {
            tracing::trace!(handle = %self.handle, "Bound object finalized");
        }
        self.release_handle();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bound
// ─────────────────────────────────────────────────────────────────────────────

/// Managed wrapper paired with a native resource
pub struct Bound<R: Send + 'static> {
    cell: Arc<BoundCell<R>>,
}

impl<R: Send + 'static> Clone for Bound<R> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<R: Send + 'static> Bound<R> {
    fn build(table: Option<Arc<HandleTable>>, resource: Option<R>) -> Self {
        let state = Mutex::new(CellState {
            resource,
            finalizer: None,
            pins: 0,
            release_requested: false,
            released: false,
        });

        let cell = match &table {
            Some(shared) => {
                let shared = shared.clone();
                Arc::new_cyclic(|weak| BoundCell {
                    handle: shared.register_weak(weak.clone()),
                    table: Some(shared),
                    state,
                })
            }
            None => Arc::new(BoundCell {
                handle: Handle::NONE,
                table: None,
                state,
            }),
        };

        Self { cell }
    }

    /// Bind a resource and register it in `table`.
    pub fn new(table: &Arc<HandleTable>, resource: R) -> Self {
        Self::build(Some(table.clone()), Some(resource))
    }

    /// Register a purely managed object with no native resource.
    pub fn empty(table: &Arc<HandleTable>) -> Self {
        Self::build(Some(table.clone()), None)
    }

    /// Bind a resource without exposing it through any table.
    pub fn detached(resource: R) -> Self {
        Self::build(None, Some(resource))
    }

    /// Look up a binding by handle.
    pub fn resolve(table: &HandleTable, handle: Handle) -> BridgeResult<Self> {
        let cell = table.resolve::<BoundCell<R>>(handle)?;
        Ok(Self { cell })
    }

    /// Attach a finalizer that receives the resource when it is released.
    pub fn with_finalizer(self, finalizer: impl FnOnce(R) + Send + 'static) -> Self {
        self.cell.state.lock().finalizer = Some(Box::new(finalizer));
        self
    }

    /// Handle in the owning table, `Handle::NONE` for detached bindings.
    pub fn handle(&self) -> Handle {
        self.cell.handle
    }

    /// Whether the resource slot is empty (never set, moved out, or released)
    pub fn is_empty(&self) -> bool {
        self.cell.state.lock().resource.is_none()
    }

    pub fn is_released(&self) -> bool {
        self.cell.state.lock().released
    }

    /// Acquire a scoped keep-alive reference.
    pub fn pin(&self) -> BridgeResult<Pinned<R>> {
        let mut state = self.cell.state.lock();
        if state.released || state.release_requested {
            return Err(BridgeError::InvalidArgument(format!(
                "object {} has been released",
                self.cell.handle
            )));
        }
        state.pins += 1;
        drop(state);

        Ok(Pinned {
            cell: self.cell.clone(),
        })
    }

    /// Request release. Deferred until the last pin is dropped; idempotent.
    pub fn release(&self) {
        let mut state = self.cell.state.lock();
        state.release_requested = true;
        let finalized = state.pins == 0 && state.finalize();
        drop(state);

        if finalized {
            self.cell.release_handle();
        }
    }

    /// Move the resource out after `check` accepts it.
    ///
    /// Fails while the binding is pinned.
    pub fn take_if(&self, check: impl FnOnce(&R) -> BridgeResult<()>) -> BridgeResult<R> {
        let mut state = self.cell.state.lock();
        if state.pins > 0 {
            return Err(BridgeError::InvalidArgument(format!(
                "object {} is in use",
                self.cell.handle
            )));
        }
        let resource = state
            .resource
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidArgument("object is empty".into()))?;
        check(resource)?;
        state
            .resource
            .take()
            .ok_or_else(|| BridgeError::InvalidArgument("object is empty".into()))
    }

    /// Move the resource out.
    pub fn take(&self) -> BridgeResult<R> {
        self.take_if(|_| Ok(()))
    }

    /// Pin, then read the resource.
    pub fn read<T>(&self, f: impl FnOnce(&R) -> T) -> BridgeResult<T> {
        self.pin()?.with(f)
    }

    /// Pin, then mutate the resource.
    pub fn write<T>(&self, f: impl FnOnce(&mut R) -> T) -> BridgeResult<T> {
        self.pin()?.with_mut(f)
    }
}

impl<R: Send + 'static> std::fmt::Debug for Bound<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.cell.state.lock();
        f.debug_struct("Bound")
            .field("handle", &self.cell.handle)
            .field("empty", &state.resource.is_none())
            .field("pins", &state.pins)
            .field("released", &state.released)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pinned
// ─────────────────────────────────────────────────────────────────────────────

/// Scoped keep-alive guard. Unpins on drop, including during unwinding.
pub struct Pinned<R: Send + 'static> {
    cell: Arc<BoundCell<R>>,
}

impl<R: Send + 'static> Pinned<R> {
    pub fn handle(&self) -> Handle {
        self.cell.handle
    }

    pub fn with<T>(&self, f: impl FnOnce(&R) -> T) -> BridgeResult<T> {
        let state = self.cell.state.lock();
        let resource = state
            .resource
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidArgument("object is empty".into()))?;
        Ok(f(resource))
    }

    pub fn with_mut<T>(&self, f: impl FnOnce(&mut R) -> T) -> BridgeResult<T> {
        let mut state = self.cell.state.lock();
        let resource = state
            .resource
            .as_mut()
            .ok_or_else(|| BridgeError::InvalidArgument("object is empty".into()))?;
        Ok(f(resource))
    }
}

impl<R: Send + 'static> Drop for Pinned<R> {
    fn drop(&mut self) {
        let mut state = self.cell.state.lock();
        state.pins = state.pins.saturating_sub(1);
        let finalized = state.pins == 0 && state.release_requested && state.finalize();
        drop(state);

        if finalized {
            self.cell.release_handle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(table: &Arc<HandleTable>, releases: &Arc<AtomicUsize>) -> Bound<Vec<u8>> {
        let releases = releases.clone();
        Bound::new(table, vec![1, 2, 3]).with_finalizer(move |_| {
            releases.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_drop_releases_once() {
        let table = HandleTable::new_shared();
        let releases = Arc::new(AtomicUsize::new(0));
        let bound = counted(&table, &releases);
        let copy = bound.clone();
        let h = bound.handle();

        drop(bound);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        assert!(table.contains(h));

        drop(copy);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!table.contains(h));
    }

    #[test]
    fn test_explicit_release_is_idempotent() {
        let table = HandleTable::new_shared();
        let releases = Arc::new(AtomicUsize::new(0));
        let bound = counted(&table, &releases);

        bound.release();
        bound.release();
        assert!(bound.is_released());
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        drop(bound);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_release_deferred_while_pinned() {
        let table = HandleTable::new_shared();
        let releases = Arc::new(AtomicUsize::new(0));
        let bound = counted(&table, &releases);

        let pin = bound.pin().unwrap();
        bound.release();
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        assert_eq!(pin.with(|r| r.len()).unwrap(), 3);
        assert!(bound.pin().is_err());

        drop(pin);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_pin_keeps_alive_after_last_wrapper() {
        let table = HandleTable::new_shared();
        let releases = Arc::new(AtomicUsize::new(0));
        let bound = counted(&table, &releases);
        let h = bound.handle();

        let pin = bound.pin().unwrap();
        drop(bound);
        assert!(Bound::<Vec<u8>>::resolve(&table, h).is_ok());
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        drop(pin);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(Bound::<Vec<u8>>::resolve(&table, h).is_err());
    }

    #[test]
    fn test_pin_released_on_panic() {
        let table = HandleTable::new_shared();
        let releases = Arc::new(AtomicUsize::new(0));
        let bound = counted(&table, &releases);

        let inner = bound.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _pin = inner.pin().unwrap();
            inner.release();
            panic!("handler failed");
        }));
        assert!(outcome.is_err());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        drop(bound);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_take_moves_resource_out() {
        let table = HandleTable::new_shared();
        let bound = Bound::new(&table, String::from("payload"));

        assert_eq!(bound.take().unwrap(), "payload");
        assert!(bound.is_empty());
        assert!(matches!(bound.take(), Err(BridgeError::InvalidArgument(_))));
        assert!(matches!(bound.read(|s| s.len()), Err(BridgeError::InvalidArgument(_))));
    }

    #[test]
    fn test_take_rejected_while_pinned() {
        let bound = Bound::detached(5u32);
        let pin = bound.pin().unwrap();
        assert!(bound.take().is_err());
        drop(pin);
        assert_eq!(bound.take().unwrap(), 5);
    }

    #[test]
    fn test_take_if_check_failure_keeps_resource() {
        let bound = Bound::detached(5u32);
        let err = bound
            .take_if(|_| Err(BridgeError::BufferState("locked".into())))
            .unwrap_err();
        assert!(matches!(err, BridgeError::BufferState(_)));
        assert!(!bound.is_empty());
    }

    #[test]
    fn test_detached_has_no_handle() {
        let bound = Bound::detached(1u8);
        assert!(bound.handle().is_none());
        bound.write(|v| *v = 9).unwrap();
        assert_eq!(bound.read(|v| *v).unwrap(), 9);
    }

    #[test]
    fn test_empty_binding() {
        let table = HandleTable::new_shared();
        let bound: Bound<u8> = Bound::empty(&table);
        assert!(bound.is_empty());
        assert!(table.contains(bound.handle()));
        drop(bound);
        assert!(table.is_empty());
    }
}

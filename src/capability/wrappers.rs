// src/capability/wrappers.rs
//! Ownership-qualified wrappers

use crate::capability::tags::{CapabilityTag, Transferable};
use crate::mailbox::EnqueueStatus;
use crate::supervisor::AgentHandle;
use crate::utils::errors::{Result, RuntimeError};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A uniquely owned value
///
/// Not `Clone`: sending one moves it, so the sender's binding is statically
/// unusable afterwards. Only transferable contents make it transferable, so
/// agent-private state cannot be smuggled out:
///
/// ```compile_fail
/// use agent_weave::capability::{Envelope, Isolated, Local};
///
/// let escaped = Isolated::new(Local::new(vec![1u8, 2, 3]));
/// let _ = Envelope::seal(escaped, None);
/// ```
pub struct Isolated<T>(T);

impl<T: Send + 'static> Isolated<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn get(&self) -> &T {
        &self.0
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Isolated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Isolated").field(&self.0).finish()
    }
}

impl<T: Transferable> Transferable for Isolated<T> {
    fn capability(&self) -> CapabilityTag {
        CapabilityTag::Isolated
    }
}

/// A long-lived binding for an isolated value, checked at runtime
///
/// Useful when the value lives in agent state that outlasts a single send.
/// Once [`IsolatedCell::take`] or [`IsolatedCell::send`] hands the value
/// out, every further access fails with [`RuntimeError::ConsumedValueUse`].
pub struct IsolatedCell<T> {
    value: Option<T>,
}

impl<T: Send + 'static> IsolatedCell<T> {
    pub fn new(value: T) -> Self {
        Self { value: Some(value) }
    }

    pub fn get(&self) -> Result<&T> {
        self.value.as_ref().ok_or(RuntimeError::ConsumedValueUse)
    }

    pub fn get_mut(&mut self) -> Result<&mut T> {
        self.value.as_mut().ok_or(RuntimeError::ConsumedValueUse)
    }

    /// Move the value out for sending; the cell is consumed afterwards
    pub fn take(&mut self) -> Result<Isolated<T>> {
        self.value
            .take()
            .map(Isolated::new)
            .ok_or(RuntimeError::ConsumedValueUse)
    }

    /// Put a value back, e.g. after a rejected send returned it
    pub fn restore(&mut self, value: Isolated<T>) {
        self.value = Some(value.into_inner());
    }

    pub fn is_consumed(&self) -> bool {
        self.value.is_none()
    }
}

impl<T: Transferable> IsolatedCell<T> {
    /// Move the value into `to`'s mailbox
    ///
    /// A rejected send puts the value back and reports why; a consumed cell
    /// fails with `ConsumedValueUse` without touching the mailbox.
    pub fn send(&mut self, to: &AgentHandle<Isolated<T>>) -> Result<EnqueueStatus> {
        let value = self.take()?;
        to.signal(value).map_err(|rejected| {
            let err = rejected.error();
            self.restore(rejected.into_inner());
            err
        })
    }
}

impl<T> fmt::Debug for IsolatedCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedCell")
            .field("consumed", &self.value.is_none())
            .finish()
    }
}

/// Read-only, reference-counted value
pub struct Shared<T: ?Sized>(Arc<T>);

impl<T: Send + Sync + 'static> Shared<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl<T: ?Sized> Shared<T> {
    /// Current number of live references
    pub fn ref_count(this: &Self) -> usize {
        Arc::strong_count(&this.0)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&&*self.0).finish()
    }
}

impl<T: Transferable + Sync> Transferable for Shared<T> {
    fn capability(&self) -> CapabilityTag {
        CapabilityTag::ImmutableShared
    }
}

/// Agent-private mutable state
///
/// Moves with its agent when the agent migrates between workers, but does not
/// implement [`Transferable`], so it cannot be placed in a message.
#[derive(Debug, Default)]
pub struct Local<T>(T);

impl<T> Local<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Local<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Local<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// A value whose tag is only known at runtime
///
/// Sealing a `Tagged` value marked [`CapabilityTag::MutableLocal`] into an
/// envelope fails with [`RuntimeError::CapabilityViolation`]. The wrapped
/// value must itself be transferable; relabeling cannot free a [`Local`]:
///
/// ```compile_fail
/// use agent_weave::capability::{CapabilityTag, Envelope, Local, Tagged};
///
/// let relabeled = Tagged::new(CapabilityTag::Isolated, Local::new(5u32));
/// let _ = Envelope::seal(relabeled, None);
/// ```
#[derive(Debug, Clone)]
pub struct Tagged<T> {
    tag: CapabilityTag,
    value: T,
}

impl<T: Send + 'static> Tagged<T> {
    pub fn new(tag: CapabilityTag, value: T) -> Self {
        Self { tag, value }
    }

    pub fn tag(&self) -> CapabilityTag {
        self.tag
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Transferable> Transferable for Tagged<T> {
    fn capability(&self) -> CapabilityTag {
        self.tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolated_cell_consumed_after_take() {
        let mut cell = IsolatedCell::new(vec![1u8, 2, 3]);
        assert_eq!(cell.get().unwrap(), &vec![1, 2, 3]);

        let sent = cell.take().unwrap();
        assert_eq!(sent.into_inner(), vec![1, 2, 3]);

        assert!(cell.is_consumed());
        assert_eq!(cell.get().unwrap_err(), RuntimeError::ConsumedValueUse);
        assert_eq!(cell.get_mut().unwrap_err(), RuntimeError::ConsumedValueUse);
        assert_eq!(cell.take().unwrap_err(), RuntimeError::ConsumedValueUse);
    }

    #[test]
    fn test_isolated_cell_restore() {
        let mut cell = IsolatedCell::new(String::from("job"));
        let value = cell.take().unwrap();
        cell.restore(value);
        assert!(!cell.is_consumed());
        assert_eq!(cell.get().unwrap(), "job");
    }

    #[test]
    fn test_shared_ref_counting() {
        let shared = Shared::new(String::from("config"));
        assert_eq!(Shared::ref_count(&shared), 1);

        let copy = shared.clone();
        assert_eq!(Shared::ref_count(&shared), 2);
        assert!(Shared::ptr_eq(&shared, &copy));
        assert_eq!(&*copy, "config");

        drop(copy);
        assert_eq!(Shared::ref_count(&shared), 1);
    }

    #[test]
    fn test_wrapper_tags() {
        assert_eq!(Isolated::new(1u32).capability(), CapabilityTag::Isolated);
        assert_eq!(
            Shared::new(1u32).capability(),
            CapabilityTag::ImmutableShared
        );
        assert_eq!(
            Tagged::new(CapabilityTag::MutableLocal, 1u32).capability(),
            CapabilityTag::MutableLocal
        );
    }

    #[test]
    fn test_local_is_mutable_in_place() {
        let mut counter = Local::new(0u64);
        *counter += 5;
        assert_eq!(*counter, 5);
    }
}

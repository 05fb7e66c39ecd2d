//! The handle table: allocation, lookup, and reset ("epoch") semantics.
//!
//! `Handle<K>` generalizes the teacher's `FromPool<T>`
//! (`Noratrieb-coldsquare/src/parse/model/cp_info.rs`): a transparent,
//! phantom-typed integer index. Where `FromPool<T>` indexes a flat `Vec`
//! by `n - 1`, `Handle<K>` is resolved against a [`HandleTable`] that
//! supports rebind detection and epoch resets, per `spec.md` §3/§4.3.

use std::collections::HashMap;
use std::marker::PhantomData;

use tracing::trace;

use crate::content::Content;
use crate::error::{DecodeError, DecodeResult};

/// The first handle value assigned in any epoch (`spec.md` §6).
pub const BASE_WIRE_HANDLE: i32 = 0x7E_0000;

/// A protocol-assigned handle, phantom-typed by the kind of [`Content`] it
/// is expected to resolve to. `K` is almost always [`Content`] itself;
/// narrower phantom types are used where a position in the grammar only
/// ever accepts one `Content` variant (e.g. a string-producing tag).
#[repr(transparent)]
pub struct Handle<K = Content> {
    value: i32,
    _marker: PhantomData<fn() -> K>,
}

impl<K> Handle<K> {
    pub fn value(self) -> i32 {
        self.value
    }
}

impl<K> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K> Copy for Handle<K> {}
impl<K> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}
impl<K> Eq for Handle<K> {}
impl<K> std::hash::Hash for Handle<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}
impl<K> std::fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({:#x})", self.value)
    }
}

impl<K> From<i32> for Handle<K> {
    fn from(value: i32) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }
}

/// One epoch's worth of handle bindings: the span between two resets (or
/// between start/first-reset or last-reset/end).
pub type Epoch = HashMap<i32, Content>;

/// The live handle table plus the append-only list of archived epochs
/// (`spec.md` §3 Lifecycle, §4.3).
pub struct HandleTable {
    counter: i32,
    active: Epoch,
    archived: Vec<Epoch>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            counter: BASE_WIRE_HANDLE,
            active: HashMap::new(),
            archived: Vec::new(),
        }
    }

    /// Returns the next handle and increments the counter.
    pub fn alloc<K>(&mut self) -> Handle<K> {
        let h = self.counter;
        self.counter += 1;
        trace!(handle = format!("{h:#x}"), "handle allocated");
        Handle::from(h)
    }

    /// Binds `handle` to `content`. Fails if `handle` is already bound
    /// within the current epoch (`spec.md` §3 Invariants: "No handle is
    /// ever rebound within a single epoch").
    pub fn bind<K>(&mut self, handle: Handle<K>, content: Content, offset: u64) -> DecodeResult<()> {
        if self.active.contains_key(&handle.value) {
            return Err(DecodeError::validity(
                offset,
                "a handle not already bound in this epoch",
                format!("{:#x}", handle.value),
            ));
        }
        self.active.insert(handle.value, content);
        Ok(())
    }

    /// Resolves `handle` against the active epoch only (`spec.md`
    /// Invariants: "TC_REFERENCE resolves only against the current
    /// epoch's table").
    pub fn resolve<K>(&self, handle: Handle<K>, offset: u64) -> DecodeResult<&Content> {
        self.active.get(&handle.value).ok_or_else(|| {
            DecodeError::validity(
                offset,
                "a handle bound in the current epoch",
                format!("{:#x}", handle.value),
            )
        })
    }

    pub fn resolve_mut<K>(&mut self, handle: Handle<K>, offset: u64) -> DecodeResult<&mut Content> {
        self.active.get_mut(&handle.value).ok_or_else(|| {
            DecodeError::validity(
                offset,
                "a handle bound in the current epoch",
                format!("{:#x}", handle.value),
            )
        })
    }

    /// Archives the current epoch (if non-empty) and restarts the counter
    /// at [`BASE_WIRE_HANDLE`] (`spec.md` §4.3, `TC_RESET`).
    pub fn reset(&mut self) {
        if !self.active.is_empty() {
            let finished = std::mem::take(&mut self.active);
            self.archived.push(finished);
        }
        self.counter = BASE_WIRE_HANDLE;
    }

    /// Archives any remaining bindings. Called once at end of stream.
    pub fn finish(mut self) -> Vec<Epoch> {
        if !self.active.is_empty() {
            self.archived.push(self.active);
        }
        self.archived
    }

    pub fn active(&self) -> &Epoch {
        &self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Content, ContentData};

    fn dummy() -> Content {
        Content {
            handle: None,
            is_exception: false,
            data: ContentData::BlockData(vec![]),
        }
    }

    #[test]
    fn handles_start_at_base_and_increment() {
        let mut table = HandleTable::new();
        let h0: Handle = table.alloc();
        let h1: Handle = table.alloc();
        assert_eq!(h0.value(), BASE_WIRE_HANDLE);
        assert_eq!(h1.value(), BASE_WIRE_HANDLE + 1);
    }

    #[test]
    fn rebind_within_epoch_fails() {
        let mut table = HandleTable::new();
        let h: Handle = table.alloc();
        table.bind(h, dummy(), 0).unwrap();
        assert!(table.bind(h, dummy(), 0).is_err());
    }

    #[test]
    fn reset_archives_and_restarts_counter() {
        let mut table = HandleTable::new();
        let h: Handle = table.alloc();
        table.bind(h, dummy(), 0).unwrap();
        table.reset();
        let h2: Handle = table.alloc();
        assert_eq!(h2.value(), BASE_WIRE_HANDLE);
        let epochs = table.finish();
        assert_eq!(epochs.len(), 1);
    }

    #[test]
    fn reset_on_empty_epoch_archives_nothing() {
        let mut table = HandleTable::new();
        table.reset();
        let epochs = table.finish();
        assert!(epochs.is_empty());
    }

    #[test]
    fn unresolved_handle_fails() {
        let table = HandleTable::new();
        let h: Handle = Handle::from(BASE_WIRE_HANDLE);
        assert!(table.resolve(h, 0).is_err());
    }
}

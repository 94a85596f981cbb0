use std::marker::PhantomData;
use std::ptr::NonNull;

use super::{Gid, WorkerId};

const TYPE_MASK_SIZE: u64 = 1;
const TYPE_MASK: u64 = (1 << TYPE_MASK_SIZE) - 1;
const LOCAL: u64 = 0;
const REMOTE: u64 = 1;

/// Bits a remote address reserves for the worker id.
pub const WORKER_ID_SIZE: u64 = 10;

/// The largest global id a remote address can carry.
pub const MAX_GLOBAL_ID: u64 = (1 << (64 - TYPE_MASK_SIZE - WORKER_ID_SIZE)) - 1;

/// Tracks a vertex or edge location that is either local or remote. A remote
/// address is a global id alongside the id of the worker currently storing
/// the record, while a local address is simply a pointer in the current
/// process. Both are stored in the same word, so an `Address` always takes
/// exactly as much memory as a pointer.
///
/// The layout, low bits first:
///  - the lowest bit stores 0 if the address is local and 1 if it is remote
///  - a local address stores the pointer in all 64 bits, which works because
///    records are heap-allocated with an alignment that keeps the low bit 0
///  - a remote address stores the worker id in the following
///    [`WORKER_ID_SIZE`] bits and the global id in the remaining high bits
pub struct Address<T> {
    storage: u64,
    _object: PhantomData<fn(T)>,
}

impl<T> Address<T> {
    /// A local address. The pointer must have the type mask bit free;
    /// violating that is a fatal encoding error, not a recoverable one.
    pub fn new_local(ptr: NonNull<T>) -> Self {
        let raw = ptr.as_ptr() as u64;
        assert_eq!(raw & TYPE_MASK, LOCAL, "pointer has the type mask bit set");
        Address { storage: raw, _object: PhantomData }
    }

    /// A remote address of record `global_id`, stored on worker `worker_id`.
    pub fn new_remote(global_id: Gid, worker_id: WorkerId) -> Self {
        assert!(global_id <= MAX_GLOBAL_ID, "too large global id");
        assert!((worker_id as u64) < (1 << WORKER_ID_SIZE), "too large worker id");

        let mut storage = REMOTE;
        storage |= (worker_id as u64) << TYPE_MASK_SIZE;
        storage |= global_id << (TYPE_MASK_SIZE + WORKER_ID_SIZE);
        Address { storage, _object: PhantomData }
    }

    pub fn is_local(&self) -> bool {
        self.storage & TYPE_MASK == LOCAL
    }

    pub fn is_remote(&self) -> bool {
        self.storage & TYPE_MASK == REMOTE
    }

    /// The pointer of a local address.
    pub fn local(&self) -> NonNull<T> {
        assert!(self.is_local(), "attempting to get local pointer from remote address");
        NonNull::new(self.storage as *mut T).expect("local address is null")
    }

    /// The global id of a remote address.
    pub fn global_id(&self) -> Gid {
        debug_assert!(self.is_remote(), "attempting to get global id from local address");
        self.storage >> (TYPE_MASK_SIZE + WORKER_ID_SIZE)
    }

    /// The worker storing the record of a remote address.
    pub fn worker_id(&self) -> WorkerId {
        debug_assert!(self.is_remote(), "attempting to get worker id from local address");
        ((self.storage >> TYPE_MASK_SIZE) & ((1 << WORKER_ID_SIZE) - 1)) as WorkerId
    }
}

// The derives would put bounds on T; equality and identity are bitwise over
// the one-word storage regardless of the record type.

impl<T> Clone for Address<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Address<T> {}

impl<T> PartialEq for Address<T> {
    fn eq(&self, other: &Self) -> bool {
        self.storage == other.storage
    }
}

impl<T> Eq for Address<T> {}

impl<T> std::hash::Hash for Address<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.storage.hash(state);
    }
}

impl<T> std::fmt::Debug for Address<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_local() {
            write!(f, "Address::Local({:#x})", self.storage)
        } else {
            write!(f, "Address::Remote({}@{})", self.global_id(), self.worker_id())
        }
    }
}

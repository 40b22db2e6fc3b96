//! Process-wide thread registry with generation-tagged handles.
//!
//! A [`ThreadRegistry`] is an explicit object, normally a `static`, that
//! hands each participating thread a [`ThreadHandle`]. Robust mutexes
//! record the owner's handle and ask the registry whether it is still alive.
//!
//! Slots live in a fixed arena. Released slots go onto a free-index stack
//! and every allocation or release bumps the slot's generation, so a handle
//! from a finished thread never validates against a recycled slot.
//!
//! # Initialization and teardown
//!
//! * The registry is built by a `const fn` and must outlive every thread
//!   that registers with it, which the `&'static self` receivers enforce.
//! * A thread registers lazily, on its first call to
//!   [`ThreadRegistry::register`] (robust mutexes call it for you).
//! * A thread's membership is released by a thread-local destructor when
//!   the thread exits. Threads killed without running their thread-local
//!   destructors (including the main thread at process exit) stay live.
//!
//! # Cancellation
//!
//! Each slot carries a cooperative cancellation flag. [`ThreadRegistry::cancel`]
//! raises it; the target thread observes it at the points where it calls
//! [`ThreadRegistry::test_cancel`]. Nothing is interrupted asynchronously.

use core::cell::{RefCell, UnsafeCell};
use core::fmt;
use core::num::NonZeroU32;
use core::ptr;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use crate::error::{Error, Result};
use crate::raw::FastMutex;

/// Number of threads a registry can track at once.
pub const CAPACITY: usize = 1022;

const INDEX_BITS: u32 = 10;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (1 << 20) - 1;

/// Identifies one registered thread for the lifetime of its registration.
///
/// Packs a slot index and the slot's generation into 30 bits, so it fits
/// the owner field of a lock word. The all-ones pattern is never produced.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ThreadHandle(NonZeroU32);

impl ThreadHandle {
    fn new(index: usize, generation: u32) -> ThreadHandle {
        let raw = ((generation & GENERATION_MASK) << INDEX_BITS) | (index as u32 + 1);
        match NonZeroU32::new(raw) {
            Some(raw) => ThreadHandle(raw),
            None => unreachable!("slot numbers start at one"),
        }
    }

    /// The packed representation.
    pub fn into_raw(self) -> u32 {
        self.0.get()
    }

    /// Unpacks a value produced by [`into_raw`](Self::into_raw).
    pub fn from_raw(raw: u32) -> Option<ThreadHandle> {
        let index = raw & INDEX_MASK;
        if index == 0 || index as usize > CAPACITY || raw >> INDEX_BITS > GENERATION_MASK {
            return None;
        }
        NonZeroU32::new(raw).map(ThreadHandle)
    }

    fn index(self) -> usize {
        (self.0.get() & INDEX_MASK) as usize - 1
    }

    fn generation(self) -> u32 {
        self.0.get() >> INDEX_BITS
    }
}

struct Slot {
    /// Odd while a thread holds the slot.
    generation: AtomicU32,
    /// Generation a cancellation was requested for, or 0.
    cancel: AtomicU32,
}

impl Slot {
    const fn new() -> Slot {
        Slot { generation: AtomicU32::new(0), cancel: AtomicU32::new(0) }
    }
}

struct FreeList {
    stack: [u16; CAPACITY],
    len: usize,
    /// Slots at or above this index were never handed out.
    fresh: usize,
}

/// Arena of thread slots. See the [module documentation](self).
pub struct ThreadRegistry {
    lock: FastMutex,
    free: UnsafeCell<FreeList>,
    slots: [Slot; CAPACITY],
    live: AtomicU32,
}

// The free list is only touched with `lock` held; slots are atomics.
unsafe impl Sync for ThreadRegistry {}

impl ThreadRegistry {
    /// An empty registry.
    pub const fn new() -> ThreadRegistry {
        ThreadRegistry {
            lock: FastMutex::new(),
            free: UnsafeCell::new(FreeList { stack: [0; CAPACITY], len: 0, fresh: 0 }),
            slots: [const { Slot::new() }; CAPACITY],
            live: AtomicU32::new(0),
        }
    }

    /// The calling thread's handle, registering it on first use.
    ///
    /// # Errors
    ///
    /// [`Error::Exhausted`] when every slot is taken, and
    /// [`Error::NotFound`] when called from a thread that is already
    /// tearing down its thread-locals.
    pub fn register(&'static self) -> Result<ThreadHandle> {
        MEMBERSHIPS
            .try_with(|memberships| {
                if let Some(handle) = memberships.find(self) {
                    return Ok(handle);
                }
                let handle = self.allocate()?;
                memberships.0.borrow_mut().push((self, handle));
                Ok(handle)
            })
            .unwrap_or(Err(Error::NotFound))
    }

    /// The calling thread's handle, if it is registered.
    pub fn current(&'static self) -> Option<ThreadHandle> {
        MEMBERSHIPS.try_with(|memberships| memberships.find(self)).ok().flatten()
    }

    /// Whether `handle` still belongs to a running, registered thread.
    pub fn is_live(&self, handle: ThreadHandle) -> bool {
        self.slots[handle.index()].generation.load(Acquire) == handle.generation()
    }

    /// Number of registered threads.
    pub fn live_count(&self) -> usize {
        self.live.load(Relaxed) as usize
    }

    /// Asks the thread behind `handle` to stop at its next check point.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the thread is no longer registered.
    pub fn cancel(&self, handle: ThreadHandle) -> Result<()> {
        if !self.is_live(handle) {
            return Err(Error::NotFound);
        }
        // Tagged with the generation so a request racing with the thread's
        // exit cannot hit the slot's next owner.
        self.slots[handle.index()].cancel.store(handle.generation(), Relaxed);
        Ok(())
    }

    /// Cancellation check point for the calling thread.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] once per [`cancel`](Self::cancel) request.
    /// Unregistered threads are never cancelled.
    pub fn test_cancel(&'static self) -> Result<()> {
        match self.current() {
            Some(handle) if self.slots[handle.index()].cancel.swap(0, AcqRel) == handle.generation() => {
                Err(Error::Cancelled)
            }
            _ => Ok(()),
        }
    }

    fn allocate(&self) -> Result<ThreadHandle> {
        self.lock.lock();
        // SAFETY: `lock` is held.
        let free = unsafe { &mut *self.free.get() };
        let index = if free.len > 0 {
            free.len -= 1;
            Some(free.stack[free.len] as usize)
        } else if free.fresh < CAPACITY {
            free.fresh += 1;
            Some(free.fresh - 1)
        } else {
            None
        };
        self.lock.unlock();

        let Some(index) = index else {
            log::warn!("thread registry {:p} is full ({CAPACITY} threads)", self);
            return Err(Error::Exhausted);
        };

        let slot = &self.slots[index];
        // Only this thread touches a slot between popping and publishing it.
        let generation = slot.generation.load(Relaxed).wrapping_add(1) & GENERATION_MASK;
        slot.generation.store(generation, Release);
        self.live.fetch_add(1, Relaxed);
        Ok(ThreadHandle::new(index, generation))
    }

    fn release(&self, handle: ThreadHandle) {
        let slot = &self.slots[handle.index()];
        let next = handle.generation().wrapping_add(1) & GENERATION_MASK;
        slot.generation.store(next, Release);
        self.live.fetch_sub(1, Relaxed);

        self.lock.lock();
        // SAFETY: `lock` is held.
        let free = unsafe { &mut *self.free.get() };
        free.stack[free.len] = handle.index() as u16;
        free.len += 1;
        self.lock.unlock();
    }
}

impl Default for ThreadRegistry {
    fn default() -> ThreadRegistry {
        ThreadRegistry::new()
    }
}

impl fmt::Debug for ThreadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRegistry").field("live", &self.live_count()).finish_non_exhaustive()
    }
}

/// Registries the current thread belongs to.
struct Memberships(RefCell<Vec<(&'static ThreadRegistry, ThreadHandle)>>);

impl Memberships {
    fn find(&self, registry: &'static ThreadRegistry) -> Option<ThreadHandle> {
        self.0
            .borrow()
            .iter()
            .find(|(r, _)| ptr::eq(*r, registry))
            .map(|&(_, handle)| handle)
    }
}

impl Drop for Memberships {
    fn drop(&mut self) {
        for (registry, handle) in self.0.get_mut().drain(..) {
            registry.release(handle);
        }
    }
}

thread_local! {
    static MEMBERSHIPS: Memberships = const { Memberships(RefCell::new(Vec::new())) };
}

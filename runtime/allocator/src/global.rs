//! `GlobalAlloc` adapter
//!
//! Wraps a [`MemoryContext`] in a spin lock so it can serve as the
//! program's `#[global_allocator]`. Allocations come from Main; frees and
//! resizes follow the address to its owning region.
//!
//! ```ignore
//! #[global_allocator]
//! static HEAP: LockedContext = LockedContext::new();
//!
//! fn init(ctx: MemoryContext<'static>) {
//!     // SAFETY: ctx was built by `MemoryContext::bring_up` over raw RAM
//!     unsafe { HEAP.install(ctx) };
//! }
//! ```

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use log::warn;
use spin::Mutex;
use zoneheap_platform::memory_map::WORD_ALIGN;
use zoneheap_platform::{BulkCopy, CpuCopy};

use crate::dispatch::MemoryContext;

/// Lock-protected heap usable as a global allocator
///
/// The pointers this adapter returns address bytes that the installed
/// context also reaches through its region slices. The context only touches
/// headers and, during `realloc`, the payload being moved; payload bytes are
/// otherwise left to whoever holds the pointer. See
/// [`install`](Self::install) for what that requires of the heap memory.
pub struct LockedContext<C: BulkCopy + Send = CpuCopy> {
    inner: Mutex<Option<MemoryContext<'static, C>>>,
}

impl<C: BulkCopy + Send> LockedContext<C> {
    /// Empty adapter; every allocation fails until [`install`](Self::install)
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Hand the heap to the adapter, returning any previous one
    ///
    /// # Safety
    /// - Every region of `ctx` must be a raw span of RAM, as built by
    ///   [`RegionManager::from_region`](crate::RegionManager::from_region) or
    ///   [`MemoryContext::bring_up`], and not memory owned by a Rust object
    ///   that is otherwise still used
    /// - Nothing may reach the regions except through the pointers handed
    ///   out by this adapter
    /// - Payload references obtained through [`with`](Self::with) must not
    ///   be held across an allocator call
    pub unsafe fn install(&self, ctx: MemoryContext<'static, C>) -> Option<MemoryContext<'static, C>> {
        self.inner.lock().replace(ctx)
    }

    pub fn is_installed(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Run `f` against the installed heap
    pub fn with<R>(&self, f: impl FnOnce(&mut MemoryContext<'static, C>) -> R) -> Option<R> {
        self.inner.lock().as_mut().map(f)
    }
}

impl<C: BulkCopy + Send> Default for LockedContext<C> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<C: BulkCopy + Send> GlobalAlloc for LockedContext<C> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > WORD_ALIGN {
            warn!("alloc: alignment {} not supported", layout.align());
            return ptr::null_mut();
        }
        self.with(|ctx| ctx.malloc(layout.size()))
            .flatten()
            .map_or(ptr::null_mut(), |address| address as *mut u8)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.with(|ctx| ctx.free(ptr as usize));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > WORD_ALIGN {
            return ptr::null_mut();
        }
        self.with(|ctx| ctx.realloc(Some(ptr as usize), new_size))
            .flatten()
            .map_or(ptr::null_mut(), |address| address as *mut u8)
    }
}

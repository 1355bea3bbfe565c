//! Bulk memory copy
//!
//! The heap relocates payloads during a growing reallocation through an
//! external copy engine. On the target that is a DMA channel; on the host it
//! is a plain CPU copy. The heap always calls [`BulkCopy::wait`] before it
//! touches either buffer again.

/// Synchronous bulk copy primitive
pub trait BulkCopy {
    /// Start copying `src` into `dst`; both slices have the same length and
    /// never overlap
    fn copy(&mut self, dst: &mut [u8], src: &[u8]);

    /// Block until the last copy is fully visible in memory
    fn wait(&mut self);
}

impl<C: BulkCopy + ?Sized> BulkCopy for &mut C {
    fn copy(&mut self, dst: &mut [u8], src: &[u8]) {
        (**self).copy(dst, src)
    }

    fn wait(&mut self) {
        (**self).wait()
    }
}

/// CPU copy, complete as soon as [`BulkCopy::copy`] returns
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuCopy;

impl BulkCopy for CpuCopy {
    fn copy(&mut self, dst: &mut [u8], src: &[u8]) {
        let len = dst.len().min(src.len());
        dst[..len].copy_from_slice(&src[..len]);
    }

    fn wait(&mut self) {}
}

use crate::config::{BLOCK_SIZE, DMA_ALIGN};

/// One block of DMA-safe scratch for callers whose buffers are not aligned.
#[repr(C, align(4))]
pub(crate) struct StagingBlock([u8; BLOCK_SIZE]);

const _: () = assert!(core::mem::align_of::<StagingBlock>() >= DMA_ALIGN);

impl StagingBlock {
    pub(crate) const fn new() -> Self {
        Self([0; BLOCK_SIZE])
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

pub(crate) fn is_dma_aligned(buffer: &[u8]) -> bool {
    buffer.as_ptr() as usize % DMA_ALIGN == 0
}

pub(crate) fn block_range(index: u16) -> core::ops::Range<usize> {
    let start = index as usize * BLOCK_SIZE;
    start..start + BLOCK_SIZE
}

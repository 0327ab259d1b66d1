use crate::host::{BusWidth, ClockEdge};

pub const BLOCK_SIZE: usize = 512;
/// DMA engines on the supported hosts need word-aligned buffers.
pub const DMA_ALIGN: usize = 4;

pub const SDIO_READY_TIMEOUT_MS: u64 = 1_000;
pub const SDIO_READY_POLL_MS: u64 = 1;
pub const SDIO_BLOCK_TIMEOUT_MS: u64 = 250;
pub const SDIO_CLOCK_DIV: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Divider applied to the host source clock once the card is identified.
    pub clock_div: u8,
    pub clock_edge: ClockEdge,
    /// Width negotiated after identification; identification always runs 1-bit.
    pub bus_width: BusWidth,
    pub ready_timeout_ms: u64,
    pub ready_poll_ms: u64,
    /// Completion timeout for one block; whole-run DMA scales it by block count.
    pub block_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clock_div: SDIO_CLOCK_DIV,
            clock_edge: ClockEdge::Rising,
            bus_width: BusWidth::Four,
            ready_timeout_ms: SDIO_READY_TIMEOUT_MS,
            ready_poll_ms: SDIO_READY_POLL_MS,
            block_timeout_ms: SDIO_BLOCK_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    pub(crate) fn transfer_timeout_ms(&self, count: u16) -> u64 {
        self.block_timeout_ms.saturating_mul(count as u64)
    }
}

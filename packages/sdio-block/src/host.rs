use crate::{card::CardInfo, config::BLOCK_SIZE, error::HostError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusWidth {
    One,
    Four,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockEdge {
    Rising,
    Falling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusConfig {
    pub width: BusWidth,
    pub clock_edge: ClockEdge,
    pub clock_div: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Card to memory.
    Rx,
    /// Memory to card.
    Tx,
}

impl Direction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Rx => "rx",
            Self::Tx => "tx",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub addr: u32,
    pub count: u16,
    pub direction: Direction,
}

impl TransferRequest {
    pub const fn new(addr: u32, count: u16, direction: Direction) -> Self {
        Self {
            addr,
            count,
            direction,
        }
    }

    pub const fn byte_len(&self) -> usize {
        self.count as usize * BLOCK_SIZE
    }
}

/// Current state field of the R1 card status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardState {
    Idle,
    Ready,
    Identification,
    Standby,
    Transfer,
    Sending,
    Receiving,
    Programming,
    Disconnected,
    Unknown(u8),
}

/// Hardware SD host as seen by the block engine.
///
/// Implementations own the peripheral, its pins and DMA channels. Completion
/// and error interrupts must end each issued transfer with exactly one call
/// to [`TransferSignals::complete`](crate::TransferSignals::complete) or
/// [`TransferSignals::fail`](crate::TransferSignals::fail) and must not
/// block.
pub trait SdioHost {
    /// Enables clocks, routes the CMD/CLK/DAT pins and prepares DMA.
    fn power_up(&mut self) -> Result<(), HostError>;

    fn power_down(&mut self) -> Result<(), HostError>;

    /// Runs card identification with the given bus settings.
    fn init_card(&mut self, bus: BusConfig) -> Result<(), HostError>;

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), HostError>;

    fn attach_interrupts(&mut self) -> Result<(), HostError>;

    fn detach_interrupts(&mut self);

    fn card_state(&mut self) -> Result<CardState, HostError>;

    fn card_info(&mut self) -> Result<CardInfo, HostError>;

    /// Starts a DMA read of `request.count` blocks into `buffer`.
    ///
    /// # Safety
    ///
    /// `buffer` must be valid for `request.byte_len()` writes, aligned to
    /// [`DMA_ALIGN`](crate::config::DMA_ALIGN), and stay valid until the
    /// transfer is signalled or [`SdioHost::abort_transfer`] returns.
    unsafe fn start_read(
        &mut self,
        request: TransferRequest,
        buffer: *mut u8,
    ) -> Result<(), HostError>;

    /// Starts a DMA write of `request.count` blocks from `buffer`.
    ///
    /// # Safety
    ///
    /// Same contract as [`SdioHost::start_read`], for reads of `buffer`.
    unsafe fn start_write(
        &mut self,
        request: TransferRequest,
        buffer: *const u8,
    ) -> Result<(), HostError>;

    /// Stops an in-flight transfer; the DMA engine must not touch the buffer
    /// after this returns.
    fn abort_transfer(&mut self) -> Result<(), HostError>;

    /// Erases blocks `start..=end`.
    fn erase(&mut self, start: u32, end: u32) -> Result<(), HostError>;
}

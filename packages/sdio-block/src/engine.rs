use core::marker::PhantomData;

use embassy_futures::select::{select, Either};

use crate::{
    card::CardInfo,
    clock::{elapsed_ms, Clock},
    config::{EngineConfig, BLOCK_SIZE},
    error::{BlockError, HostError},
    host::{BusConfig, BusWidth, CardState, Direction, SdioHost, TransferRequest},
    signal::{TransferEvent, TransferSignals},
};

mod staging;
#[cfg(test)]
mod tests;

use staging::{block_range, is_dma_aligned, StagingBlock};

/// Bus settings and geometry of the card the engine brought up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardHandle {
    pub bus: BusConfig,
    pub info: CardInfo,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub transfers: u32,
    pub staged_blocks: u32,
    pub ready_timeouts: u32,
    pub transfer_timeouts: u32,
    pub host_errors: u32,
}

/// Block-addressed access to an SD card behind an [`SdioHost`].
///
/// The engine does not queue concurrent callers; share it behind a mutex
/// when more than one task needs it.
pub struct BlockEngine<'s, H, C> {
    host: H,
    clock: C,
    signals: &'s TransferSignals,
    config: EngineConfig,
    handle: Option<CardHandle>,
    last_error: u32,
    stats: EngineStats,
}

impl<'s, H, C> BlockEngine<'s, H, C>
where
    H: SdioHost,
    C: Clock,
{
    pub fn new(host: H, clock: C, signals: &'s TransferSignals, config: EngineConfig) -> Self {
        Self {
            host,
            clock,
            signals,
            config,
            handle: None,
            last_error: 0,
            stats: EngineStats::default(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&CardHandle> {
        self.handle.as_ref()
    }

    pub fn geometry(&self) -> Option<CardInfo> {
        self.handle.map(|handle| handle.info)
    }

    /// Raw host flags of the most recent hardware failure.
    pub fn last_error(&self) -> u32 {
        self.last_error
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn init(&mut self) -> Result<(), BlockError> {
        if self.handle.is_some() {
            return Ok(());
        }

        self.signals.clear_all();
        let bus = BusConfig {
            width: BusWidth::One,
            clock_edge: self.config.clock_edge,
            clock_div: self.config.clock_div,
        };
        match self.bring_up(bus) {
            Ok(handle) => {
                log::info!(
                    "sdio: init ok blocks={} block_size={} bus_4bit={} high_capacity={}",
                    handle.info.block_count,
                    handle.info.block_size,
                    matches!(handle.bus.width, BusWidth::Four) as u8,
                    handle.info.high_capacity as u8
                );
                self.handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                let kind = self.record(err);
                self.host.detach_interrupts();
                if let Err(off_err) = self.host.power_down() {
                    log::warn!("sdio: power_down_after_init_failed code=0x{:08x}", off_err.flags());
                }
                self.signals.clear_all();
                log::warn!("sdio: init_failed kind={}", kind.label());
                Err(kind)
            }
        }
    }

    fn bring_up(&mut self, bus: BusConfig) -> Result<CardHandle, HostError> {
        self.host.power_up()?;
        self.host.init_card(bus)?;
        let mut bus = bus;
        if self.config.bus_width != BusWidth::One {
            self.host.set_bus_width(self.config.bus_width)?;
            bus.width = self.config.bus_width;
        }
        self.host.attach_interrupts()?;
        let info = self.host.card_info()?;
        Ok(CardHandle { bus, info })
    }

    pub fn deinit(&mut self) -> Result<(), BlockError> {
        if self.handle.take().is_none() {
            return Ok(());
        }
        self.host.detach_interrupts();
        self.signals.clear_all();
        match self.host.power_down() {
            Ok(()) => {
                log::info!("sdio: deinit ok");
                Ok(())
            }
            Err(err) => Err(self.record(err)),
        }
    }

    pub fn set_power(&mut self, on: bool) -> Result<(), BlockError> {
        if on {
            self.init()
        } else {
            self.deinit()
        }
    }

    pub async fn read_blocks(
        &mut self,
        addr: u32,
        count: u16,
        dst: &mut [u8],
    ) -> Result<(), BlockError> {
        self.check_request(addr, count, dst.len())?;
        self.wait_ready().await?;

        if is_dma_aligned(dst) {
            let request = TransferRequest::new(addr, count, Direction::Rx);
            let timeout_ms = self.config.transfer_timeout_ms(count);
            let run = &mut dst[..request.byte_len()];
            return self
                .transfer(request, DmaBuffer::Read(run), timeout_ms)
                .await;
        }

        let mut staging = StagingBlock::new();
        for index in 0..count {
            if index > 0 {
                self.wait_ready().await?;
            }
            let request = TransferRequest::new(addr + index as u32, 1, Direction::Rx);
            let timeout_ms = self.config.block_timeout_ms;
            self.transfer(request, DmaBuffer::Read(staging.as_mut_slice()), timeout_ms)
                .await?;
            dst[block_range(index)].copy_from_slice(staging.as_slice());
            self.stats.staged_blocks = self.stats.staged_blocks.wrapping_add(1);
        }
        Ok(())
    }

    pub async fn write_blocks(
        &mut self,
        addr: u32,
        count: u16,
        src: &[u8],
    ) -> Result<(), BlockError> {
        self.check_request(addr, count, src.len())?;
        self.wait_ready().await?;

        if is_dma_aligned(src) {
            let request = TransferRequest::new(addr, count, Direction::Tx);
            let timeout_ms = self.config.transfer_timeout_ms(count);
            let run = &src[..request.byte_len()];
            return self
                .transfer(request, DmaBuffer::Write(run), timeout_ms)
                .await;
        }

        let mut staging = StagingBlock::new();
        for index in 0..count {
            if index > 0 {
                self.wait_ready().await?;
            }
            staging
                .as_mut_slice()
                .copy_from_slice(&src[block_range(index)]);
            let request = TransferRequest::new(addr + index as u32, 1, Direction::Tx);
            let timeout_ms = self.config.block_timeout_ms;
            self.transfer(request, DmaBuffer::Write(staging.as_slice()), timeout_ms)
                .await?;
            self.stats.staged_blocks = self.stats.staged_blocks.wrapping_add(1);
        }
        Ok(())
    }

    pub async fn erase_blocks(&mut self, addr: u32, count: u16) -> Result<(), BlockError> {
        if count == 0 {
            return Err(BlockError::InvalidParameter);
        }
        self.check_range(addr, count)?;
        self.wait_ready().await?;

        let end = addr + (count as u32 - 1);
        match self.host.erase(addr, end) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.record(err)),
        }
    }

    /// Card size in bytes, or `0` when the card cannot be queried.
    pub fn capacity(&mut self) -> u64 {
        match self.host.card_info() {
            Ok(info) => info.capacity_bytes(),
            Err(err) => {
                self.record(err);
                0
            }
        }
    }

    fn check_request(&self, addr: u32, count: u16, buffer_len: usize) -> Result<(), BlockError> {
        if count == 0 || buffer_len < count as usize * BLOCK_SIZE {
            log::debug!(
                "sdio: rejected addr={} count={} buffer_len={}",
                addr,
                count,
                buffer_len
            );
            return Err(BlockError::InvalidParameter);
        }
        self.check_range(addr, count)
    }

    fn check_range(&self, addr: u32, count: u16) -> Result<(), BlockError> {
        let handle = self.handle.as_ref().ok_or(BlockError::NotReady)?;
        if addr as u64 + count as u64 > handle.info.block_count as u64 {
            return Err(BlockError::InvalidParameter);
        }
        Ok(())
    }

    async fn wait_ready(&mut self) -> Result<(), BlockError> {
        let started_ms = self.clock.now_ms();
        loop {
            match self.host.card_state() {
                Ok(CardState::Transfer) => return Ok(()),
                Ok(_) => {}
                Err(err) => return Err(self.record(err)),
            }
            let waited_ms = elapsed_ms(&self.clock, started_ms);
            if waited_ms >= self.config.ready_timeout_ms {
                self.stats.ready_timeouts = self.stats.ready_timeouts.wrapping_add(1);
                log::warn!("sdio: ready_timeout waited_ms={}", waited_ms);
                return Err(BlockError::Timeout);
            }
            self.clock.sleep_ms(self.config.ready_poll_ms).await;
        }
    }

    async fn transfer(
        &mut self,
        request: TransferRequest,
        buffer: DmaBuffer<'_>,
        timeout_ms: u64,
    ) -> Result<(), BlockError> {
        self.stats.transfers = self.stats.transfers.wrapping_add(1);
        let outcome = run_transfer(
            &mut self.host,
            &self.clock,
            self.signals,
            request,
            buffer,
            timeout_ms,
        )
        .await;
        match outcome {
            Ok(()) => Ok(()),
            Err(TransferFailure::Host(err)) => Err(self.record(err)),
            Err(TransferFailure::TimedOut) => {
                self.stats.transfer_timeouts = self.stats.transfer_timeouts.wrapping_add(1);
                log::warn!(
                    "sdio: transfer_timeout dir={} addr={} count={} timeout_ms={}",
                    request.direction.label(),
                    request.addr,
                    request.count,
                    timeout_ms
                );
                Err(BlockError::Timeout)
            }
        }
    }

    fn record(&mut self, err: HostError) -> BlockError {
        let kind = err.kind();
        self.last_error = err.flags();
        self.stats.host_errors = self.stats.host_errors.wrapping_add(1);
        log::warn!(
            "sdio: host_error code=0x{:08x} kind={}",
            err.flags(),
            kind.label()
        );
        kind
    }
}

enum DmaBuffer<'b> {
    Read(&'b mut [u8]),
    Write(&'b [u8]),
}

enum TransferFailure {
    Host(HostError),
    TimedOut,
}

/// Keeps the caller's buffer borrowed while DMA may still touch it and
/// aborts the transfer if dropped before completion was observed.
struct InFlight<'h, 'b, H: SdioHost> {
    host: &'h mut H,
    armed: bool,
    _buffer: PhantomData<&'b mut [u8]>,
}

impl<'h, 'b, H: SdioHost> InFlight<'h, 'b, H> {
    fn start(
        host: &'h mut H,
        request: TransferRequest,
        buffer: DmaBuffer<'b>,
    ) -> Result<Self, HostError> {
        // SAFETY: the borrow of `buffer` lives as long as the guard, and the
        // guard aborts the transfer before that borrow can end early.
        unsafe {
            match buffer {
                DmaBuffer::Read(buf) => host.start_read(request, buf.as_mut_ptr())?,
                DmaBuffer::Write(buf) => host.start_write(request, buf.as_ptr())?,
            }
        }
        Ok(Self {
            host,
            armed: true,
            _buffer: PhantomData,
        })
    }

    fn finish(mut self) {
        self.armed = false;
    }
}

impl<H: SdioHost> Drop for InFlight<'_, '_, H> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.host.abort_transfer() {
            log::warn!("sdio: abort_failed code=0x{:08x}", err.flags());
        }
    }
}

async fn run_transfer<H: SdioHost, C: Clock>(
    host: &mut H,
    clock: &C,
    signals: &TransferSignals,
    request: TransferRequest,
    buffer: DmaBuffer<'_>,
    timeout_ms: u64,
) -> Result<(), TransferFailure> {
    let direction = request.direction;
    // A completion left over from an aborted transfer must not satisfy this one.
    signals.clear(direction);
    let in_flight = InFlight::start(host, request, buffer).map_err(TransferFailure::Host)?;

    match select(signals.wait(direction), clock.sleep_ms(timeout_ms)).await {
        Either::First(TransferEvent::Complete) => {
            in_flight.finish();
            Ok(())
        }
        Either::First(TransferEvent::Failed(code)) => {
            in_flight.finish();
            Err(TransferFailure::Host(HostError::new(code)))
        }
        Either::Second(()) => {
            drop(in_flight);
            Err(TransferFailure::TimedOut)
        }
    }
}

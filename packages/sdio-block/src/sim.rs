//! RAM-backed SD host and a manual clock for host-side tests.

use core::cell::Cell;

use embassy_futures::yield_now;
use heapless::Vec;

use crate::{
    card::CardInfo,
    clock::Clock,
    config::BLOCK_SIZE,
    error::{flags, HostError},
    host::{BusConfig, BusWidth, CardState, Direction, SdioHost, TransferRequest},
    signal::{TransferEvent, TransferSignals},
};

pub const SIM_LOG_MAX: usize = 64;

/// Clock whose sleeps return immediately after advancing time.
#[derive(Debug, Default)]
pub struct SimClock {
    now_ms: Cell<u64>,
    sleeps: Cell<u32>,
}

impl SimClock {
    pub const fn new() -> Self {
        Self {
            now_ms: Cell::new(0),
            sleeps: Cell::new(0),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get().saturating_add(ms));
    }

    pub fn sleeps(&self) -> u32 {
        self.sleeps.get()
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    async fn sleep_ms(&self, ms: u64) {
        self.sleeps.set(self.sleeps.get().saturating_add(1));
        self.advance(ms);
    }
}

/// Completion interrupt raised a fixed delay after the transfer started.
///
/// Hand it to the engine as its clock: the event is raised from inside the
/// engine's timeout sleep, so the engine is already parked in its completion
/// wait when it lands. An event due at or after the sleep's deadline stays
/// pending and loses the race to the timeout.
pub struct SimInterrupt<'s> {
    clock: &'s SimClock,
    signals: &'s TransferSignals,
    delay_ms: u64,
    pending: Cell<Option<(u64, Direction, TransferEvent)>>,
    raised: Cell<u32>,
}

impl<'s> SimInterrupt<'s> {
    pub const fn new(clock: &'s SimClock, signals: &'s TransferSignals, delay_ms: u64) -> Self {
        Self {
            clock,
            signals,
            delay_ms,
            pending: Cell::new(None),
            raised: Cell::new(0),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get().is_some()
    }

    /// Events delivered so far.
    pub fn raised(&self) -> u32 {
        self.raised.get()
    }

    fn schedule(&self, direction: Direction, event: TransferEvent) {
        let due_ms = self.clock.now_ms().saturating_add(self.delay_ms);
        self.pending.set(Some((due_ms, direction, event)));
    }

    fn cancel(&self) {
        self.pending.set(None);
    }
}

impl Clock for SimInterrupt<'_> {
    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    async fn sleep_ms(&self, ms: u64) {
        let now_ms = self.clock.now_ms();
        let wake_ms = now_ms.saturating_add(ms);
        if let Some((due_ms, direction, event)) = self.pending.get() {
            if due_ms < wake_ms {
                self.clock.advance(due_ms - now_ms);
                self.pending.set(None);
                self.raised.set(self.raised.get().saturating_add(1));
                match event {
                    TransferEvent::Complete => self.signals.complete(direction),
                    TransferEvent::Failed(code) => self.signals.fail(direction, code),
                }
                // A waiter selected against this sleep gets polled before it ends.
                yield_now().await;
            }
        }
        let remaining = wake_ms.saturating_sub(self.clock.now_ms());
        self.clock.sleep_ms(remaining).await;
    }
}

/// Simulated card plus host. By default transfers complete synchronously by
/// raising the completion signal from `start_*`; with a [`SimInterrupt`]
/// attached the event arrives later instead.
pub struct SimCard<'s, const BLOCKS: usize> {
    signals: &'s TransferSignals,
    interrupt: Option<&'s SimInterrupt<'s>>,
    storage: [[u8; BLOCK_SIZE]; BLOCKS],
    pub powered: bool,
    pub identified: bool,
    pub interrupts_attached: bool,
    pub bus: Option<BusConfig>,
    /// Remaining `card_state` polls that report `Programming`.
    pub busy_polls: u32,
    /// Busy polls queued after every write.
    pub busy_after_write: u32,
    pub drop_completions: bool,
    pub fail_next_transfer: Option<u32>,
    /// Fails the transfer with this issue index (0-based) with the code.
    pub fail_transfer_at: Option<(usize, u32)>,
    pub erase_error: Option<u32>,
    pub init_error: Option<u32>,
    pub info_error: Option<u32>,
    pub power_down_error: Option<u32>,
    pub transfers: Vec<TransferRequest, SIM_LOG_MAX>,
    pub erases: Vec<(u32, u32), SIM_LOG_MAX>,
    pub aborts: u32,
    pub state_polls: u32,
}

impl<'s, const BLOCKS: usize> SimCard<'s, BLOCKS> {
    pub fn new(signals: &'s TransferSignals) -> Self {
        Self {
            signals,
            interrupt: None,
            storage: [[0; BLOCK_SIZE]; BLOCKS],
            powered: false,
            identified: false,
            interrupts_attached: false,
            bus: None,
            busy_polls: 0,
            busy_after_write: 0,
            drop_completions: false,
            fail_next_transfer: None,
            fail_transfer_at: None,
            erase_error: None,
            init_error: None,
            info_error: None,
            power_down_error: None,
            transfers: Vec::new(),
            erases: Vec::new(),
            aborts: 0,
            state_polls: 0,
        }
    }

    pub fn block(&self, index: usize) -> &[u8; BLOCK_SIZE] {
        &self.storage[index]
    }

    pub fn block_mut(&mut self, index: usize) -> &mut [u8; BLOCK_SIZE] {
        &mut self.storage[index]
    }

    fn check_active(&self) -> Result<(), HostError> {
        if self.powered && self.identified {
            Ok(())
        } else {
            Err(HostError::new(flags::REQUEST_NOT_APPLICABLE))
        }
    }

    fn check_range(&self, start: u32, count: u32) -> Result<(), HostError> {
        if start as usize + count as usize > BLOCKS {
            return Err(HostError::new(flags::ADDR_OUT_OF_RANGE));
        }
        Ok(())
    }

    /// Routes completions through `interrupt` instead of raising them at once.
    pub fn with_interrupt(mut self, interrupt: &'s SimInterrupt<'s>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn record_transfer(&mut self, request: TransferRequest) {
        assert!(
            self.transfers.push(request).is_ok(),
            "sim transfer log holds {} entries",
            SIM_LOG_MAX
        );
    }

    fn finish(&mut self, direction: Direction) {
        let issued = self.transfers.len() - 1;
        let failure = match self.fail_transfer_at {
            Some((index, code)) if index == issued => Some(code),
            _ => self.fail_next_transfer.take(),
        };
        let event = match failure {
            Some(code) => TransferEvent::Failed(code),
            None if self.drop_completions => return,
            None => TransferEvent::Complete,
        };
        if !self.interrupts_attached {
            return;
        }
        match (self.interrupt, event) {
            (Some(interrupt), event) => interrupt.schedule(direction, event),
            (None, TransferEvent::Complete) => self.signals.complete(direction),
            (None, TransferEvent::Failed(code)) => self.signals.fail(direction, code),
        }
    }
}

impl<const BLOCKS: usize> SdioHost for SimCard<'_, BLOCKS> {
    fn power_up(&mut self) -> Result<(), HostError> {
        self.powered = true;
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), HostError> {
        self.powered = false;
        self.identified = false;
        self.bus = None;
        match self.power_down_error {
            Some(code) => Err(HostError::new(code)),
            None => Ok(()),
        }
    }

    fn init_card(&mut self, bus: BusConfig) -> Result<(), HostError> {
        if !self.powered {
            return Err(HostError::new(flags::INVALID_VOLTRANGE));
        }
        if let Some(code) = self.init_error {
            return Err(HostError::new(code));
        }
        self.identified = true;
        self.bus = Some(bus);
        Ok(())
    }

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), HostError> {
        self.check_active()?;
        if let Some(bus) = self.bus.as_mut() {
            bus.width = width;
        }
        Ok(())
    }

    fn attach_interrupts(&mut self) -> Result<(), HostError> {
        self.interrupts_attached = true;
        Ok(())
    }

    fn detach_interrupts(&mut self) {
        self.interrupts_attached = false;
    }

    fn card_state(&mut self) -> Result<CardState, HostError> {
        self.state_polls = self.state_polls.saturating_add(1);
        self.check_active()?;
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            return Ok(CardState::Programming);
        }
        Ok(CardState::Transfer)
    }

    fn card_info(&mut self) -> Result<CardInfo, HostError> {
        if let Some(code) = self.info_error {
            return Err(HostError::new(code));
        }
        self.check_active()?;
        Ok(CardInfo {
            block_count: BLOCKS as u32,
            block_size: BLOCK_SIZE as u32,
            high_capacity: true,
        })
    }

    unsafe fn start_read(
        &mut self,
        request: TransferRequest,
        buffer: *mut u8,
    ) -> Result<(), HostError> {
        self.check_active()?;
        self.check_range(request.addr, request.count as u32)?;
        // SAFETY: the caller guarantees `buffer` covers `byte_len()` bytes.
        let out = unsafe { core::slice::from_raw_parts_mut(buffer, request.byte_len()) };
        for (index, chunk) in out.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            chunk.copy_from_slice(&self.storage[request.addr as usize + index]);
        }
        self.record_transfer(request);
        self.finish(Direction::Rx);
        Ok(())
    }

    unsafe fn start_write(
        &mut self,
        request: TransferRequest,
        buffer: *const u8,
    ) -> Result<(), HostError> {
        self.check_active()?;
        self.check_range(request.addr, request.count as u32)?;
        // SAFETY: the caller guarantees `buffer` covers `byte_len()` bytes.
        let data = unsafe { core::slice::from_raw_parts(buffer, request.byte_len()) };
        for (index, chunk) in data.chunks_exact(BLOCK_SIZE).enumerate() {
            self.storage[request.addr as usize + index].copy_from_slice(chunk);
        }
        self.record_transfer(request);
        self.busy_polls = self.busy_polls.saturating_add(self.busy_after_write);
        self.finish(Direction::Tx);
        Ok(())
    }

    fn abort_transfer(&mut self) -> Result<(), HostError> {
        self.aborts = self.aborts.saturating_add(1);
        if let Some(interrupt) = self.interrupt {
            interrupt.cancel();
        }
        Ok(())
    }

    fn erase(&mut self, start: u32, end: u32) -> Result<(), HostError> {
        self.check_active()?;
        if let Some(code) = self.erase_error {
            return Err(HostError::new(code));
        }
        if end < start {
            return Err(HostError::new(flags::BAD_ERASE_PARAM));
        }
        self.check_range(start, end - start + 1)?;
        for block in &mut self.storage[start as usize..=end as usize] {
            block.fill(0xFF);
        }
        assert!(
            self.erases.push((start, end)).is_ok(),
            "sim erase log holds {} entries",
            SIM_LOG_MAX
        );
        Ok(())
    }
}

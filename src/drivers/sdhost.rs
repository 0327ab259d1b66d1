//! ESP32 SDMMC host, slot 1, with the internal DMA controller (IDMAC).

use core::{
    cell::{Cell, RefCell},
    ptr::{addr_of, read_volatile, write_volatile},
    sync::atomic::{AtomicU8, Ordering},
};

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use esp_hal::{
    delay::Delay,
    handler,
    interrupt::{self, Priority},
    peripherals::{Interrupt, SDHOST},
    system::Cpu,
    time::{Duration, Instant},
};
use sdio_block::{
    card::{decode_csd, r1_error_flags},
    error::flags,
    BusConfig, BusWidth, CardInfo, CardState, ClockEdge, Direction, HostError, SdioHost,
    TransferRequest, TransferSignals, BLOCK_SIZE,
};

mod regs;

use regs::*;

const IDENT_SOURCE_DIV: u32 = 10;
const IDENT_CARD_DIV: u32 = 20;
const DATA_SOURCE_DIV: u32 = 4;
const COMMAND_TIMEOUT_MS: u64 = 100;
const RESET_TIMEOUT_MS: u64 = 10;
const ERASE_TIMEOUT_MS: u64 = 5_000;
const OP_COND_ATTEMPTS: u32 = 100;
const OP_COND_RETRY_MS: u32 = 10;
const OCR_BUSY: u32 = 1 << 31;
const OCR_HCS: u32 = 1 << 30;
const OCR_VOLTAGE_WINDOW: u32 = 0x00FF_8000;
const IF_COND_CHECK: u32 = 0x1AA;

const DESC_COUNT: usize = 4;
const DESC_BUF_MAX: usize = 4_096;
const DESC_LAST: u32 = 1 << 2;
const DESC_FIRST: u32 = 1 << 3;
const DESC_CHAINED: u32 = 1 << 4;
const DESC_OWN: u32 = 1 << 31;

const NO_TRANSFER: u8 = 0;
const RX_TRANSFER: u8 = 1;
const TX_TRANSFER: u8 = 2;

#[derive(Clone, Copy)]
#[repr(C, align(4))]
struct IdmacDesc {
    flags: u32,
    size: u32,
    buffer: u32,
    next: u32,
}

impl IdmacDesc {
    const EMPTY: Self = Self {
        flags: 0,
        size: 0,
        buffer: 0,
        next: 0,
    };
}

/// Descriptor ring refilled from the interrupt as the IDMAC consumes it.
struct DmaRing {
    desc: [IdmacDesc; DESC_COUNT],
    next: usize,
    cursor: u32,
    remaining: usize,
    first: bool,
}

impl DmaRing {
    const fn new() -> Self {
        Self {
            desc: [IdmacDesc::EMPTY; DESC_COUNT],
            next: 0,
            cursor: 0,
            remaining: 0,
            first: true,
        }
    }

    fn start(&mut self, buffer: u32, len: usize) {
        self.reset();
        self.cursor = buffer;
        self.remaining = len;
        for idx in 0..DESC_COUNT {
            let next = addr_of!(self.desc[(idx + 1) % DESC_COUNT]) as u32;
            self.desc[idx].next = next;
        }
        self.refill();
    }

    fn reset(&mut self) {
        for desc in self.desc.iter_mut() {
            // SAFETY: plain field of a descriptor the IDMAC may be polling.
            unsafe { write_volatile(&mut desc.flags, 0) };
        }
        self.next = 0;
        self.remaining = 0;
        self.first = true;
    }

    fn refill(&mut self) {
        while self.remaining > 0 {
            let desc = &mut self.desc[self.next];
            // SAFETY: the IDMAC clears OWN when it hands a descriptor back.
            if unsafe { read_volatile(&desc.flags) } & DESC_OWN != 0 {
                break;
            }
            let chunk = self.remaining.min(DESC_BUF_MAX);
            self.remaining -= chunk;
            let mut desc_flags = DESC_OWN | DESC_CHAINED;
            if self.first {
                desc_flags |= DESC_FIRST;
                self.first = false;
            }
            if self.remaining == 0 {
                desc_flags |= DESC_LAST;
            }
            desc.size = chunk as u32;
            desc.buffer = self.cursor;
            // SAFETY: OWN is published last so the IDMAC sees a complete entry.
            unsafe { write_volatile(&mut desc.flags, desc_flags) };
            self.cursor += chunk as u32;
            self.next = (self.next + 1) % DESC_COUNT;
        }
    }

    fn head(&self) -> u32 {
        addr_of!(self.desc[0]) as u32
    }
}

static DMA_RING: Mutex<CriticalSectionRawMutex, RefCell<DmaRing>> =
    Mutex::new(RefCell::new(DmaRing::new()));
static ISR_SIGNALS: Mutex<CriticalSectionRawMutex, Cell<Option<&'static TransferSignals>>> =
    Mutex::new(Cell::new(None));
static ACTIVE_TRANSFER: AtomicU8 = AtomicU8::new(NO_TRANSFER);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Response {
    None,
    Short,
    /// R3 carries no valid CRC.
    ShortNoCrc,
    Long,
}

/// Card registers captured during identification.
#[derive(Clone, Copy)]
struct CardId {
    rca: u32,
    high_capacity: bool,
    info: CardInfo,
}

pub struct Esp32SdHost {
    _sdhost: SDHOST<'static>,
    signals: &'static TransferSignals,
    card: Option<CardId>,
    powered: bool,
}

impl Esp32SdHost {
    pub fn new(sdhost: SDHOST<'static>, signals: &'static TransferSignals) -> Self {
        Self {
            _sdhost: sdhost,
            signals,
            card: None,
            powered: false,
        }
    }

    fn card(&self) -> Result<CardId, HostError> {
        self.card
            .ok_or(HostError::new(flags::REQUEST_NOT_APPLICABLE))
    }

    fn card_addr(&self, block: u32) -> Result<u32, HostError> {
        let card = self.card()?;
        if card.high_capacity {
            Ok(block)
        } else {
            block
                .checked_mul(BLOCK_SIZE as u32)
                .ok_or(HostError::new(flags::ADDR_OUT_OF_RANGE))
        }
    }

    fn reset_controller(&self, mask: u32) -> Result<(), HostError> {
        let regs = sdhost();
        unsafe {
            regs.ctrl().modify(|r, w| w.bits(r.bits() | mask));
        }
        spin_until(RESET_TIMEOUT_MS, || regs.ctrl().read().bits() & mask == 0)
    }

    fn update_clock(&self) -> Result<(), HostError> {
        let regs = sdhost();
        unsafe {
            regs.cmd().write(|w| {
                w.bits(CMD_START | CMD_UPDATE_CLOCK_ONLY | CMD_WAIT_PRVDATA | (SLOT << 16))
            });
        }
        spin_until(COMMAND_TIMEOUT_MS, || regs.cmd().read().bits() & CMD_START == 0)
    }

    fn set_card_clock(&self, source_div: u32, card_div: u32, edge: ClockEdge) -> Result<(), HostError> {
        let regs = sdhost();
        unsafe {
            regs.clkena().modify(|r, w| w.bits(r.bits() & !SLOT_BIT));
        }
        self.update_clock()?;
        set_source_divider(source_div, edge == ClockEdge::Falling);
        unsafe {
            regs.clksrc().write(|w| w.bits(0));
            regs.clkdiv().write(|w| w.bits(card_div & 0xFF));
        }
        self.update_clock()?;
        unsafe {
            regs.clkena().modify(|r, w| w.bits(r.bits() | SLOT_BIT));
        }
        self.update_clock()
    }

    fn send_command(
        &self,
        index: u8,
        arg: u32,
        response: Response,
        data_flags: u32,
    ) -> Result<[u32; 4], HostError> {
        let regs = sdhost();
        spin_until(COMMAND_TIMEOUT_MS, || regs.cmd().read().bits() & CMD_START == 0)?;

        let mut cmd = CMD_START | CMD_USE_HOLD_REG | (SLOT << 16) | index as u32 | data_flags;
        cmd |= match response {
            Response::None => 0,
            Response::Short => CMD_RESPONSE_EXPECT | CMD_CHECK_CRC,
            Response::ShortNoCrc => CMD_RESPONSE_EXPECT,
            Response::Long => CMD_RESPONSE_EXPECT | CMD_RESPONSE_LONG | CMD_CHECK_CRC,
        };
        if index == 0 {
            cmd |= CMD_SEND_INIT;
        }
        unsafe {
            regs.rintsts().write(|w| w.bits(INT_CD | INT_CMD_ERRORS));
            regs.cmdarg().write(|w| w.bits(arg));
            regs.cmd().write(|w| w.bits(cmd));
        }

        spin_until(COMMAND_TIMEOUT_MS, || {
            regs.rintsts().read().bits() & (INT_CD | INT_CMD_ERRORS) != 0
        })?;
        let status = regs.rintsts().read().bits();
        unsafe {
            regs.rintsts().write(|w| w.bits(INT_CD | INT_CMD_ERRORS));
        }
        let failed = command_error_flags(status);
        if failed != 0 {
            return Err(HostError::new(failed));
        }
        Ok([
            regs.resp0().read().bits(),
            regs.resp1().read().bits(),
            regs.resp2().read().bits(),
            regs.resp3().read().bits(),
        ])
    }

    fn send_app_command(&self, index: u8, arg: u32, response: Response) -> Result<[u32; 4], HostError> {
        let rca = self.card.map_or(0, |card| card.rca);
        self.send_command(55, rca << 16, Response::Short, 0)?;
        self.send_command(index, arg, response, 0)
    }

    fn identify(&mut self) -> Result<CardId, HostError> {
        self.send_command(0, 0, Response::None, 0)?;

        let v2 = match self.send_command(8, IF_COND_CHECK, Response::Short, 0) {
            Ok(resp) if resp[0] & 0xFFF == IF_COND_CHECK => true,
            Ok(_) => return Err(HostError::new(flags::UNSUPPORTED_FEATURE)),
            Err(err) if err.flags() & flags::CMD_RSP_TIMEOUT != 0 => false,
            Err(err) => return Err(err),
        };

        let arg = OCR_VOLTAGE_WINDOW | if v2 { OCR_HCS } else { 0 };
        let delay = Delay::new();
        let mut ocr = 0;
        for _ in 0..OP_COND_ATTEMPTS {
            ocr = self.send_app_command(41, arg, Response::ShortNoCrc)?[0];
            if ocr & OCR_BUSY != 0 {
                break;
            }
            delay.delay_millis(OP_COND_RETRY_MS);
        }
        if ocr & OCR_BUSY == 0 {
            return Err(HostError::new(flags::INVALID_VOLTRANGE));
        }
        let high_capacity = ocr & OCR_HCS != 0;

        self.send_command(2, 0, Response::Long, 0)?;
        let rca = self.send_command(3, 0, Response::Short, 0)?[0] >> 16;
        let csd_words = self.send_command(9, rca << 16, Response::Long, 0)?;
        let mut csd = [0u8; 16];
        for (chunk, word) in csd.chunks_exact_mut(4).zip(csd_words.iter().rev()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        let info = decode_csd(&csd).ok_or(HostError::new(flags::UNSUPPORTED_FEATURE))?;

        self.send_command(7, rca << 16, Response::Short, 0)?;
        spin_until(COMMAND_TIMEOUT_MS, || {
            sdhost().status().read().bits() & STATUS_DATA_BUSY == 0
        })?;
        if !high_capacity {
            self.send_command(16, BLOCK_SIZE as u32, Response::Short, 0)?;
        }

        Ok(CardId {
            rca,
            high_capacity,
            info,
        })
    }

    fn start_data(
        &mut self,
        request: TransferRequest,
        buffer: u32,
    ) -> Result<(), HostError> {
        let addr = self.card_addr(request.addr)?;
        let len = request.byte_len();
        let multi = request.count > 1;
        let (index, dir_flags, active) = match (request.direction, multi) {
            (Direction::Rx, false) => (17, 0, RX_TRANSFER),
            (Direction::Rx, true) => (18, CMD_AUTO_STOP, RX_TRANSFER),
            (Direction::Tx, false) => (24, CMD_WRITE, TX_TRANSFER),
            (Direction::Tx, true) => (25, CMD_WRITE | CMD_AUTO_STOP, TX_TRANSFER),
        };

        self.reset_controller(CTRL_FIFO_RESET | CTRL_DMA_RESET)?;
        let head = DMA_RING.lock(|ring| {
            let mut ring = ring.borrow_mut();
            ring.start(buffer, len);
            ring.head()
        });
        let regs = sdhost();
        unsafe {
            regs.blksiz().write(|w| w.bits(BLOCK_SIZE as u32));
            regs.bytcnt().write(|w| w.bits(len as u32));
            regs.idsts().write(|w| w.bits(IDSTS_ALL));
            regs.dbaddr().write(|w| w.bits(head));
            regs.bmod().modify(|r, w| w.bits(r.bits() | BMOD_DE | BMOD_FB));
            regs.pldmnd().write(|w| w.bits(1));
        }

        ACTIVE_TRANSFER.store(active, Ordering::Release);
        let cmd_flags = CMD_DATA_EXPECTED | CMD_WAIT_PRVDATA | dir_flags;
        if let Err(err) = self.send_command(index, addr, Response::Short, cmd_flags) {
            ACTIVE_TRANSFER.store(NO_TRANSFER, Ordering::Release);
            self.stop_dma();
            return Err(err);
        }
        Ok(())
    }

    fn stop_dma(&self) {
        let regs = sdhost();
        unsafe {
            regs.bmod().modify(|r, w| w.bits((r.bits() & !BMOD_DE) | BMOD_SWR));
        }
        DMA_RING.lock(|ring| ring.borrow_mut().reset());
        if let Err(err) = self.reset_controller(CTRL_FIFO_RESET | CTRL_DMA_RESET) {
            log::warn!("sdio: dma_reset_failed code=0x{:08x}", err.flags());
        }
        unsafe {
            regs.idsts().write(|w| w.bits(IDSTS_ALL));
        }
    }

    fn set_slot_width(&self, four_bit: bool) {
        unsafe {
            sdhost().ctype().modify(|r, w| {
                if four_bit {
                    w.bits(r.bits() | SLOT_BIT)
                } else {
                    w.bits(r.bits() & !SLOT_BIT)
                }
            });
        }
    }
}

impl SdioHost for Esp32SdHost {
    fn power_up(&mut self) -> Result<(), HostError> {
        enable_peripheral_clock();
        for signal in SdioSignal::ALL {
            route(signal);
            log::debug!("sdio: route signal={:?} gpio={}", signal, signal.gpio());
        }
        self.reset_controller(CTRL_RESET_ALL)?;
        let regs = sdhost();
        unsafe {
            regs.intmask().write(|w| w.bits(0));
            regs.rintsts().write(|w| w.bits(u32::MAX));
            regs.tmout().write(|w| w.bits(0xFFFF_FF40));
            regs.pwren().modify(|r, w| w.bits(r.bits() | SLOT_BIT));
            regs.ctrl().modify(|r, w| w.bits(r.bits() | CTRL_USE_IDMAC));
        }
        self.powered = true;
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), HostError> {
        self.card = None;
        if !self.powered {
            return Ok(());
        }
        self.powered = false;
        let regs = sdhost();
        unsafe {
            regs.clkena().modify(|r, w| w.bits(r.bits() & !SLOT_BIT));
        }
        let clock = self.update_clock();
        unsafe {
            regs.pwren().modify(|r, w| w.bits(r.bits() & !SLOT_BIT));
        }
        disable_peripheral_clock();
        clock
    }

    fn init_card(&mut self, bus: BusConfig) -> Result<(), HostError> {
        if !self.powered {
            return Err(HostError::new(flags::INVALID_VOLTRANGE));
        }
        self.card = None;
        self.set_slot_width(false);
        self.set_card_clock(IDENT_SOURCE_DIV, IDENT_CARD_DIV, bus.clock_edge)?;
        let card = self.identify()?;
        self.card = Some(card);
        self.set_card_clock(DATA_SOURCE_DIV, bus.clock_div as u32, bus.clock_edge)
    }

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), HostError> {
        self.card()?;
        let arg = match width {
            BusWidth::One => 0,
            BusWidth::Four => 2,
        };
        self.send_app_command(6, arg, Response::Short)?;
        self.set_slot_width(width == BusWidth::Four);
        Ok(())
    }

    fn attach_interrupts(&mut self) -> Result<(), HostError> {
        ISR_SIGNALS.lock(|slot| slot.set(Some(self.signals)));
        let regs = sdhost();
        unsafe {
            regs.rintsts().write(|w| w.bits(u32::MAX));
            regs.idsts().write(|w| w.bits(IDSTS_ALL));
            regs.intmask().write(|w| w.bits(INT_DTO | INT_DATA_ERRORS));
            regs.idinten().write(|w| w.bits(IDSTS_ALL));
        }
        // SAFETY: the handler only touches the SDMMC block and the ring above.
        unsafe { interrupt::bind_interrupt(Interrupt::SDIO_HOST, sdhost_handler.handler()) };
        interrupt::enable(Interrupt::SDIO_HOST, Priority::Priority1)
            .map_err(|_| HostError::new(flags::GENERAL_UNKNOWN_ERR))?;
        unsafe {
            regs.ctrl().modify(|r, w| w.bits(r.bits() | CTRL_INT_ENABLE));
        }
        Ok(())
    }

    fn detach_interrupts(&mut self) {
        let regs = sdhost();
        unsafe {
            regs.ctrl().modify(|r, w| w.bits(r.bits() & !CTRL_INT_ENABLE));
            regs.intmask().write(|w| w.bits(0));
            regs.idinten().write(|w| w.bits(0));
        }
        interrupt::disable(Cpu::current(), Interrupt::SDIO_HOST);
        ACTIVE_TRANSFER.store(NO_TRANSFER, Ordering::Release);
        ISR_SIGNALS.lock(|slot| slot.set(None));
    }

    fn card_state(&mut self) -> Result<CardState, HostError> {
        let card = self.card()?;
        let status = self.send_command(13, card.rca << 16, Response::Short, 0)?[0];
        let errors = r1_error_flags(status);
        if errors != 0 {
            return Err(HostError::new(errors));
        }
        if sdhost().status().read().bits() & STATUS_DATA_BUSY != 0 {
            return Ok(CardState::Programming);
        }
        Ok(CardState::from_r1(status))
    }

    fn card_info(&mut self) -> Result<CardInfo, HostError> {
        Ok(self.card()?.info)
    }

    unsafe fn start_read(
        &mut self,
        request: TransferRequest,
        buffer: *mut u8,
    ) -> Result<(), HostError> {
        self.start_data(request, buffer as u32)
    }

    unsafe fn start_write(
        &mut self,
        request: TransferRequest,
        buffer: *const u8,
    ) -> Result<(), HostError> {
        self.start_data(request, buffer as u32)
    }

    fn abort_transfer(&mut self) -> Result<(), HostError> {
        ACTIVE_TRANSFER.store(NO_TRANSFER, Ordering::Release);
        self.stop_dma();
        let stop = self.send_command(12, 0, Response::Short, CMD_STOP_ABORT);
        unsafe {
            sdhost().rintsts().write(|w| w.bits(INT_DTO | INT_DATA_ERRORS));
        }
        stop.map(|_| ())
    }

    fn erase(&mut self, start: u32, end: u32) -> Result<(), HostError> {
        let first = self.card_addr(start)?;
        let last = self.card_addr(end)?;
        self.send_command(32, first, Response::Short, 0)?;
        self.send_command(33, last, Response::Short, 0)?;
        self.send_command(38, 0, Response::Short, 0)?;
        spin_until(ERASE_TIMEOUT_MS, || {
            sdhost().status().read().bits() & STATUS_DATA_BUSY == 0
        })
    }
}

fn spin_until(timeout_ms: u64, mut done: impl FnMut() -> bool) -> Result<(), HostError> {
    let started = Instant::now();
    let timeout = Duration::from_millis(timeout_ms);
    while !done() {
        if started.elapsed() >= timeout {
            return Err(HostError::new(flags::TIMEOUT));
        }
    }
    Ok(())
}

fn command_error_flags(status: u32) -> u32 {
    let mut out = 0;
    if status & INT_RTO != 0 {
        out |= flags::CMD_RSP_TIMEOUT;
    }
    if status & (INT_RCRC | INT_RE) != 0 {
        out |= flags::CMD_CRC_FAIL;
    }
    if status & INT_HLE != 0 {
        out |= flags::GENERAL_UNKNOWN_ERR;
    }
    out
}

fn data_error_flags(status: u32, dma_status: u32, direction: Direction) -> u32 {
    let mut out = 0;
    if status & (INT_DCRC | INT_SBE | INT_EBE) != 0 {
        out |= flags::DATA_CRC_FAIL;
    }
    if status & INT_DRTO != 0 {
        out |= flags::DATA_TIMEOUT;
    }
    if status & INT_HTO != 0 {
        out |= flags::TIMEOUT;
    }
    if status & INT_FRUN != 0 {
        out |= match direction {
            Direction::Rx => flags::RX_OVERRUN,
            Direction::Tx => flags::TX_UNDERRUN,
        };
    }
    if dma_status & (IDSTS_FBE | IDSTS_DU) != 0 {
        out |= flags::DMA;
    }
    out
}

#[handler]
fn sdhost_handler() {
    let regs = sdhost();
    let status = regs.mintsts().read().bits();
    let dma_status = regs.idsts().read().bits();
    unsafe {
        regs.rintsts().write(|w| w.bits(status));
        regs.idsts().write(|w| w.bits(dma_status & IDSTS_ALL));
    }

    if dma_status & (IDSTS_TI | IDSTS_RI) != 0 {
        DMA_RING.lock(|ring| ring.borrow_mut().refill());
        unsafe {
            regs.pldmnd().write(|w| w.bits(1));
        }
    }

    let direction = match ACTIVE_TRANSFER.load(Ordering::Acquire) {
        RX_TRANSFER => Direction::Rx,
        TX_TRANSFER => Direction::Tx,
        _ => return,
    };
    let errors = data_error_flags(status, dma_status, direction);
    if errors == 0 && status & INT_DTO == 0 {
        return;
    }

    ACTIVE_TRANSFER.store(NO_TRANSFER, Ordering::Release);
    let Some(signals) = ISR_SIGNALS.lock(|slot| slot.get()) else {
        return;
    };
    if errors != 0 {
        signals.fail(direction, errors);
    } else {
        signals.complete(direction);
    }
}

//! SDMMC bit layout (slot 1, IO_MUX routed) and peripheral clock gating.

pub(super) const CTRL_CONTROLLER_RESET: u32 = 1 << 0;
pub(super) const CTRL_FIFO_RESET: u32 = 1 << 1;
pub(super) const CTRL_DMA_RESET: u32 = 1 << 2;
pub(super) const CTRL_INT_ENABLE: u32 = 1 << 4;
pub(super) const CTRL_USE_IDMAC: u32 = 1 << 25;
pub(super) const CTRL_RESET_ALL: u32 = CTRL_CONTROLLER_RESET | CTRL_FIFO_RESET | CTRL_DMA_RESET;

pub(super) const CMD_RESPONSE_EXPECT: u32 = 1 << 6;
pub(super) const CMD_RESPONSE_LONG: u32 = 1 << 7;
pub(super) const CMD_CHECK_CRC: u32 = 1 << 8;
pub(super) const CMD_DATA_EXPECTED: u32 = 1 << 9;
pub(super) const CMD_WRITE: u32 = 1 << 10;
pub(super) const CMD_AUTO_STOP: u32 = 1 << 12;
pub(super) const CMD_WAIT_PRVDATA: u32 = 1 << 13;
pub(super) const CMD_STOP_ABORT: u32 = 1 << 14;
pub(super) const CMD_SEND_INIT: u32 = 1 << 15;
pub(super) const CMD_UPDATE_CLOCK_ONLY: u32 = 1 << 21;
pub(super) const CMD_USE_HOLD_REG: u32 = 1 << 29;
pub(super) const CMD_START: u32 = 1 << 31;

pub(super) const INT_RE: u32 = 1 << 1;
pub(super) const INT_CD: u32 = 1 << 2;
pub(super) const INT_DTO: u32 = 1 << 3;
pub(super) const INT_RCRC: u32 = 1 << 6;
pub(super) const INT_DCRC: u32 = 1 << 7;
pub(super) const INT_RTO: u32 = 1 << 8;
pub(super) const INT_DRTO: u32 = 1 << 9;
pub(super) const INT_HTO: u32 = 1 << 10;
pub(super) const INT_FRUN: u32 = 1 << 11;
pub(super) const INT_HLE: u32 = 1 << 12;
pub(super) const INT_SBE: u32 = 1 << 13;
pub(super) const INT_EBE: u32 = 1 << 15;
pub(super) const INT_CMD_ERRORS: u32 = INT_RE | INT_RCRC | INT_RTO | INT_HLE;
pub(super) const INT_DATA_ERRORS: u32 =
    INT_DCRC | INT_DRTO | INT_HTO | INT_FRUN | INT_SBE | INT_EBE;

pub(super) const STATUS_DATA_BUSY: u32 = 1 << 9;

pub(super) const BMOD_SWR: u32 = 1 << 0;
pub(super) const BMOD_FB: u32 = 1 << 1;
pub(super) const BMOD_DE: u32 = 1 << 7;

pub(super) const IDSTS_TI: u32 = 1 << 0;
pub(super) const IDSTS_RI: u32 = 1 << 1;
pub(super) const IDSTS_FBE: u32 = 1 << 2;
pub(super) const IDSTS_DU: u32 = 1 << 4;
pub(super) const IDSTS_NIS: u32 = 1 << 8;
pub(super) const IDSTS_AIS: u32 = 1 << 9;
pub(super) const IDSTS_ALL: u32 =
    IDSTS_TI | IDSTS_RI | IDSTS_FBE | IDSTS_DU | IDSTS_NIS | IDSTS_AIS;

/// Card slot 1 is the only one wired on this board.
pub(super) const SLOT: u32 = 1;
pub(super) const SLOT_BIT: u32 = 1 << SLOT;

const DPORT_SDIO_HOST_BIT: u32 = 1 << 13;

const IO_MUX_FUN_WPU: u32 = 1 << 8;
const IO_MUX_FUN_IE: u32 = 1 << 9;
const IO_MUX_FUN_DRV_MAX: u32 = 3 << 10;
const IO_MUX_MCU_SEL_SHIFT: u32 = 12;
const IO_MUX_MCU_SEL_MASK: u32 = 0b111 << IO_MUX_MCU_SEL_SHIFT;
const IO_MUX_FUNC_HS2: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SdioSignal {
    Clk,
    Cmd,
    D0,
    D1,
    D2,
    D3,
}

impl SdioSignal {
    pub(super) const ALL: [SdioSignal; 6] = [
        SdioSignal::Clk,
        SdioSignal::Cmd,
        SdioSignal::D0,
        SdioSignal::D1,
        SdioSignal::D2,
        SdioSignal::D3,
    ];

    pub(super) fn gpio(self) -> u8 {
        match self {
            SdioSignal::Clk => 14,
            SdioSignal::Cmd => 15,
            SdioSignal::D0 => 2,
            SdioSignal::D1 => 4,
            SdioSignal::D2 => 12,
            SdioSignal::D3 => 13,
        }
    }
}

pub(super) fn sdhost() -> &'static esp32::sdhost::RegisterBlock {
    // SAFETY: the SDMMC block is owned by `Esp32SdHost` and its interrupt.
    unsafe { &*esp32::SDHOST::PTR }
}

pub(super) fn enable_peripheral_clock() {
    // SAFETY: SDIO host clock and reset bits are owned by this driver.
    unsafe {
        let dport = &*esp32::DPORT::PTR;
        dport
            .wifi_clk_en()
            .modify(|r, w| w.bits(r.bits() | DPORT_SDIO_HOST_BIT));
        dport
            .core_rst_en()
            .modify(|r, w| w.bits(r.bits() & !DPORT_SDIO_HOST_BIT));
    }
}

pub(super) fn disable_peripheral_clock() {
    // SAFETY: SDIO host clock and reset bits are owned by this driver.
    unsafe {
        let dport = &*esp32::DPORT::PTR;
        dport
            .core_rst_en()
            .modify(|r, w| w.bits(r.bits() | DPORT_SDIO_HOST_BIT));
        dport
            .wifi_clk_en()
            .modify(|r, w| w.bits(r.bits() & !DPORT_SDIO_HOST_BIT));
    }
}

fn pad_bits(current: u32, pull_up: u32) -> u32 {
    (current & !IO_MUX_MCU_SEL_MASK & !IO_MUX_FUN_WPU)
        | (IO_MUX_FUNC_HS2 << IO_MUX_MCU_SEL_SHIFT)
        | IO_MUX_FUN_IE
        | IO_MUX_FUN_DRV_MAX
        | pull_up
}

/// Hands the slot 1 pad of `signal` to the SD host.
pub(super) fn route(signal: SdioSignal) {
    let pull_up = match signal {
        SdioSignal::Clk => 0,
        _ => IO_MUX_FUN_WPU,
    };
    // SAFETY: the slot 1 pads are reserved for the SD host on this board.
    unsafe {
        let io_mux = &*esp32::IO_MUX::PTR;
        match signal {
            SdioSignal::Clk => {
                io_mux.gpio14().modify(|r, w| w.bits(pad_bits(r.bits(), pull_up)));
            }
            SdioSignal::Cmd => {
                io_mux.gpio15().modify(|r, w| w.bits(pad_bits(r.bits(), pull_up)));
            }
            SdioSignal::D0 => {
                io_mux.gpio2().modify(|r, w| w.bits(pad_bits(r.bits(), pull_up)));
            }
            SdioSignal::D1 => {
                io_mux.gpio4().modify(|r, w| w.bits(pad_bits(r.bits(), pull_up)));
            }
            SdioSignal::D2 => {
                io_mux.gpio12().modify(|r, w| w.bits(pad_bits(r.bits(), pull_up)));
            }
            SdioSignal::D3 => {
                io_mux.gpio13().modify(|r, w| w.bits(pad_bits(r.bits(), pull_up)));
            }
        }
    }
}

/// Splits the 160 MHz source by `div` (2..=16) ahead of the card divider.
pub(super) fn set_source_divider(div: u32, drive_on_falling: bool) {
    let div = div.clamp(2, 16);
    let h = div / 2 - 1;
    let l = div - 1;
    let n = div - 1;
    let drv_sel = if drive_on_falling { 4 } else { 1 };
    let value = drv_sel | (h << 11) | (l << 15) | (n << 19) | (1 << 25);
    // SAFETY: raw phase and divider fields of the SDMMC clock block.
    unsafe {
        sdhost().clk_edge_sel().write(|w| w.bits(value));
    }
}

#[cfg(test)]
mod tests;

/// Raw hardware error flags reported by an SD host and by R1 card status.
pub mod flags {
    pub const CMD_CRC_FAIL: u32 = 0x0000_0001;
    pub const DATA_CRC_FAIL: u32 = 0x0000_0002;
    pub const CMD_RSP_TIMEOUT: u32 = 0x0000_0004;
    pub const DATA_TIMEOUT: u32 = 0x0000_0008;
    pub const TX_UNDERRUN: u32 = 0x0000_0010;
    pub const RX_OVERRUN: u32 = 0x0000_0020;
    pub const ADDR_MISALIGNED: u32 = 0x0000_0040;
    pub const BLOCK_LEN_ERR: u32 = 0x0000_0080;
    pub const ERASE_SEQ_ERR: u32 = 0x0000_0100;
    pub const BAD_ERASE_PARAM: u32 = 0x0000_0200;
    pub const WRITE_PROT_VIOLATION: u32 = 0x0000_0400;
    pub const LOCK_UNLOCK_FAILED: u32 = 0x0000_0800;
    pub const COM_CRC_FAILED: u32 = 0x0000_1000;
    pub const ILLEGAL_CMD: u32 = 0x0000_2000;
    pub const CARD_ECC_FAILED: u32 = 0x0000_4000;
    pub const CC_ERR: u32 = 0x0000_8000;
    pub const GENERAL_UNKNOWN_ERR: u32 = 0x0001_0000;
    pub const STREAM_READ_UNDERRUN: u32 = 0x0002_0000;
    pub const STREAM_WRITE_OVERRUN: u32 = 0x0004_0000;
    pub const CID_CSD_OVERWRITE: u32 = 0x0008_0000;
    pub const WP_ERASE_SKIP: u32 = 0x0010_0000;
    pub const CARD_ECC_DISABLED: u32 = 0x0020_0000;
    pub const ERASE_RESET: u32 = 0x0040_0000;
    pub const AKE_SEQ_ERR: u32 = 0x0080_0000;
    pub const INVALID_VOLTRANGE: u32 = 0x0100_0000;
    pub const ADDR_OUT_OF_RANGE: u32 = 0x0200_0000;
    pub const REQUEST_NOT_APPLICABLE: u32 = 0x0400_0000;
    pub const PARAM: u32 = 0x0800_0000;
    pub const UNSUPPORTED_FEATURE: u32 = 0x1000_0000;
    pub const BUSY: u32 = 0x2000_0000;
    pub const DMA: u32 = 0x4000_0000;
    pub const TIMEOUT: u32 = 0x8000_0000;
}

pub const EIO: i32 = 5;
pub const ENOMEM: i32 = 12;
pub const EFAULT: i32 = 14;
pub const EBUSY: i32 = 16;
pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;
pub const EBADMSG: i32 = 77;
pub const ETIMEDOUT: i32 = 116;
pub const ENOTSUP: i32 = 134;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockError {
    InvalidParameter,
    Timeout,
    Busy,
    Integrity,
    OutOfResources,
    Unsupported,
    Hardware,
    CardStatus,
    NotReady,
}

impl BlockError {
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidParameter => EINVAL,
            Self::Timeout => ETIMEDOUT,
            Self::Busy => EBUSY,
            Self::Integrity => EBADMSG,
            Self::OutOfResources => ENOMEM,
            Self::Unsupported => ENOTSUP,
            Self::Hardware => EIO,
            Self::CardStatus => EFAULT,
            Self::NotReady => ENODEV,
        }
    }

    /// Negative errno, for callers that speak C-style status codes.
    pub const fn as_status(self) -> i32 {
        -self.errno()
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::InvalidParameter => "invalid_parameter",
            Self::Timeout => "timeout",
            Self::Busy => "busy",
            Self::Integrity => "integrity",
            Self::OutOfResources => "out_of_resources",
            Self::Unsupported => "unsupported",
            Self::Hardware => "hardware",
            Self::CardStatus => "card_status",
            Self::NotReady => "not_ready",
        }
    }
}

// Checked top to bottom; the first kind whose mask intersects the code wins.
const ERROR_MAP: [(u32, BlockError); 8] = [
    (flags::BUSY, BlockError::Busy),
    (
        flags::CMD_RSP_TIMEOUT | flags::DATA_TIMEOUT | flags::TIMEOUT,
        BlockError::Timeout,
    ),
    (
        flags::CMD_CRC_FAIL | flags::DATA_CRC_FAIL | flags::COM_CRC_FAILED | flags::CARD_ECC_FAILED,
        BlockError::Integrity,
    ),
    (
        flags::TX_UNDERRUN
            | flags::RX_OVERRUN
            | flags::STREAM_READ_UNDERRUN
            | flags::STREAM_WRITE_OVERRUN,
        BlockError::OutOfResources,
    ),
    (
        flags::ADDR_MISALIGNED
            | flags::BLOCK_LEN_ERR
            | flags::ERASE_SEQ_ERR
            | flags::BAD_ERASE_PARAM
            | flags::WRITE_PROT_VIOLATION
            | flags::ADDR_OUT_OF_RANGE
            | flags::PARAM,
        BlockError::InvalidParameter,
    ),
    (
        flags::ILLEGAL_CMD | flags::REQUEST_NOT_APPLICABLE | flags::UNSUPPORTED_FEATURE,
        BlockError::Unsupported,
    ),
    (
        flags::LOCK_UNLOCK_FAILED
            | flags::CID_CSD_OVERWRITE
            | flags::WP_ERASE_SKIP
            | flags::CARD_ECC_DISABLED
            | flags::ERASE_RESET
            | flags::AKE_SEQ_ERR,
        BlockError::CardStatus,
    ),
    (
        flags::DMA | flags::INVALID_VOLTRANGE | flags::CC_ERR | flags::GENERAL_UNKNOWN_ERR,
        BlockError::Hardware,
    ),
];

/// Translates a raw host error code. `0` means no error; bits outside the
/// known flag set collapse to [`BlockError::Hardware`].
pub fn map_error_code(code: u32) -> Option<BlockError> {
    if code == 0 {
        return None;
    }
    for (mask, kind) in ERROR_MAP {
        if code & mask != 0 {
            return Some(kind);
        }
    }
    Some(BlockError::Hardware)
}

/// Error flags as reported by an [`SdioHost`](crate::host::SdioHost).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostError(u32);

impl HostError {
    pub const fn new(flags: u32) -> Self {
        Self(flags)
    }

    pub const fn flags(self) -> u32 {
        self.0
    }

    pub fn kind(self) -> BlockError {
        map_error_code(self.0).unwrap_or(BlockError::Hardware)
    }
}

impl From<HostError> for BlockError {
    fn from(value: HostError) -> Self {
        value.kind()
    }
}

use crate::{config::BLOCK_SIZE, error::flags, host::CardState};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardInfo {
    /// Number of 512-byte blocks.
    pub block_count: u32,
    pub block_size: u32,
    pub high_capacity: bool,
}

impl CardInfo {
    pub const fn capacity_bytes(&self) -> u64 {
        self.block_count as u64 * self.block_size as u64
    }
}

/// Decodes card geometry from a CSD register, normalized to 512-byte blocks.
pub fn decode_csd(csd: &[u8; 16]) -> Option<CardInfo> {
    let csd_structure = csd_get_bits(csd, 127, 126) as u8;
    let bytes = match csd_structure {
        0 => {
            // CSD v1.0 (SDSC)
            let c_size = csd_get_bits(csd, 73, 62) as u64;
            let c_size_mult = csd_get_bits(csd, 49, 47) as u64;
            let read_bl_len = csd_get_bits(csd, 83, 80) as u64;

            let block_len = 1u64.checked_shl(read_bl_len as u32)?;
            let mult = 1u64.checked_shl((c_size_mult + 2) as u32)?;
            let blocknr = (c_size + 1).checked_mul(mult)?;
            blocknr.checked_mul(block_len)?
        }
        1 => {
            // CSD v2.0 (SDHC/SDXC)
            let c_size = csd_get_bits(csd, 69, 48) as u64;
            (c_size + 1).checked_mul(512 * 1024)?
        }
        _ => return None,
    };
    let block_count = u32::try_from(bytes / BLOCK_SIZE as u64).ok()?;
    Some(CardInfo {
        block_count,
        block_size: BLOCK_SIZE as u32,
        high_capacity: csd_structure == 1,
    })
}

fn csd_get_bits(csd: &[u8; 16], msb: u8, lsb: u8) -> u32 {
    let mut value = 0u32;
    for bit in (lsb..=msb).rev() {
        let byte_idx = (127 - bit) / 8;
        let bit_in_byte = bit % 8;
        let b = (csd[byte_idx as usize] >> bit_in_byte) & 1;
        value = (value << 1) | (b as u32);
    }
    value
}

impl CardState {
    pub fn from_r1(status: u32) -> Self {
        match ((status >> 9) & 0x0F) as u8 {
            0 => Self::Idle,
            1 => Self::Ready,
            2 => Self::Identification,
            3 => Self::Standby,
            4 => Self::Transfer,
            5 => Self::Sending,
            6 => Self::Receiving,
            7 => Self::Programming,
            8 => Self::Disconnected,
            other => Self::Unknown(other),
        }
    }
}

const R1_ERROR_BITS: [(u32, u32); 17] = [
    (1 << 31, flags::ADDR_OUT_OF_RANGE),
    (1 << 30, flags::ADDR_MISALIGNED),
    (1 << 29, flags::BLOCK_LEN_ERR),
    (1 << 28, flags::ERASE_SEQ_ERR),
    (1 << 27, flags::BAD_ERASE_PARAM),
    (1 << 26, flags::WRITE_PROT_VIOLATION),
    (1 << 24, flags::LOCK_UNLOCK_FAILED),
    (1 << 23, flags::COM_CRC_FAILED),
    (1 << 22, flags::ILLEGAL_CMD),
    (1 << 21, flags::CARD_ECC_FAILED),
    (1 << 20, flags::CC_ERR),
    (1 << 19, flags::GENERAL_UNKNOWN_ERR),
    (1 << 16, flags::CID_CSD_OVERWRITE),
    (1 << 15, flags::WP_ERASE_SKIP),
    (1 << 14, flags::CARD_ECC_DISABLED),
    (1 << 13, flags::ERASE_RESET),
    (1 << 3, flags::AKE_SEQ_ERR),
];

/// Host error flags raised by an R1 response; `0` when the card reports none.
pub fn r1_error_flags(status: u32) -> u32 {
    R1_ERROR_BITS
        .iter()
        .filter(|(bit, _)| status & bit != 0)
        .fold(0, |acc, (_, flag)| acc | flag)
}

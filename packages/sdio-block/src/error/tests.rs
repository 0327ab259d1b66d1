use super::*;

#[test]
fn zero_code_is_not_an_error() {
    assert_eq!(map_error_code(0), None);
}

#[test]
fn single_flags_map_to_their_kind() {
    let cases = [
        (flags::CMD_CRC_FAIL, BlockError::Integrity),
        (flags::DATA_CRC_FAIL, BlockError::Integrity),
        (flags::CARD_ECC_FAILED, BlockError::Integrity),
        (flags::CMD_RSP_TIMEOUT, BlockError::Timeout),
        (flags::DATA_TIMEOUT, BlockError::Timeout),
        (flags::TIMEOUT, BlockError::Timeout),
        (flags::RX_OVERRUN, BlockError::OutOfResources),
        (flags::TX_UNDERRUN, BlockError::OutOfResources),
        (flags::ADDR_OUT_OF_RANGE, BlockError::InvalidParameter),
        (flags::WRITE_PROT_VIOLATION, BlockError::InvalidParameter),
        (flags::PARAM, BlockError::InvalidParameter),
        (flags::ILLEGAL_CMD, BlockError::Unsupported),
        (flags::UNSUPPORTED_FEATURE, BlockError::Unsupported),
        (flags::BUSY, BlockError::Busy),
        (flags::DMA, BlockError::Hardware),
        (flags::INVALID_VOLTRANGE, BlockError::Hardware),
        (flags::GENERAL_UNKNOWN_ERR, BlockError::Hardware),
        (flags::AKE_SEQ_ERR, BlockError::CardStatus),
        (flags::ERASE_RESET, BlockError::CardStatus),
        (flags::LOCK_UNLOCK_FAILED, BlockError::CardStatus),
    ];
    for (code, kind) in cases {
        assert_eq!(map_error_code(code), Some(kind), "code=0x{:08x}", code);
    }
}

#[test]
fn every_defined_flag_is_covered_by_the_table() {
    let all = ERROR_MAP.iter().fold(0u32, |acc, (mask, _)| acc | mask);
    assert_eq!(all, u32::MAX);
}

#[test]
fn combined_flags_resolve_the_same_way_every_time() {
    let code = flags::DATA_CRC_FAIL | flags::DATA_TIMEOUT | flags::DMA;
    let first = map_error_code(code);
    for _ in 0..8 {
        assert_eq!(map_error_code(code), first);
    }
    assert_eq!(first, Some(BlockError::Timeout));
    assert_eq!(
        map_error_code(flags::BUSY | flags::CMD_CRC_FAIL),
        Some(BlockError::Busy)
    );
}

#[test]
fn host_error_converts_through_the_map() {
    let err: BlockError = HostError::new(flags::RX_OVERRUN).into();
    assert_eq!(err, BlockError::OutOfResources);
    assert_eq!(HostError::new(0).kind(), BlockError::Hardware);
}

#[test]
fn errno_values_are_negative_as_status() {
    assert_eq!(BlockError::InvalidParameter.as_status(), -EINVAL);
    assert_eq!(BlockError::Timeout.errno(), ETIMEDOUT);
    assert_eq!(BlockError::Integrity.errno(), EBADMSG);
    assert_eq!(BlockError::OutOfResources.errno(), ENOMEM);
    assert_eq!(BlockError::Unsupported.errno(), ENOTSUP);
    assert_eq!(BlockError::Hardware.errno(), EIO);
    assert_eq!(BlockError::CardStatus.errno(), EFAULT);
    assert_eq!(BlockError::Busy.errno(), EBUSY);
    assert_eq!(BlockError::NotReady.errno(), ENODEV);
}

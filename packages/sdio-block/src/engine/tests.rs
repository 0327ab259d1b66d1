use embassy_futures::block_on;

use super::*;
use crate::{
    error::flags,
    sim::{SimCard, SimClock, SimInterrupt},
};

const CARD_BLOCKS: usize = 64;

type TestEngine<'a> = BlockEngine<'a, SimCard<'a, CARD_BLOCKS>, &'a SimClock>;

#[repr(C, align(4))]
struct Aligned<const N: usize>([u8; N]);

impl<const N: usize> Aligned<N> {
    fn zeroed() -> Self {
        Self([0; N])
    }

    /// Slice of `len` bytes starting one byte past an aligned address.
    fn misaligned(&mut self, len: usize) -> &mut [u8] {
        &mut self.0[1..1 + len]
    }
}

fn engine<'a>(signals: &'a TransferSignals, clock: &'a SimClock) -> TestEngine<'a> {
    BlockEngine::new(SimCard::new(signals), clock, signals, EngineConfig::default())
}

fn late_engine<'a>(
    signals: &'a TransferSignals,
    interrupt: &'a SimInterrupt<'a>,
) -> BlockEngine<'a, SimCard<'a, CARD_BLOCKS>, &'a SimInterrupt<'a>> {
    let card = SimCard::new(signals).with_interrupt(interrupt);
    BlockEngine::new(card, interrupt, signals, EngineConfig::default())
}

fn pattern(len: usize, seed: u8) -> [u8; 4 * BLOCK_SIZE] {
    let mut data = [0u8; 4 * BLOCK_SIZE];
    for (i, byte) in data.iter_mut().take(len).enumerate() {
        *byte = (i as u8).wrapping_mul(31).wrapping_add(seed);
    }
    data
}

#[test]
fn zero_count_is_rejected_without_touching_hardware() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    let mut buf = Aligned::<BLOCK_SIZE>::zeroed();

    assert_eq!(
        block_on(engine.read_blocks(0, 0, &mut buf.0)),
        Err(BlockError::InvalidParameter)
    );
    engine.init().unwrap();
    assert_eq!(
        block_on(engine.read_blocks(0, 0, &mut buf.0)),
        Err(BlockError::InvalidParameter)
    );
    assert_eq!(
        block_on(engine.write_blocks(0, 0, &buf.0)),
        Err(BlockError::InvalidParameter)
    );
    assert_eq!(
        block_on(engine.erase_blocks(0, 0)),
        Err(BlockError::InvalidParameter)
    );
    assert_eq!(engine.host().state_polls, 0);
    assert!(engine.host().transfers.is_empty());
}

#[test]
fn short_buffer_is_rejected() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();

    let mut buf = Aligned::<BLOCK_SIZE>::zeroed();
    assert_eq!(
        block_on(engine.read_blocks(0, 2, &mut buf.0)),
        Err(BlockError::InvalidParameter)
    );
}

#[test]
fn io_before_init_reports_not_ready() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    let mut buf = Aligned::<BLOCK_SIZE>::zeroed();

    assert_eq!(
        block_on(engine.read_blocks(0, 1, &mut buf.0)),
        Err(BlockError::NotReady)
    );
    assert_eq!(block_on(engine.erase_blocks(0, 1)), Err(BlockError::NotReady));
}

#[test]
fn range_past_the_card_end_is_rejected() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();

    let mut buf = Aligned::<{ 2 * BLOCK_SIZE }>::zeroed();
    assert_eq!(
        block_on(engine.read_blocks(CARD_BLOCKS as u32 - 1, 2, &mut buf.0)),
        Err(BlockError::InvalidParameter)
    );
    assert_eq!(
        block_on(engine.erase_blocks(u32::MAX, 1)),
        Err(BlockError::InvalidParameter)
    );
}

#[test]
fn init_brings_up_a_four_bit_bus() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);

    engine.init().unwrap();

    let handle = engine.handle().copied().unwrap();
    assert_eq!(handle.bus.width, BusWidth::Four);
    assert_eq!(handle.bus.clock_div, EngineConfig::default().clock_div);
    assert_eq!(handle.info.block_count, CARD_BLOCKS as u32);
    assert!(engine.host().interrupts_attached);
    assert_eq!(engine.host().bus.map(|bus| bus.width), Some(BusWidth::Four));

    // A second init keeps the existing handle.
    engine.init().unwrap();
    assert_eq!(engine.handle().copied(), Some(handle));
}

#[test]
fn init_failure_is_translated_and_powers_down() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.host_mut().init_error = Some(flags::CMD_RSP_TIMEOUT);

    assert_eq!(engine.init(), Err(BlockError::Timeout));
    assert!(!engine.is_initialized());
    assert!(!engine.host().powered);
    assert!(!engine.host().interrupts_attached);
    assert_eq!(engine.last_error(), flags::CMD_RSP_TIMEOUT);
}

#[test]
fn read_after_init_returns_card_contents() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.host_mut().block_mut(0)[..4].copy_from_slice(b"BOOT");
    engine.init().unwrap();

    let mut buf = Aligned::<BLOCK_SIZE>::zeroed();
    block_on(engine.read_blocks(0, 1, &mut buf.0)).unwrap();

    assert_eq!(&buf.0[..4], b"BOOT");
    assert_eq!(buf.0, *engine.host().block(0));
}

#[test]
fn aligned_round_trip_uses_one_transfer_per_call() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();

    let data = Aligned(pattern(4 * BLOCK_SIZE, 7));
    block_on(engine.write_blocks(10, 4, &data.0)).unwrap();
    let mut back = Aligned::<{ 4 * BLOCK_SIZE }>::zeroed();
    block_on(engine.read_blocks(10, 4, &mut back.0)).unwrap();

    assert_eq!(back.0, data.0);
    assert_eq!(
        engine.host().transfers.as_slice(),
        &[
            TransferRequest::new(10, 4, Direction::Tx),
            TransferRequest::new(10, 4, Direction::Rx),
        ]
    );
    assert_eq!(engine.stats().staged_blocks, 0);
}

#[test]
fn misaligned_transfers_go_block_by_block_through_staging() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();

    let expected = pattern(3 * BLOCK_SIZE, 42);
    let mut src = Aligned::<{ 3 * BLOCK_SIZE + 4 }>::zeroed();
    let src = src.misaligned(3 * BLOCK_SIZE);
    src.copy_from_slice(&expected[..3 * BLOCK_SIZE]);
    block_on(engine.write_blocks(5, 3, src)).unwrap();

    let tx: heapless::Vec<_, 8> = engine.host().transfers.iter().copied().collect();
    assert_eq!(
        tx.as_slice(),
        &[
            TransferRequest::new(5, 1, Direction::Tx),
            TransferRequest::new(6, 1, Direction::Tx),
            TransferRequest::new(7, 1, Direction::Tx),
        ]
    );
    for index in 0..3 {
        let offset = index * BLOCK_SIZE;
        assert_eq!(
            engine.host().block(5 + index).as_slice(),
            &expected[offset..offset + BLOCK_SIZE]
        );
    }

    let mut dst = Aligned::<{ 3 * BLOCK_SIZE + 4 }>::zeroed();
    let dst = dst.misaligned(3 * BLOCK_SIZE);
    block_on(engine.read_blocks(5, 3, dst)).unwrap();
    assert_eq!(&dst[..], &expected[..3 * BLOCK_SIZE]);
    assert_eq!(engine.host().transfers.len(), 6);
    assert!(engine.host().transfers[3..]
        .iter()
        .all(|request| request.count == 1 && request.direction == Direction::Rx));
    assert_eq!(engine.stats().staged_blocks, 6);
}

#[test]
fn staged_writes_wait_for_programming_between_blocks() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();
    engine.host_mut().busy_after_write = 3;

    let mut src = Aligned::<{ 2 * BLOCK_SIZE + 4 }>::zeroed();
    let src = src.misaligned(2 * BLOCK_SIZE);
    src.fill(0x5A);
    block_on(engine.write_blocks(0, 2, src)).unwrap();

    // Three busy polls after the first block, one sleep per busy poll.
    assert_eq!(clock.sleeps(), 3);
    assert_eq!(engine.host().block(1), &[0x5A; BLOCK_SIZE]);
}

#[test]
fn missing_completion_times_out_after_the_scaled_timeout() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();
    engine.host_mut().drop_completions = true;

    let mut buf = Aligned::<{ 4 * BLOCK_SIZE }>::zeroed();
    let result = block_on(engine.read_blocks(0, 4, &mut buf.0));

    assert_eq!(result, Err(BlockError::Timeout));
    assert_eq!(clock.now_ms(), 4 * engine.config().block_timeout_ms);
    assert_eq!(engine.host().aborts, 1);
    assert_eq!(engine.stats().transfer_timeouts, 1);
}

#[test]
fn misaligned_timeout_stops_at_the_first_block() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();
    engine.host_mut().drop_completions = true;

    let mut buf = Aligned::<{ 3 * BLOCK_SIZE + 4 }>::zeroed();
    let result = block_on(engine.read_blocks(0, 3, buf.misaligned(3 * BLOCK_SIZE)));

    assert_eq!(result, Err(BlockError::Timeout));
    assert_eq!(clock.now_ms(), engine.config().block_timeout_ms);
    assert_eq!(engine.host().transfers.len(), 1);
    assert_eq!(engine.stats().staged_blocks, 0);
}

#[test]
fn stale_completion_does_not_satisfy_a_new_transfer() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();
    engine.host_mut().drop_completions = true;
    signals.complete(Direction::Rx);

    let mut buf = Aligned::<BLOCK_SIZE>::zeroed();
    assert_eq!(
        block_on(engine.read_blocks(0, 1, &mut buf.0)),
        Err(BlockError::Timeout)
    );
}

#[test]
fn busy_card_times_out_in_ready_wait() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();
    engine.host_mut().busy_polls = u32::MAX;

    let buf = Aligned::<BLOCK_SIZE>::zeroed();
    let result = block_on(engine.write_blocks(0, 1, &buf.0));

    assert_eq!(result, Err(BlockError::Timeout));
    assert_eq!(clock.now_ms(), engine.config().ready_timeout_ms);
    assert!(engine.host().transfers.is_empty());
    assert_eq!(engine.stats().ready_timeouts, 1);
}

#[test]
fn busy_card_that_settles_is_served() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();
    engine.host_mut().busy_polls = 5;

    let mut buf = Aligned::<BLOCK_SIZE>::zeroed();
    block_on(engine.read_blocks(3, 1, &mut buf.0)).unwrap();
    assert_eq!(clock.now_ms(), 5 * engine.config().ready_poll_ms);
}

#[test]
fn failed_transfer_is_translated() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();
    engine.host_mut().fail_next_transfer = Some(flags::DATA_CRC_FAIL);

    let mut buf = Aligned::<BLOCK_SIZE>::zeroed();
    assert_eq!(
        block_on(engine.read_blocks(0, 1, &mut buf.0)),
        Err(BlockError::Integrity)
    );
    assert_eq!(engine.last_error(), flags::DATA_CRC_FAIL);
    assert_eq!(engine.host().aborts, 0);

    block_on(engine.read_blocks(0, 1, &mut buf.0)).unwrap();
}

#[test]
fn erase_covers_the_half_open_range() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();

    block_on(engine.erase_blocks(2, 3)).unwrap();

    assert_eq!(engine.host().erases.as_slice(), &[(2, 4)]);
    assert_eq!(engine.host().block(4), &[0xFF; BLOCK_SIZE]);
    assert_eq!(engine.host().block(5), &[0x00; BLOCK_SIZE]);
}

#[test]
fn capacity_is_zero_when_the_card_cannot_be_queried() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);

    assert_eq!(engine.capacity(), 0);
    engine.init().unwrap();
    assert_eq!(engine.capacity(), (CARD_BLOCKS * BLOCK_SIZE) as u64);

    engine.host_mut().info_error = Some(flags::CMD_CRC_FAIL);
    assert_eq!(engine.capacity(), 0);
    assert_eq!(engine.last_error(), flags::CMD_CRC_FAIL);
}

#[test]
fn deinit_releases_the_card() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();

    engine.deinit().unwrap();
    assert!(!engine.is_initialized());
    assert!(!engine.host().powered);
    assert!(!engine.host().interrupts_attached);

    let mut buf = Aligned::<BLOCK_SIZE>::zeroed();
    assert_eq!(
        block_on(engine.read_blocks(0, 1, &mut buf.0)),
        Err(BlockError::NotReady)
    );
    assert_eq!(engine.deinit(), Ok(()));
}

#[test]
fn completion_landing_just_before_the_deadline_wins() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let timeout_ms = EngineConfig::default().block_timeout_ms;
    let interrupt = SimInterrupt::new(&clock, &signals, timeout_ms - 1);
    let mut engine = late_engine(&signals, &interrupt);
    engine.init().unwrap();
    engine.host_mut().block_mut(9).fill(0x3C);

    let mut buf = Aligned::<BLOCK_SIZE>::zeroed();
    block_on(engine.read_blocks(9, 1, &mut buf.0)).unwrap();

    assert_eq!(buf.0, [0x3C; BLOCK_SIZE]);
    assert_eq!(clock.now_ms(), timeout_ms - 1);
    assert_eq!(interrupt.raised(), 1);
    assert_eq!(engine.host().aborts, 0);
    assert_eq!(engine.stats().transfer_timeouts, 0);
}

#[test]
fn completion_landing_at_the_deadline_is_a_timeout() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let timeout_ms = EngineConfig::default().block_timeout_ms;
    let interrupt = SimInterrupt::new(&clock, &signals, timeout_ms);
    let mut engine = late_engine(&signals, &interrupt);
    engine.init().unwrap();

    let mut buf = Aligned::<BLOCK_SIZE>::zeroed();
    assert_eq!(
        block_on(engine.read_blocks(0, 1, &mut buf.0)),
        Err(BlockError::Timeout)
    );

    assert_eq!(clock.now_ms(), timeout_ms);
    assert_eq!(engine.host().aborts, 1);
    assert!(!interrupt.is_pending());
    assert_eq!(interrupt.raised(), 0);
}

#[test]
fn staged_blocks_each_wait_for_their_own_late_completion() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let interrupt = SimInterrupt::new(&clock, &signals, 10);
    let mut engine = late_engine(&signals, &interrupt);
    engine.init().unwrap();

    let mut src = Aligned::<{ 3 * BLOCK_SIZE + 4 }>::zeroed();
    let src = src.misaligned(3 * BLOCK_SIZE);
    src.fill(0x77);
    block_on(engine.write_blocks(20, 3, src)).unwrap();

    assert_eq!(clock.now_ms(), 30);
    assert_eq!(interrupt.raised(), 3);
    assert_eq!(engine.host().block(22), &[0x77; BLOCK_SIZE]);
}

#[test]
fn staged_failure_mid_run_stops_before_the_next_block() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();
    engine.host_mut().fail_transfer_at = Some((1, flags::DATA_CRC_FAIL));

    let mut buf = Aligned::<{ 3 * BLOCK_SIZE + 4 }>::zeroed();
    let result = block_on(engine.read_blocks(0, 3, buf.misaligned(3 * BLOCK_SIZE)));

    assert_eq!(result, Err(BlockError::Integrity));
    assert_eq!(
        engine.host().transfers.as_slice(),
        &[
            TransferRequest::new(0, 1, Direction::Rx),
            TransferRequest::new(1, 1, Direction::Rx),
        ]
    );
    assert_eq!(engine.stats().staged_blocks, 1);
    assert_eq!(engine.host().aborts, 0);
    assert_eq!(engine.last_error(), flags::DATA_CRC_FAIL);
}

#[test]
fn erase_failure_is_translated() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();
    engine.host_mut().erase_error = Some(flags::WP_ERASE_SKIP);

    assert_eq!(block_on(engine.erase_blocks(0, 4)), Err(BlockError::CardStatus));
    assert_eq!(engine.last_error(), flags::WP_ERASE_SKIP);
    assert!(engine.host().erases.is_empty());
    assert_eq!(engine.host().block(0), &[0x00; BLOCK_SIZE]);
}

#[test]
#[should_panic(expected = "sim transfer log holds 64 entries")]
fn sim_transfer_log_overflow_is_loud() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let mut engine = engine(&signals, &clock);
    engine.init().unwrap();
    let mut buf = Aligned::<BLOCK_SIZE>::zeroed();

    for _ in 0..=crate::sim::SIM_LOG_MAX {
        block_on(engine.read_blocks(0, 1, &mut buf.0)).unwrap();
    }
}

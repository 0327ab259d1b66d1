use embassy_futures::block_on;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};

use super::*;
use crate::{
    config::{EngineConfig, BLOCK_SIZE},
    error::flags,
    sim::{SimCard, SimClock},
    signal::TransferSignals,
};

const CARD_BLOCKS: usize = 16;

type TestEngine<'a> = BlockEngine<'a, SimCard<'a, CARD_BLOCKS>, &'a SimClock>;

#[repr(C, align(4))]
struct Block([u8; BLOCK_SIZE]);

fn shared<'a>(
    signals: &'a TransferSignals,
    clock: &'a SimClock,
) -> Mutex<CriticalSectionRawMutex, TestEngine<'a>> {
    Mutex::new(BlockEngine::new(
        SimCard::new(signals),
        clock,
        signals,
        EngineConfig::default(),
    ))
}

#[test]
fn two_holders_share_one_engine() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let engine = shared(&signals, &clock);
    let mut owner = &engine;
    let mut reader = &engine;

    block_on(owner.init()).unwrap();
    block_on(owner.write_blocks(4, 1, &Block([0x5E; BLOCK_SIZE]).0)).unwrap();

    let mut back = Block([0; BLOCK_SIZE]);
    block_on(reader.read_blocks(4, 1, &mut back.0)).unwrap();
    assert_eq!(back.0, [0x5E; BLOCK_SIZE]);
    assert_eq!(block_on(reader.capacity()), (CARD_BLOCKS * BLOCK_SIZE) as u64);
    assert_eq!(block_on(reader.stats()).transfers, 2);

    block_on(owner.power(false)).unwrap();
    assert_eq!(
        block_on(reader.read_blocks(4, 1, &mut back.0)),
        Err(BlockError::NotReady)
    );
    assert_eq!(block_on(reader.geometry()), None);
}

#[test]
fn held_lock_blocks_other_holders_until_released() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let engine = shared(&signals, &clock);
    let mut reader = &engine;

    let guard = engine.try_lock().unwrap();
    assert!(engine.try_lock().is_err());
    drop(guard);

    assert_eq!(block_on(reader.init()), Ok(()));
    assert!(block_on(reader.geometry()).is_some());
}

#[test]
fn errors_pass_through_the_lock() {
    let signals = TransferSignals::new();
    let clock = SimClock::new();
    let engine = shared(&signals, &clock);
    let mut handle = &engine;
    block_on(engine.lock()).host_mut().init_error = Some(flags::CMD_RSP_TIMEOUT);

    assert_eq!(block_on(handle.init()), Err(BlockError::Timeout));
    assert_eq!(block_on(engine.lock()).last_error(), flags::CMD_RSP_TIMEOUT);
}

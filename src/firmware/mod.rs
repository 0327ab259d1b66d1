//! Runtime wiring: the shared card engine, the presence task and the
//! telemetry task.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_executor::Spawner;
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex, once_lock::OnceLock,
};
use embassy_time::{Duration, Ticker};
use sdio_block::{clock::EmbassyClock, BlockEngine, TransferSignals};

use crate::{
    drivers::{card_detect, CardDetectLine, Esp32SdHost},
    presence::{PresenceMonitor, PresenceNotifier},
    telemetry,
    volume::VolumeProbe,
};

const TELEMETRY_INTERVAL_SECS: u64 = 60;

pub static SDIO_SIGNALS: TransferSignals = TransferSignals::new();
pub static CARD_DETECT: PresenceNotifier = PresenceNotifier::new();
static CARD_ENGINE: OnceLock<SharedCardEngine> = OnceLock::new();
static MONITOR_RUNNING: AtomicBool = AtomicBool::new(false);

pub type CardEngine = BlockEngine<'static, Esp32SdHost, EmbassyClock>;
/// One engine per slot; the monitor and application tasks each lock it per
/// operation.
pub type SharedCardEngine = Mutex<CriticalSectionRawMutex, CardEngine>;
pub type CardMonitor =
    PresenceMonitor<CardDetectLine, EmbassyClock, &'static SharedCardEngine, VolumeProbe>;

/// Publishes `engine` as the slot's shared engine. A second call keeps the
/// first engine and drops the new one.
pub fn share_card_engine(engine: CardEngine) -> &'static SharedCardEngine {
    if CARD_ENGINE.is_set() {
        log::warn!("sdio: engine_already_shared");
    }
    CARD_ENGINE.get_or_init(|| Mutex::new(engine))
}

/// Handle for application tasks doing block I/O next to the monitor.
pub fn card_engine() -> Option<&'static SharedCardEngine> {
    CARD_ENGINE.try_get()
}

/// Arms card-detect and starts the presence task. Returns `false` when a
/// monitor is already running.
pub fn monitor_init(spawner: Spawner, monitor: CardMonitor) -> bool {
    if MONITOR_RUNNING.swap(true, Ordering::AcqRel) {
        log::warn!("sdmon: init_skipped reason=running");
        return false;
    }
    CARD_DETECT.arm();
    card_detect::set_listening(true);
    spawner.must_spawn(presence_task(monitor));
    true
}

/// Disarms card-detect and asks the presence task to stop after its
/// current pass.
pub fn monitor_deinit() {
    card_detect::set_listening(false);
    CARD_DETECT.request_stop();
}

pub fn monitor_running() -> bool {
    MONITOR_RUNNING.load(Ordering::Acquire)
}

#[embassy_executor::task]
async fn presence_task(mut monitor: CardMonitor) {
    monitor.run(&CARD_DETECT).await;
    MONITOR_RUNNING.store(false, Ordering::Release);
}

#[embassy_executor::task]
pub async fn telemetry_task() {
    let mut ticker = Ticker::every(Duration::from_secs(TELEMETRY_INTERVAL_SECS));
    loop {
        ticker.next().await;
        telemetry::log_snapshot();
    }
}

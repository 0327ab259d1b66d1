use core::sync::atomic::{AtomicU32, Ordering};

use crate::presence::{CardPresence, MonitorAction};

static MONITOR_PASSES: AtomicU32 = AtomicU32::new(0);
static MONITOR_UNSTABLE: AtomicU32 = AtomicU32::new(0);
static CARD_MOUNTS: AtomicU32 = AtomicU32::new(0);
static CARD_MOUNT_FAILURES: AtomicU32 = AtomicU32::new(0);
static CARD_UNMOUNTS: AtomicU32 = AtomicU32::new(0);
static CARD_UNMOUNT_FAILURES: AtomicU32 = AtomicU32::new(0);
static CARD_NOT_INSERTED_PROPERLY: AtomicU32 = AtomicU32::new(0);
static SDIO_TRANSFER_TIMEOUTS: AtomicU32 = AtomicU32::new(0);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub monitor_passes: u32,
    pub monitor_unstable: u32,
    pub card_mounts: u32,
    pub card_mount_failures: u32,
    pub card_unmounts: u32,
    pub card_unmount_failures: u32,
    pub card_not_inserted_properly: u32,
    pub sdio_transfer_timeouts: u32,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        monitor_passes: MONITOR_PASSES.load(Ordering::Relaxed),
        monitor_unstable: MONITOR_UNSTABLE.load(Ordering::Relaxed),
        card_mounts: CARD_MOUNTS.load(Ordering::Relaxed),
        card_mount_failures: CARD_MOUNT_FAILURES.load(Ordering::Relaxed),
        card_unmounts: CARD_UNMOUNTS.load(Ordering::Relaxed),
        card_unmount_failures: CARD_UNMOUNT_FAILURES.load(Ordering::Relaxed),
        card_not_inserted_properly: CARD_NOT_INSERTED_PROPERLY.load(Ordering::Relaxed),
        sdio_transfer_timeouts: SDIO_TRANSFER_TIMEOUTS.load(Ordering::Relaxed),
    }
}

pub fn record_monitor_action(presence: CardPresence, action: MonitorAction) {
    MONITOR_PASSES.fetch_add(1, Ordering::Relaxed);
    if presence == CardPresence::Unstable {
        MONITOR_UNSTABLE.fetch_add(1, Ordering::Relaxed);
    }
    let counter = match action {
        MonitorAction::Mounted => &CARD_MOUNTS,
        MonitorAction::MountFailed(_) => &CARD_MOUNT_FAILURES,
        MonitorAction::Unmounted => &CARD_UNMOUNTS,
        MonitorAction::UnmountFailed(_) => &CARD_UNMOUNT_FAILURES,
        MonitorAction::NotInsertedProperly => &CARD_NOT_INSERTED_PROPERLY,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Folds in the engine's own timeout count, which only grows.
pub fn record_transfer_timeouts(total: u32) {
    SDIO_TRANSFER_TIMEOUTS.fetch_max(total, Ordering::Relaxed);
}

pub fn log_snapshot() {
    let s = snapshot();
    log::info!(
        "telemetry: sdmon passes={} unstable={} mounts={} mount_fail={} unmounts={} unmount_fail={} not_inserted={} sdio_timeouts={}",
        s.monitor_passes,
        s.monitor_unstable,
        s.card_mounts,
        s.card_mount_failures,
        s.card_unmounts,
        s.card_unmount_failures,
        s.card_not_inserted_properly,
        s.sdio_transfer_timeouts
    );
}

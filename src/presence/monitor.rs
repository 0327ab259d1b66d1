use embedded_hal::digital::InputPin;
use sdio_block::{BlockDevice, Clock};

use super::{
    debounce::{debounce, CardPresence},
    notify::{PresenceEvent, PresenceNotifier},
};
use crate::{
    config::MonitorConfig,
    mount::{FsMount, MountDescriptor, MountError},
    telemetry,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    WaitNotification,
    Debouncing,
    StableInserted,
    StableRemoved,
    Unstable,
}

/// Outcome of one debounce pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorAction {
    Mounted,
    MountFailed(MountError),
    Unmounted,
    UnmountFailed(MountError),
    NotInsertedProperly,
}

impl MonitorAction {
    pub fn label(self) -> &'static str {
        match self {
            MonitorAction::Mounted => "mounted",
            MonitorAction::MountFailed(_) => "mount_failed",
            MonitorAction::Unmounted => "unmounted",
            MonitorAction::UnmountFailed(_) => "unmount_failed",
            MonitorAction::NotInsertedProperly => "not_inserted_properly",
        }
    }
}

/// Owns the card-detect line, the block device and the filesystem layer,
/// and is the only writer of the mounted flag.
pub struct PresenceMonitor<P, C, D, F> {
    pin: P,
    clock: C,
    device: D,
    fs: F,
    config: MonitorConfig,
    mounted: bool,
    state: MonitorState,
}

impl<P, C, D, F> PresenceMonitor<P, C, D, F>
where
    P: InputPin,
    C: Clock,
    D: BlockDevice,
    F: FsMount,
{
    pub fn new(pin: P, clock: C, device: D, fs: F, config: MonitorConfig) -> Self {
        Self {
            pin,
            clock,
            device,
            fs,
            config,
            mounted: false,
            state: MonitorState::WaitNotification,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    pub fn pin_mut(&mut self) -> &mut P {
        &mut self.pin
    }

    /// Boot pass, then one pass per notification until a stop request.
    pub async fn run(&mut self, notifier: &PresenceNotifier) {
        log::info!(
            "sdmon: start path={} poll_ms={} timeout_ms={}",
            self.config.mount_path,
            self.config.poll_interval_ms,
            self.config.debounce_timeout_ms
        );
        let mut stop = self.settle(notifier).await;

        while !stop {
            self.state = MonitorState::WaitNotification;
            if notifier.wait().await == PresenceEvent::Stop {
                break;
            }
            stop = self.settle(notifier).await;
        }

        self.state = MonitorState::WaitNotification;
        log::info!("sdmon: stop mounted={}", self.mounted as u8);
    }

    /// Repeats the pass while edges keep arriving during mount or unmount.
    /// Returns `true` once a stop request has been taken off the queue.
    async fn settle(&mut self, notifier: &PresenceNotifier) -> bool {
        loop {
            let presence = self.sample().await;
            // Edges raised while sampling are covered by the debounce result.
            let sampled = notifier.drain();
            let action = self.handle(presence).await;
            self.report(presence, action).await;

            let late = notifier.drain();
            if sampled.stop || late.stop {
                return true;
            }
            if late.edges == 0 {
                return false;
            }
            log::info!(
                "sdmon: recheck edges={} action={}",
                late.edges,
                action.label()
            );
        }
    }

    /// One debounce pass followed by the matching mount or unmount.
    pub async fn poll_presence(&mut self) -> MonitorAction {
        let presence = self.sample().await;
        let action = self.handle(presence).await;
        self.report(presence, action).await;
        action
    }

    async fn sample(&mut self) -> CardPresence {
        self.state = MonitorState::Debouncing;
        let presence = debounce(&mut self.pin, &self.clock, &self.config).await;
        self.state = match presence {
            CardPresence::Inserted => MonitorState::StableInserted,
            CardPresence::Removed => MonitorState::StableRemoved,
            CardPresence::Unstable => MonitorState::Unstable,
        };
        presence
    }

    pub async fn handle(&mut self, presence: CardPresence) -> MonitorAction {
        match (presence, self.mounted) {
            (CardPresence::Inserted, false) => self.mount().await,
            (CardPresence::Removed, true) => self.unmount().await,
            _ => MonitorAction::NotInsertedProperly,
        }
    }

    async fn mount(&mut self) -> MonitorAction {
        let mut descriptor = MountDescriptor::open(
            self.config.mount_path,
            &mut self.device,
            self.config.sector_size,
        )
        .await;
        match self.fs.mount(&mut descriptor).await {
            Ok(()) => {
                self.mounted = true;
                MonitorAction::Mounted
            }
            Err(err) => MonitorAction::MountFailed(err),
        }
    }

    async fn unmount(&mut self) -> MonitorAction {
        let result = {
            let mut descriptor = MountDescriptor::open(
                self.config.mount_path,
                &mut self.device,
                self.config.sector_size,
            )
            .await;
            self.fs.unmount(&mut descriptor, true).await
        };
        if let Err(err) = result {
            return MonitorAction::UnmountFailed(err);
        }

        self.mounted = false;
        if let Err(err) = self.device.deinit().await {
            log::warn!("sdmon: deinit_failed err={}", err.label());
        }
        MonitorAction::Unmounted
    }

    async fn report(&self, presence: CardPresence, action: MonitorAction) {
        telemetry::record_monitor_action(presence, action);
        telemetry::record_transfer_timeouts(self.device.stats().await.transfer_timeouts);
        let path = self.config.mount_path;
        match action {
            MonitorAction::Mounted => log::info!("sdmon: card mounted path={}", path),
            MonitorAction::Unmounted => log::info!("sdmon: card unmounted path={}", path),
            MonitorAction::MountFailed(err) | MonitorAction::UnmountFailed(err) => log::warn!(
                "sdmon: {} path={} err={}",
                action.label(),
                path,
                err.label()
            ),
            MonitorAction::NotInsertedProperly => log::warn!(
                "sdmon: card not inserted properly presence={} mounted={}",
                presence.label(),
                self.mounted as u8
            ),
        }
    }
}

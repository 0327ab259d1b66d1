use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};

use crate::config::PRESENCE_QUEUE_DEPTH;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceEvent {
    CardDetectEdge,
    Stop,
}

/// What [`PresenceNotifier::drain`] took off the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Drained {
    pub edges: u32,
    pub stop: bool,
}

/// Wakes the monitor task from the card-detect interrupt.
pub struct PresenceNotifier {
    events: Channel<CriticalSectionRawMutex, PresenceEvent, PRESENCE_QUEUE_DEPTH>,
    armed: AtomicBool,
}

impl PresenceNotifier {
    pub const fn new() -> Self {
        Self {
            events: Channel::new(),
            armed: AtomicBool::new(false),
        }
    }

    /// Drops anything queued while disarmed and starts accepting edges.
    pub fn arm(&self) {
        while self.events.try_receive().is_ok() {}
        self.armed.store(true, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Interrupt-side entry. Returns `false` when the edge was ignored.
    /// A full queue still counts as delivered: the monitor coalesces edges.
    pub fn notify_edge(&self) -> bool {
        if !self.is_armed() {
            return false;
        }
        let _ = self.events.try_send(PresenceEvent::CardDetectEdge);
        true
    }

    pub fn request_stop(&self) {
        self.disarm();
        if self.events.try_send(PresenceEvent::Stop).is_err() {
            while self.events.try_receive().is_ok() {}
            let _ = self.events.try_send(PresenceEvent::Stop);
        }
    }

    pub async fn wait(&self) -> PresenceEvent {
        self.events.receive().await
    }

    /// Empties the queue and reports what was in it.
    pub fn drain(&self) -> Drained {
        let mut drained = Drained::default();
        while let Ok(event) = self.events.try_receive() {
            match event {
                PresenceEvent::CardDetectEdge => drained.edges += 1,
                PresenceEvent::Stop => drained.stop = true,
            }
        }
        drained
    }
}

impl Default for PresenceNotifier {
    fn default() -> Self {
        Self::new()
    }
}

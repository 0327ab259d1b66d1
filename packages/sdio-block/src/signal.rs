use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};

use crate::host::Direction;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferEvent {
    Complete,
    /// Raw host error flags captured by the error interrupt.
    Failed(u32),
}

/// Completion slots shared between the SD host interrupt and the engine.
///
/// Each direction holds at most one pending event; extra events raised
/// before the engine consumes the first are dropped.
pub struct TransferSignals {
    rx: Channel<CriticalSectionRawMutex, TransferEvent, 1>,
    tx: Channel<CriticalSectionRawMutex, TransferEvent, 1>,
}

impl TransferSignals {
    pub const fn new() -> Self {
        Self {
            rx: Channel::new(),
            tx: Channel::new(),
        }
    }

    fn slot(&self, direction: Direction) -> &Channel<CriticalSectionRawMutex, TransferEvent, 1> {
        match direction {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }

    /// Interrupt context: the DMA transfer finished.
    pub fn complete(&self, direction: Direction) {
        let _ = self.slot(direction).try_send(TransferEvent::Complete);
    }

    /// Interrupt context: the host flagged an error for the transfer.
    pub fn fail(&self, direction: Direction, code: u32) {
        let _ = self.slot(direction).try_send(TransferEvent::Failed(code));
    }

    pub fn clear(&self, direction: Direction) {
        while self.slot(direction).try_receive().is_ok() {}
    }

    pub fn clear_all(&self) {
        self.clear(Direction::Rx);
        self.clear(Direction::Tx);
    }

    pub fn try_take(&self, direction: Direction) -> Option<TransferEvent> {
        self.slot(direction).try_receive().ok()
    }

    pub async fn wait(&self, direction: Direction) -> TransferEvent {
        self.slot(direction).receive().await
    }
}

impl Default for TransferSignals {
    fn default() -> Self {
        Self::new()
    }
}

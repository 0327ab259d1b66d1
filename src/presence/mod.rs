//! Card-detect presence monitor: debounces the card-detect line and drives
//! mount/unmount on stable transitions.

mod debounce;
mod monitor;
mod notify;

pub use debounce::{debounce, CardPresence, DEBOUNCE_SEED};
pub use monitor::{MonitorAction, MonitorState, PresenceMonitor};
pub use notify::{Drained, PresenceEvent, PresenceNotifier};

#![no_std]

pub mod config;
#[cfg(feature = "firmware")]
pub mod drivers;
#[cfg(feature = "firmware")]
pub mod firmware;
pub mod mount;
pub mod presence;
pub mod telemetry;
pub mod volume;

pub use config::MonitorConfig;
pub use mount::{FsMount, Geometry, MountDescriptor, MountError};
pub use presence::{
    debounce, CardPresence, Drained, MonitorAction, MonitorState, PresenceEvent,
    PresenceMonitor, PresenceNotifier,
};
pub use volume::{Filesystem, MountedVolume, VolumeProbe};

pub const CARD_MOUNT_PATH: &str = "/sd";
pub const CARD_DETECT_POLL_MS: u64 = 5;
pub const CARD_DEBOUNCE_TIMEOUT_MS: u64 = 500;
/// Erase granularity exposed to the filesystem, in bytes.
pub const CARD_SECTOR_SIZE: u32 = 4_096;
pub const PRESENCE_QUEUE_DEPTH: usize = 4;
pub const VOLUME_TABLE_MAX: usize = 2;
pub const VOLUME_LABEL_MAX: usize = 11;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    pub mount_path: &'static str,
    pub poll_interval_ms: u64,
    pub debounce_timeout_ms: u64,
    pub sector_size: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mount_path: CARD_MOUNT_PATH,
            poll_interval_ms: CARD_DETECT_POLL_MS,
            debounce_timeout_ms: CARD_DEBOUNCE_TIMEOUT_MS,
            sector_size: CARD_SECTOR_SIZE,
        }
    }
}

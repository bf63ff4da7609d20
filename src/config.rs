use crate::protocol::dfu_uuids;

use std::time::Duration;
use uuid::Uuid;

/// Payload bytes per data point write
pub const DEFAULT_DATA_PACKET_SIZE: usize = 20;
/// Wait for a control point response
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(20_000);
/// Attempts per object before giving up
pub const MAX_RETRIES: u32 = 3;
// first object frequently fails on macOS, backoff seems to help
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Tunables of a DFU session
#[derive(Debug, Clone)]
pub struct DfuConfig {
    pub control_point: Uuid,
    pub data_point: Uuid,
    pub packet_size: usize,
    /// Packets between checksum requests, 0 disables in-stream checks
    pub prn: u16,
    pub command_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for DfuConfig {
    fn default() -> Self {
        DfuConfig {
            control_point: dfu_uuids::CTRL_PT,
            data_point: dfu_uuids::DATA_PT,
            packet_size: DEFAULT_DATA_PACKET_SIZE,
            prn: 0,
            command_timeout: DEFAULT_TIMEOUT,
            max_retries: MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

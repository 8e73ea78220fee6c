//! Default configuration constants for netplayer.
//!
//! Shared by the config types and the pipeline so both agree on the same values.

/// Number of equalizer bands per channel.
pub const EQUALIZER_BANDS: usize = 10;

/// Number of channels the equalizer gain table covers.
pub const EQUALIZER_CHANNELS: usize = 2;

/// Lowest gain the equalizer accepts, in dB.
pub const EQUALIZER_MIN_GAIN_DB: i32 = -13;

/// Default per-band equalizer gain in dB, first channel then second channel.
///
/// Length is `EQUALIZER_BANDS * EQUALIZER_CHANNELS`.
pub const EQUALIZER_DEFAULT_GAIN_TABLE: [i32; EQUALIZER_BANDS * EQUALIZER_CHANNELS] = [
    10, 10, 8, 4, 2, 0, 0, 2, 4, 6, //
    10, 10, 8, 4, 2, 0, 0, 2, 4, 6,
];

/// Capacity of the control event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 16;

/// Capacity, in blocks, of each link between adjacent elements.
pub const LINK_CAPACITY: usize = 8;

/// How long `stop()` waits for every element task to exit.
pub const STOP_TIMEOUT_MS: u64 = 2000;

/// Default wait per event poll in the player loop.
pub const POLL_INTERVAL_MS: u64 = 500;

/// How long an element blocks on a full event queue before dropping the message.
pub const EVENT_SEND_TIMEOUT_MS: u64 = 50;

/// How often a blocked element task re-checks its run state.
pub const TASK_POLL_MS: u64 = 10;

/// Name advertised when the device acts as a wireless sink.
pub const WIRELESS_DEVICE_NAME: &str = "NetPlayer";

/// Own name when the device acts as a wireless source.
pub const WIRELESS_SOURCE_NAME: &str = "ESP-ADF-SOURCE";

/// Remote speaker the wireless source connects to.
pub const WIRELESS_REMOTE_NAME: &str = "DL-LINK";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_table_matches_band_layout() {
        assert_eq!(
            EQUALIZER_DEFAULT_GAIN_TABLE.len(),
            EQUALIZER_BANDS * EQUALIZER_CHANNELS
        );
        let (left, right) = EQUALIZER_DEFAULT_GAIN_TABLE.split_at(EQUALIZER_BANDS);
        assert_eq!(left, right);
        assert!(
            EQUALIZER_DEFAULT_GAIN_TABLE
                .iter()
                .all(|&g| g >= EQUALIZER_MIN_GAIN_DB)
        );
    }
}

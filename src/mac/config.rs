
use crate::neighbors::NeighborTable;
use crate::queue::FrameQueue;

/// Storage for MAC frame queues (capacity plus ACK headroom)
pub const QUEUE_STORAGE: usize = 16;

/// Storage for the neighbor table
pub const NEIGHBOR_STORAGE: usize = 64;

/// Longest offset from now that wrapping time comparisons still order correctly
pub const MAX_DELAY_MS: u32 = i32::MAX as u32;

/// Frame queue used by the MAC, for both transmit and receive
pub type MacQueue = FrameQueue<QUEUE_STORAGE>;

/// Neighbor table used by the MAC
pub type MacNeighbors = NeighborTable<NEIGHBOR_STORAGE>;

/// Configuration for the FANET MAC
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// MAC tick period in ms
    pub slot_ms: u32,

    /// Number of non-ACK frames held in the transmit queue
    pub queue_capacity: usize,

    /// Free transmit queue slots kept back from relayed frames
    pub forward_queue_reserve: usize,

    /// Neighbor table size
    pub neighbor_capacity: usize,

    /// Time after which a silent neighbor is dropped in ms
    pub neighbor_timeout_ms: u32,

    /// Minimum spacing between two transmissions in ms
    pub min_tx_spacing_ms: u32,

    /// Wait for an ACK after the last retransmission in ms
    pub ack_timeout_ms: u32,

    /// Retransmission spacing step in ms, the n-th retry waits n steps
    pub retry_interval_ms: u32,

    /// Transmissions of a frame requesting an acknowledgement
    pub max_retries: u8,

    /// Minimum backoff exponent
    pub min_be: u8,
    /// Maximum backoff exponent
    pub max_be: u8,

    /// Frames received above this RSSI are not relayed
    pub forward_max_rssi: i16,

    /// RSSI improvement over a queued relay at which the relay is dropped
    pub forward_min_db_boost: i16,

    /// Relay delay window in ms
    pub forward_delay_min_ms: u32,
    pub forward_delay_max_ms: u32,

    /// App broadcasts are forwardable while the neighbor count does not exceed this
    pub max_neighbors_two_hop_tracking: usize,

    /// Below this neighbor count transmissions use robust coding
    pub robust_coding_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slot_ms: 20,

            queue_capacity: 8,
            forward_queue_reserve: 3,

            neighbor_capacity: 64,
            neighbor_timeout_ms: 250 * 1000,

            min_tx_spacing_ms: 50,
            ack_timeout_ms: 1000,
            retry_interval_ms: 1000,
            max_retries: 3,

            min_be: 7,
            max_be: 12,

            forward_max_rssi: -90,
            forward_min_db_boost: 20,
            forward_delay_min_ms: 100,
            forward_delay_max_ms: 300,

            max_neighbors_two_hop_tracking: 5,
            robust_coding_threshold: 8,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Backoff exponents must satisfy 1 <= min_be <= max_be <= 30
    BackoffExponent,
    /// Forward delay window is inverted
    ForwardDelay,
    /// Queue capacity exceeds storage (less ACK headroom)
    QueueCapacity,
    /// Neighbor capacity exceeds storage
    NeighborCapacity,
    /// A timeout or retry schedule reaches beyond [`MAX_DELAY_MS`]
    Timing,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_be == 0 || self.min_be > self.max_be || self.max_be > 30 {
            return Err(ConfigError::BackoffExponent);
        }

        if self.forward_delay_min_ms > self.forward_delay_max_ms {
            return Err(ConfigError::ForwardDelay);
        }

        if self.queue_capacity == 0 || self.queue_capacity >= QUEUE_STORAGE {
            return Err(ConfigError::QueueCapacity);
        }

        if self.neighbor_capacity > NEIGHBOR_STORAGE {
            return Err(ConfigError::NeighborCapacity);
        }

        // Retry spacing grows by one interval per transmission
        let retry_span = (self.retry_interval_ms as u64) * (self.max_retries as u64);

        let delays = [
            self.ack_timeout_ms as u64,
            retry_span,
            self.forward_delay_max_ms as u64,
            self.min_tx_spacing_ms as u64,
            self.neighbor_timeout_ms as u64,
        ];
        if delays.iter().any(|d| *d > MAX_DELAY_MS as u64) {
            return Err(ConfigError::Timing);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn invalid_configs() {
        let c = Config{ min_be: 0, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::BackoffExponent));

        let c = Config{ min_be: 9, max_be: 8, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::BackoffExponent));

        let c = Config{ forward_delay_min_ms: 400, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::ForwardDelay));

        let c = Config{ queue_capacity: QUEUE_STORAGE, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::QueueCapacity));

        let c = Config{ neighbor_capacity: NEIGHBOR_STORAGE + 1, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::NeighborCapacity));

        let c = Config{ max_be: 31, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::BackoffExponent));
    }

    #[test]
    fn timing_limited_to_wrap_window() {
        let c = Config{ ack_timeout_ms: MAX_DELAY_MS, ..Default::default() };
        assert_eq!(c.validate(), Ok(()));

        let c = Config{ ack_timeout_ms: MAX_DELAY_MS + 1, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::Timing));

        // Product overflows u32
        let c = Config{ retry_interval_ms: u32::MAX / 2, max_retries: 3, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::Timing));

        let c = Config{ retry_interval_ms: MAX_DELAY_MS / 3, max_retries: 3, ..Default::default() };
        assert_eq!(c.validate(), Ok(()));

        let c = Config{ neighbor_timeout_ms: u32::MAX, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::Timing));
    }
}

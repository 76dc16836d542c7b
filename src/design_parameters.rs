//! # Design Parameters
//! This module contains design constraints arbitrarily imposed on the library.

/// Default number of MAC instances a registry can hold. One MCDMA engine exposes at most 16
/// channels, and every MAC owns at least one of them.
pub const DEFAULT_MAX_INSTANCES: usize = 16;

/// The maximum length of an instance display name, e.g. the network interface name.
pub const MAX_NAME_LEN: usize = 16;

/// The maximum number of receive DMA queues a single instance may own.
pub const MAX_RX_QUEUES: u8 = 16;

/// Time after which a transmitted PTP packet with no matching departure timestamp is dropped.
pub const TX_TIMESTAMP_TIMEOUT_MS: u32 = 100;

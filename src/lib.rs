#![no_std]
//! # MCDMA Share
//!
//! Reset coordination for several Ethernet MAC instances that multiplex one multichannel DMA
//! (MCDMA) engine.
//!
//! Every MAC registers itself with a [Registry] when it is probed. As the MAC is opened, closed, or
//! sees a DMA error, it reports a [McdmaEvent]. Before touching the DMA reset bit, the MAC asks
//! [Registry::should_reset] whether the shared engine may actually be reset now. The returned
//! [ResetDecision] also lists the peers whose receive rings must be re-synchronised by their
//! DMA-error handlers; the caller hands those to its [DmaRecovery] implementation once the
//! registry lock has been released.
//!
//! The [ptp] module carries the departure timestamp matcher used by PHYs that capture PTP
//! transmit timestamps in registers.
//!
//! ```
//! use mcdma_share::{InstanceConfig, McdmaEvent, Registry};
//!
//! static REGISTRY: Registry<u8, 4> = Registry::new();
//!
//! REGISTRY.register(InstanceConfig::new(0).name("eth0").unwrap()).unwrap();
//! REGISTRY.register(InstanceConfig::new(1).name("eth1").unwrap()).unwrap();
//!
//! // The first MAC to open drives the one-time reset of the shared engine.
//! assert!(REGISTRY.should_reset(&0).granted());
//! assert!(!REGISTRY.should_reset(&1).granted());
//!
//! REGISTRY.event(&0, McdmaEvent::OpenComplete);
//! ```

pub mod arbiter;
pub mod design_parameters;
pub mod instance;
pub mod member;
pub mod ptp;
pub mod recovery;
pub mod registry;
pub mod state;

pub use arbiter::ResetDecision;
pub use instance::InstanceConfig;
pub use member::Member;
pub use recovery::{DmaRecovery, PeerRecovery};
pub use registry::Registry;
pub use state::{McdmaEvent, McdmaState};

#[cfg(feature = "logging")]
pub(crate) use log::{debug, error, info, warn};

#[cfg(not(feature = "logging"))]
mod mcdma_log {
    macro_rules! debug {
        ($($arg:tt)+) => {{
            let _ = format_args!($($arg)+);
        }};
    }

    macro_rules! info {
        ($($arg:tt)+) => {{
            let _ = format_args!($($arg)+);
        }};
    }

    macro_rules! mcdma_warn {
        ($($arg:tt)+) => {{
            let _ = format_args!($($arg)+);
        }};
    }

    macro_rules! error {
        ($($arg:tt)+) => {{
            let _ = format_args!($($arg)+);
        }};
    }

    pub(crate) use debug;
    pub(crate) use error;
    pub(crate) use info;
    pub(crate) use mcdma_warn as warn;
}

#[cfg(not(feature = "logging"))]
pub(crate) use mcdma_log::{debug, error, info, warn};

/// Possible errors encountered while configuring or feeding the coordination layer.
///
/// # Note
/// Arbitration and event reporting never fail. Requests made on behalf of an instance that was
/// never registered are logged and answered with a safe default instead.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Error {
    /// The registry has no free slot for another instance.
    RegistryFull,

    /// A handle to an instance with the same identity already exists.
    AlreadyAttached,

    /// The instance name does not fit in [design_parameters::MAX_NAME_LEN] bytes.
    NameTooLong,

    /// An instance must own between one and [design_parameters::MAX_RX_QUEUES] receive queues.
    InvalidQueueCount,

    /// The pending transmit timestamp queue is full.
    QueueFull,

    /// The timestamp configuration carried flag bits that are reserved.
    ReservedFlags,

    /// The requested timestamping mode or receive filter is not supported.
    UnsupportedMode,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Error::RegistryFull => "No free registry slot",
                Error::AlreadyAttached => "Instance already attached",
                Error::NameTooLong => "Instance name too long",
                Error::InvalidQueueCount => "Invalid receive queue count",
                Error::QueueFull => "Timestamp queue full",
                Error::ReservedFlags => "Reserved configuration flags set",
                Error::UnsupportedMode => "Unsupported timestamping mode",
            }
        )
    }
}

//! PTP departure timestamp matching
//!
//! # Design
//! PHYs with an embedded PTP timestamper capture the departure time of event messages in a set of
//! registers instead of writing it back into the packet. Transmitted packets that want a
//! timestamp are parked in a bounded queue, tagged with their PTP sequence id and a deadline.
//! Deferred work then reads departure timestamps out of the PHY and pairs them with the parked
//! packets. Packets whose timestamp never shows up are expired from the head of the queue once
//! their deadline passes.
//!
//! Packets are opaque to this module. They are handed back to the caller through [Completion]s so
//! the caller can deliver, free, or report them.
use crate::{design_parameters::TX_TIMESTAMP_TIMEOUT_MS, warn, Error};
use bit_field::BitField;
use embedded_time::{duration::Milliseconds, Clock, Instant};
use heapless::Deque;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Transmit timestamping modes, numbered as in the hardware timestamping configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TxTimestampMode {
    Off = 0,
    On = 1,
    OneStepSync = 2,
    OneStepP2p = 3,
}

/// PTP message types carried in the low nibble of the first header byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PtpMessageType {
    Sync = 0x0,
    DelayReq = 0x1,
    PdelayReq = 0x2,
    PdelayResp = 0x3,
    FollowUp = 0x8,
    DelayResp = 0x9,
    PdelayRespFollowUp = 0xA,
    Announce = 0xB,
    Signaling = 0xC,
    Management = 0xD,
}

/// Receive timestamp filters, numbered as in the hardware timestamping configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum RxFilter {
    None = 0,
    All = 1,
    PtpV1L4Event = 3,
    PtpV1L4Sync = 4,
    PtpV1L4DelayReq = 5,
    PtpV2L4Event = 6,
    PtpV2L4Sync = 7,
    PtpV2L4DelayReq = 8,
    PtpV2L2Event = 9,
    PtpV2L2Sync = 10,
    PtpV2L2DelayReq = 11,
    PtpV2Event = 12,
    PtpV2Sync = 13,
    PtpV2DelayReq = 14,
}

/// Which PTP transports the receive path timestamps.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PtpTransport {
    None,
    L2,
    L4,
    Any,
}

/// The transport-specific field check programmed into the PHY port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportSpecific {
    Ieee1588,
    Ieee8021As,
    Either,
}

/// A hardware timestamping request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimestampConfig {
    pub flags: u32,
    pub tx_type: u8,
    pub rx_filter: u8,
}

/// The PHY settings derived from a [TimestampConfig].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimestampSettings {
    pub tx_mode: TxTimestampMode,

    /// The receive filter actually applied, which may be broader than the one requested.
    pub rx_filter: RxFilter,
    pub rx_enabled: bool,
    pub transport: PtpTransport,

    /// The PTP version timestamped on receive, zero when receive timestamping is off.
    pub version: u8,
    pub transport_specific: TransportSpecific,

    /// Enable message types on the receive path. All or nothing.
    pub message_filter: u16,

    /// Configure the PHY for one-step operation.
    pub one_step: bool,

    /// Start the PTP port. Only done for two-step transmit timestamping.
    pub start: bool,
}

impl TimestampConfig {
    /// Validate and normalise the request.
    pub fn apply(&self) -> Result<TimestampSettings, Error> {
        // Flags are reserved for future extensions.
        if self.flags != 0 {
            return Err(Error::ReservedFlags);
        }

        let tx_mode =
            TxTimestampMode::try_from(self.tx_type).map_err(|_| Error::UnsupportedMode)?;
        let requested =
            RxFilter::try_from(self.rx_filter).map_err(|_| Error::UnsupportedMode)?;

        let (rx_filter, transport, version, transport_specific) = match requested {
            RxFilter::None => (
                RxFilter::None,
                PtpTransport::None,
                0,
                TransportSpecific::Ieee1588,
            ),
            RxFilter::PtpV1L4Event | RxFilter::PtpV1L4Sync | RxFilter::PtpV1L4DelayReq => (
                RxFilter::PtpV1L4Event,
                PtpTransport::L4,
                1,
                TransportSpecific::Ieee1588,
            ),
            RxFilter::PtpV2L4Event | RxFilter::PtpV2L4Sync | RxFilter::PtpV2L4DelayReq => (
                RxFilter::PtpV2L4Event,
                PtpTransport::L4,
                2,
                TransportSpecific::Ieee1588,
            ),
            RxFilter::PtpV2L2Event | RxFilter::PtpV2L2Sync | RxFilter::PtpV2L2DelayReq => (
                RxFilter::PtpV2L2Event,
                PtpTransport::L2,
                2,
                TransportSpecific::Ieee8021As,
            ),
            RxFilter::All
            | RxFilter::PtpV2Event
            | RxFilter::PtpV2Sync
            | RxFilter::PtpV2DelayReq => (
                RxFilter::PtpV2Event,
                PtpTransport::Any,
                2,
                TransportSpecific::Either,
            ),
        };

        let rx_enabled = rx_filter != RxFilter::None;

        Ok(TimestampSettings {
            tx_mode,
            rx_filter,
            rx_enabled,
            transport,
            version,
            transport_specific,
            message_filter: if rx_enabled { 0xffff } else { 0 },
            one_step: matches!(
                tx_mode,
                TxTimestampMode::OneStepSync | TxTimestampMode::OneStepP2p
            ),
            start: tx_mode == TxTimestampMode::On,
        })
    }
}

impl TimestampSettings {
    /// Get the arrival time the PHY stored in the reserved field of a received PTP header.
    ///
    /// # Returns
    /// None if receive timestamping is off, in which case the field carries no timestamp.
    pub fn rx_timestamp(&self, reserved2: u32) -> Option<u32> {
        if self.rx_enabled {
            Some(reserved2)
        } else {
            None
        }
    }
}

/// A departure timestamp captured by the PHY.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DepartureTimestamp {
    /// The low 32 bits of the departure time in nanoseconds.
    pub nanoseconds: u32,
    pub seq_id: u16,
}

impl DepartureTimestamp {
    /// Decode the departure timestamp registers, read atomically starting at the status register.
    ///
    /// # Returns
    /// None if the PHY has not captured a timestamp.
    pub fn from_registers(registers: [u16; 4]) -> Option<Self> {
        if !registers[0].get_bit(0) {
            return None;
        }

        let mut nanoseconds = 0u32;
        nanoseconds.set_bits(0..16, registers[1] as u32);
        nanoseconds.set_bits(16..32, registers[2] as u32);

        Some(Self {
            nanoseconds,
            seq_id: registers[3],
        })
    }
}

/// Source of departure timestamps, implemented on top of the PHY register access.
pub trait DepartureSource {
    /// Read and acknowledge the next captured departure timestamp, if any.
    fn read_departure(&mut self) -> Option<DepartureTimestamp>;
}

/// What happened to a parked packet.
#[derive(Debug, PartialEq)]
pub enum Completion<P> {
    /// The departure timestamp of the packet was found.
    Timestamped(P, u32),

    /// The timestamp was found, but the packet was sent one-step and must be freed.
    Discarded(P),

    /// No timestamp arrived before the deadline.
    Expired(P),
}

/// The result of handing a packet to the timestamper.
#[derive(Debug, PartialEq)]
pub enum Enqueue<P> {
    /// The packet is waiting for its departure timestamp.
    Queued,

    /// Transmit timestamping is off. The packet is handed back to be freed.
    Rejected(P),
}

/// Whether the deferred timestamp work must run again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuxWork {
    Reschedule,
    Idle,
}

struct PendingTx<P, C: Clock> {
    packet: P,
    seq_id: u16,
    deadline: Instant<C>,
    discard: bool,
}

/// Pairs transmitted PTP packets with the departure timestamps captured by the PHY.
pub struct TxTimestamper<P, C: Clock, const N: usize> {
    mode: TxTimestampMode,
    pending: Deque<PendingTx<P, C>, N>,
}

impl<P, C: Clock<T = u32>, const N: usize> TxTimestamper<P, C, N> {
    pub fn new() -> Self {
        Self {
            mode: TxTimestampMode::Off,
            pending: Deque::new(),
        }
    }

    /// Select the transmit timestamping mode.
    pub fn set_mode(&mut self, mode: TxTimestampMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> TxTimestampMode {
        self.mode
    }

    /// The number of packets waiting for their timestamp.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Park a transmitted packet until its departure timestamp is read.
    ///
    /// # Note
    /// In the one-step modes the PHY inserts the timestamp into Sync (and for peer-to-peer also
    /// Pdelay_Resp) messages itself. Those packets are still parked so the captured timestamp is
    /// consumed, but are discarded instead of being completed.
    ///
    /// # Args
    /// * `packet` - The transmitted packet.
    /// * `seq_id` - The PTP sequence id of the packet.
    /// * `message` - The PTP message type of the packet.
    /// * `now` - The current time.
    pub fn txtstamp(
        &mut self,
        packet: P,
        seq_id: u16,
        message: PtpMessageType,
        now: Instant<C>,
    ) -> Result<Enqueue<P>, (Error, P)> {
        let discard = match self.mode {
            TxTimestampMode::Off => return Ok(Enqueue::Rejected(packet)),
            TxTimestampMode::On => false,
            TxTimestampMode::OneStepSync => message == PtpMessageType::Sync,
            TxTimestampMode::OneStepP2p => {
                message == PtpMessageType::Sync || message == PtpMessageType::PdelayResp
            }
        };

        let deadline = now
            .checked_add(Milliseconds(TX_TIMESTAMP_TIMEOUT_MS))
            .unwrap_or(now);

        self.pending
            .push_back(PendingTx {
                packet,
                seq_id,
                deadline,
                discard,
            })
            .map_err(|pending| (Error::QueueFull, pending.packet))?;

        Ok(Enqueue::Queued)
    }

    /// Pair a departure timestamp with its packet and expire stale packets.
    ///
    /// # Args
    /// * `timestamp` - The captured departure timestamp, if any was read.
    /// * `now` - The current time.
    /// * `sink` - Receives every packet leaving the queue.
    pub fn match_timestamp<F>(
        &mut self,
        timestamp: Option<DepartureTimestamp>,
        now: Instant<C>,
        mut sink: F,
    ) where
        F: FnMut(Completion<P>),
    {
        let mut first = false;

        if let Some(timestamp) = timestamp {
            if let Some((index, entry)) = self.take(timestamp.seq_id) {
                first = index == 0;
                if entry.discard {
                    sink(Completion::Discarded(entry.packet));
                } else {
                    sink(Completion::Timestamped(entry.packet, timestamp.nanoseconds));
                }
            }
        }

        // Something ahead of the match never got a timestamp. Expire what is overdue.
        if !first {
            while let Some(entry) = self.pending.pop_front() {
                if now <= entry.deadline {
                    // The slot was just freed by the pop.
                    self.pending.push_front(entry).ok();
                    break;
                }

                warn!("timed out TX timestamp discarding tag: {:#x}", entry.seq_id);
                sink(Completion::Expired(entry.packet));
            }
        }
    }

    /// Drain captured departure timestamps while packets are waiting for them.
    ///
    /// # Returns
    /// [AuxWork::Reschedule] if packets are still waiting on timestamps the PHY has not captured
    /// yet.
    pub fn do_aux_work<S, F>(&mut self, source: &mut S, now: Instant<C>, mut sink: F) -> AuxWork
    where
        S: DepartureSource,
        F: FnMut(Completion<P>),
    {
        let mut reschedule = false;

        while !self.pending.is_empty() && !reschedule {
            let timestamp = source.read_departure();
            if timestamp.is_none() {
                reschedule = true;
            }

            self.match_timestamp(timestamp, now, &mut sink);
        }

        if reschedule {
            AuxWork::Reschedule
        } else {
            AuxWork::Idle
        }
    }

    /// Remove the first pending packet with `seq_id`, preserving the order of the others.
    fn take(&mut self, seq_id: u16) -> Option<(usize, PendingTx<P, C>)> {
        let mut found = None;

        for index in 0..self.pending.len() {
            let Some(entry) = self.pending.pop_front() else {
                break;
            };

            if found.is_none() && entry.seq_id == seq_id {
                found = Some((index, entry));
            } else {
                self.pending.push_back(entry).ok();
            }
        }

        found
    }
}

impl<P, C: Clock<T = u32>, const N: usize> Default for TxTimestamper<P, C, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use embedded_time::fraction::Fraction;

    struct MsClock;

    impl Clock for MsClock {
        type T = u32;

        const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

        fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
            Ok(Instant::new(0))
        }
    }

    fn at(ms: u32) -> Instant<MsClock> {
        Instant::new(ms)
    }

    #[test]
    fn decode_departure_registers() {
        assert_eq!(DepartureTimestamp::from_registers([0, 1, 2, 3]), None);

        let ts = DepartureTimestamp::from_registers([0x0001, 0x5678, 0x1234, 0x00AB]).unwrap();
        assert_eq!(ts.nanoseconds, 0x1234_5678);
        assert_eq!(ts.seq_id, 0xAB);
    }

    #[test]
    fn config_rejects_reserved_flags() {
        let config = TimestampConfig {
            flags: 1,
            tx_type: 1,
            rx_filter: 0,
        };
        assert_eq!(config.apply(), Err(Error::ReservedFlags));
    }

    #[test]
    fn config_rejects_unknown_modes() {
        let tx = TimestampConfig {
            flags: 0,
            tx_type: 9,
            rx_filter: 0,
        };
        assert_eq!(tx.apply(), Err(Error::UnsupportedMode));

        let rx = TimestampConfig {
            flags: 0,
            tx_type: 0,
            rx_filter: 2,
        };
        assert_eq!(rx.apply(), Err(Error::UnsupportedMode));
    }

    #[test]
    fn config_normalises_filters() {
        let settings = TimestampConfig {
            flags: 0,
            tx_type: TxTimestampMode::On.into(),
            rx_filter: RxFilter::PtpV2L2Sync.into(),
        }
        .apply()
        .unwrap();

        assert_eq!(settings.rx_filter, RxFilter::PtpV2L2Event);
        assert_eq!(settings.transport, PtpTransport::L2);
        assert_eq!(settings.transport_specific, TransportSpecific::Ieee8021As);
        assert_eq!(settings.version, 2);
        assert_eq!(settings.message_filter, 0xffff);
        assert!(settings.start);
        assert!(!settings.one_step);

        let settings = TimestampConfig {
            flags: 0,
            tx_type: TxTimestampMode::OneStepSync.into(),
            rx_filter: RxFilter::None.into(),
        }
        .apply()
        .unwrap();

        assert!(!settings.rx_enabled);
        assert_eq!(settings.message_filter, 0);
        assert!(settings.one_step);
        assert!(!settings.start);

        let settings = TimestampConfig {
            flags: 0,
            tx_type: TxTimestampMode::Off.into(),
            rx_filter: RxFilter::All.into(),
        }
        .apply()
        .unwrap();
        assert_eq!(settings.rx_filter, RxFilter::PtpV2Event);
        assert_eq!(settings.transport, PtpTransport::Any);
        assert_eq!(settings.transport_specific, TransportSpecific::Either);
    }

    #[test]
    fn rx_timestamp_follows_filter() {
        let enabled = TimestampConfig {
            flags: 0,
            tx_type: TxTimestampMode::Off.into(),
            rx_filter: RxFilter::PtpV2Event.into(),
        }
        .apply()
        .unwrap();
        assert_eq!(enabled.rx_timestamp(0x2A), Some(0x2A));

        let disabled = TimestampConfig {
            flags: 0,
            tx_type: TxTimestampMode::On.into(),
            rx_filter: RxFilter::None.into(),
        }
        .apply()
        .unwrap();
        assert_eq!(disabled.rx_timestamp(0x2A), None);
    }

    #[test]
    fn off_rejects_packets() {
        let mut ts: TxTimestamper<u8, MsClock, 4> = TxTimestamper::new();
        assert_eq!(
            ts.txtstamp(1, 1, PtpMessageType::Sync, at(0)),
            Ok(Enqueue::Rejected(1))
        );
        assert_eq!(ts.pending(), 0);
    }

    #[test]
    fn full_queue_returns_packet() {
        let mut ts: TxTimestamper<u8, MsClock, 1> = TxTimestamper::new();
        ts.set_mode(TxTimestampMode::On);
        assert_eq!(
            ts.txtstamp(1, 1, PtpMessageType::Sync, at(0)),
            Ok(Enqueue::Queued)
        );
        assert_eq!(
            ts.txtstamp(2, 2, PtpMessageType::Sync, at(0)),
            Err((Error::QueueFull, 2))
        );
    }

    #[test]
    fn one_step_discards_sync() {
        let mut ts: TxTimestamper<u8, MsClock, 4> = TxTimestamper::new();
        ts.set_mode(TxTimestampMode::OneStepP2p);
        ts.txtstamp(1, 10, PtpMessageType::Sync, at(0)).unwrap();
        ts.txtstamp(2, 11, PtpMessageType::PdelayResp, at(0)).unwrap();
        ts.txtstamp(3, 12, PtpMessageType::DelayReq, at(0)).unwrap();

        let mut completions = heapless::Vec::<Completion<u8>, 4>::new();
        for seq_id in 10..13 {
            let departure = DepartureTimestamp {
                nanoseconds: 500,
                seq_id,
            };
            ts.match_timestamp(Some(departure), at(1), |c| {
                completions.push(c).ok();
            });
        }

        assert_eq!(
            completions.as_slice(),
            &[
                Completion::Discarded(1),
                Completion::Discarded(2),
                Completion::Timestamped(3, 500),
            ]
        );
    }

    #[test]
    fn one_step_sync_keeps_pdelay_resp() {
        let mut ts: TxTimestamper<u8, MsClock, 4> = TxTimestamper::new();
        ts.set_mode(TxTimestampMode::OneStepSync);
        ts.txtstamp(2, 11, PtpMessageType::PdelayResp, at(0)).unwrap();

        let mut completion = None;
        let departure = DepartureTimestamp {
            nanoseconds: 7,
            seq_id: 11,
        };
        ts.match_timestamp(Some(departure), at(0), |c| completion = Some(c));
        assert_eq!(completion, Some(Completion::Timestamped(2, 7)));
    }

    #[test]
    fn out_of_order_match_expires_head() {
        let mut ts: TxTimestamper<u8, MsClock, 4> = TxTimestamper::new();
        ts.set_mode(TxTimestampMode::On);
        ts.txtstamp(1, 1, PtpMessageType::Sync, at(0)).unwrap();
        ts.txtstamp(2, 2, PtpMessageType::Sync, at(50)).unwrap();
        ts.txtstamp(3, 3, PtpMessageType::Sync, at(500)).unwrap();

        let mut completions = heapless::Vec::<Completion<u8>, 4>::new();
        let departure = DepartureTimestamp {
            nanoseconds: 99,
            seq_id: 3,
        };
        ts.match_timestamp(Some(departure), at(120), |c| {
            completions.push(c).ok();
        });

        // Packet 1 is overdue, packet 2 still has time.
        assert_eq!(
            completions.as_slice(),
            &[Completion::Timestamped(3, 99), Completion::Expired(1)]
        );
        assert_eq!(ts.pending(), 1);
    }

    #[test]
    fn head_match_skips_expiry() {
        let mut ts: TxTimestamper<u8, MsClock, 4> = TxTimestamper::new();
        ts.set_mode(TxTimestampMode::On);
        ts.txtstamp(1, 1, PtpMessageType::Sync, at(0)).unwrap();
        ts.txtstamp(2, 2, PtpMessageType::Sync, at(0)).unwrap();

        let mut count = 0;
        let departure = DepartureTimestamp {
            nanoseconds: 1,
            seq_id: 1,
        };
        ts.match_timestamp(Some(departure), at(1_000), |_| count += 1);
        assert_eq!(count, 1);
        assert_eq!(ts.pending(), 1);
    }
}

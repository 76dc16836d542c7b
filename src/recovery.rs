//! Peer Recovery
//!
//! # Design
//! Resetting the shared DMA engine wipes the descriptor state of every channel, including the
//! channels of MACs that were running normally. Those MACs are recovered by their own DMA-error
//! handler, which is deferred work owned by the MAC driver. The arbiter never runs that work
//! itself: it reports which peers need it, and the caller drives a [DmaRecovery] implementation
//! once the registry lock has been released.
use crate::info;

/// Hooks into the MAC driver used to recover a peer after the shared engine was reset.
pub trait DmaRecovery<Id> {
    /// Mask the interrupts of one receive queue, and of its paired transmit channel, of a peer.
    ///
    /// # Args
    /// * `id` - The identity of the peer instance.
    /// * `queue` - The index of the receive queue.
    fn disable_channel_interrupts(&mut self, id: &Id, queue: u8);

    /// Schedule the deferred DMA-error handler of one receive queue of a peer.
    ///
    /// # Note
    /// The handler must report [crate::McdmaEvent::ErrorResetComplete] once the descriptor rings
    /// are rebuilt.
    fn schedule_error_handler(&mut self, id: &Id, queue: u8);
}

/// A peer instance that must run its DMA-error handler after a shared reset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PeerRecovery<Id> {
    /// The identity of the peer.
    pub id: Id,

    /// The number of receive queues owned by the peer.
    pub rx_queues: u8,
}

impl<Id> PeerRecovery<Id> {
    /// Quiesce every receive queue of the peer and schedule its error handler.
    pub fn dispatch<R: DmaRecovery<Id>>(&self, recovery: &mut R) {
        for queue in 0..self.rx_queues {
            recovery.disable_channel_interrupts(&self.id, queue);
            recovery.schedule_error_handler(&self.id, queue);
        }

        info!("Scheduled recovery of {} receive queues", self.rx_queues);
    }
}

#[cfg(test)]
mod test {
    extern crate std;
    use std::vec::Vec;

    use super::{DmaRecovery, PeerRecovery};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(&'static str, u8, u8)>,
    }

    impl DmaRecovery<u8> for Recorder {
        fn disable_channel_interrupts(&mut self, id: &u8, queue: u8) {
            self.calls.push(("disable", *id, queue));
        }

        fn schedule_error_handler(&mut self, id: &u8, queue: u8) {
            self.calls.push(("schedule", *id, queue));
        }
    }

    #[test]
    fn dispatch_walks_every_queue() {
        let mut recorder = Recorder::default();
        PeerRecovery { id: 2, rx_queues: 2 }.dispatch(&mut recorder);

        assert_eq!(
            recorder.calls,
            [
                ("disable", 2, 0),
                ("schedule", 2, 0),
                ("disable", 2, 1),
                ("schedule", 2, 1),
            ]
        );
    }
}

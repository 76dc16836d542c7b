//! Reset Arbiter
//!
//! # Design
//! All MACs share one reset domain. A reset requested by one MAC must therefore only reach the
//! hardware when it cannot corrupt the descriptor rings of its peers, and only once per
//! coordination round:
//!
//! * `Unloaded` - transitory, never resets.
//! * `Loaded` - resets only if every registered MAC is still `Loaded` and no other MAC already
//!   claimed the initial reset, so the first MAC to open performs the one-time reset of the
//!   engine.
//! * `Opened` - never resets. Resets are requested before a MAC is opened or while it handles a
//!   DMA error, never while it is running.
//! * `Error` / `Closed` - resets, and moves every peer through a peer reset. Running peers are
//!   handed back to the caller so their DMA-error handlers can rebuild their rings.
//! * `Reset` - never resets, a peer already did.
//!
//! The arbiter runs with the registry lock held and must not block. It only records the peers
//! that need recovery in the returned [ResetDecision].
use crate::{
    error, info,
    instance::Instance,
    recovery::{DmaRecovery, PeerRecovery},
    state::PeerReset,
    McdmaState,
};
use heapless::Vec;

/// The answer to a request to reset the shared DMA engine.
#[derive(Clone, Debug, PartialEq)]
pub struct ResetDecision<Id, const N: usize> {
    reset: bool,
    recoveries: Vec<PeerRecovery<Id>, N>,
}

impl<Id, const N: usize> ResetDecision<Id, N> {
    pub(crate) fn grant() -> Self {
        Self {
            reset: true,
            recoveries: Vec::new(),
        }
    }

    pub(crate) fn deny() -> Self {
        Self {
            reset: false,
            recoveries: Vec::new(),
        }
    }

    /// Determine if the caller may reset the shared DMA engine.
    ///
    /// # Note
    /// A denied reset is not an error. Coordination has either already reset the engine or will
    /// recover the caller through its DMA-error handler.
    pub fn granted(&self) -> bool {
        self.reset
    }

    /// The peers that must run their DMA-error handlers because of this reset.
    pub fn recoveries(&self) -> &[PeerRecovery<Id>] {
        &self.recoveries
    }

    /// Quiesce and schedule recovery of every affected peer.
    ///
    /// # Note
    /// Must be called after the decision was returned, never from within the registry lock.
    ///
    /// # Returns
    /// True if the caller may reset the shared DMA engine.
    pub fn dispatch<R: DmaRecovery<Id>>(&self, recovery: &mut R) -> bool {
        for peer in self.recoveries.iter() {
            peer.dispatch(recovery);
        }

        self.reset
    }
}

/// Everything guarded by the registry lock.
pub(crate) struct Domain<Id, const N: usize> {
    /// Every registered instance, in registration order.
    pub instances: Vec<Instance<Id>, N>,

    /// The instance granted the initial reset of the engine. Held until that instance reports an
    /// event, is unregistered, or the engine is reset again.
    pub initial_reset: Option<Id>,
}

impl<Id, const N: usize> Domain<Id, N> {
    pub const fn new() -> Self {
        Self {
            instances: Vec::new(),
            initial_reset: None,
        }
    }

    /// Determine if every instance is in `state`. True for an empty set.
    pub fn all_in_state(&self, state: McdmaState) -> bool {
        self.instances
            .iter()
            .all(|instance| instance.state() == state)
    }
}

impl<Id: Clone + PartialEq, const N: usize> Domain<Id, N> {
    pub fn position(&self, id: &Id) -> Option<usize> {
        self.instances.iter().position(|instance| instance.id == *id)
    }

    /// Drop the initial reset claim if `id` holds it.
    pub fn release(&mut self, id: &Id) {
        if self.initial_reset.as_ref() == Some(id) {
            self.initial_reset = None;
        }
    }

    /// Decide if the instance at `caller` may reset the shared engine.
    ///
    /// # Args
    /// * `caller` - The index of the requesting instance within `instances`.
    pub fn arbitrate(&mut self, caller: usize) -> ResetDecision<Id, N> {
        let state = self.instances[caller].state();
        info!("MCDMA SM {} {:?}", self.instances[caller].name, state);

        match state {
            McdmaState::Unloaded => ResetDecision::deny(),

            McdmaState::Loaded => {
                let id = &self.instances[caller].id;
                let claimed_by_peer = self
                    .initial_reset
                    .as_ref()
                    .map_or(false, |owner| owner != id);

                if self.all_in_state(McdmaState::Loaded) && !claimed_by_peer {
                    info!(
                        "MCDMA SM {} first channel reset on LOADED",
                        self.instances[caller].name
                    );
                    self.initial_reset = Some(id.clone());
                    ResetDecision::grant()
                } else {
                    ResetDecision::deny()
                }
            }

            McdmaState::Opened => {
                error!(
                    "MCDMA SM {} reset requested while opened",
                    self.instances[caller].name
                );
                ResetDecision::deny()
            }

            McdmaState::Error | McdmaState::Closed => {
                self.initial_reset = None;

                let mut decision = ResetDecision::grant();
                for (index, peer) in self.instances.iter_mut().enumerate() {
                    if index == caller {
                        continue;
                    }

                    match peer.state.peer_reset() {
                        PeerReset::Recover => {
                            info!("MCDMA SM {} recovering after peer reset", peer.name);
                            let recovery = PeerRecovery {
                                id: peer.id.clone(),
                                rx_queues: peer.rx_queues,
                            };

                            // Peers never outnumber the registry capacity.
                            if decision.recoveries.push(recovery).is_err() {
                                error!("MCDMA SM {} recovery list overflow", peer.name);
                            }
                        }
                        PeerReset::Rearmed => info!("MCDMA SM {} rearmed to LOADED", peer.name),
                        PeerReset::Unchanged => {}
                    }
                }

                decision
            }

            McdmaState::Reset => ResetDecision::deny(),
        }
    }
}

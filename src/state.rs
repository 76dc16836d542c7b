//! Per-instance reset coordination state.
//!
//! # Design
//! Each MAC sharing the DMA engine carries one state machine. The owning driver moves it with
//! [McdmaEvent]s. The reset arbiter moves the state machines of peers with an internal peer-reset
//! event when it decides to reset the shared engine on behalf of another instance.
//!
//! Transitions that are not listed are rejected by the state machine and leave the state
//! untouched. That is how a DMA error reported while a peer-triggered recovery is in flight gets
//! ignored, and how peers that are already quiescent are left alone by a peer reset.
use crate::{info, warn};

mod sm {

    use smlang::statemachine;

    statemachine! {
        transitions: {
            *Unloaded + Register = Loaded,

            Unloaded + OpenComplete = Opened,
            Loaded + OpenComplete = Opened,
            Opened + OpenComplete = Opened,
            Error + OpenComplete = Opened,
            Closed + OpenComplete = Opened,
            Reset + OpenComplete = Opened,

            Unloaded + ErrorResetComplete = Opened,
            Loaded + ErrorResetComplete = Opened,
            Opened + ErrorResetComplete = Opened,
            Error + ErrorResetComplete = Opened,
            Closed + ErrorResetComplete = Opened,
            Reset + ErrorResetComplete = Opened,

            Unloaded + Closed = Closed,
            Loaded + Closed = Closed,
            Opened + Closed = Closed,
            Error + Closed = Closed,
            Closed + Closed = Closed,
            Reset + Closed = Closed,

            Unloaded + DmaError = Error,
            Loaded + DmaError = Error,
            Opened + DmaError = Error,
            Error + DmaError = Error,
            Closed + DmaError = Error,

            Opened + PeerReset = Reset,
            Error + PeerReset = Loaded,
            Closed + PeerReset = Loaded,
        }
    }

    pub struct Context;

    impl StateMachineContext for Context {}
}

use sm::{Context, Events, StateMachine, States};

/// The coordination state of one MAC instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum McdmaState {
    /// Not registered, or in the middle of being removed.
    Unloaded,

    /// Registered and never opened, or returned to idle by a shared reset.
    Loaded,

    /// The MAC is up and its DMA channels are running.
    Opened,

    /// A DMA error was observed and no reset has resolved it yet.
    Error,

    /// The MAC was opened and then closed. Its DMA state is stale until the next reset.
    Closed,

    /// A peer reset the shared engine and this instance's DMA-error handler has been scheduled to
    /// rebuild its descriptor rings.
    Reset,
}

impl From<&States> for McdmaState {
    fn from(state: &States) -> Self {
        match state {
            States::Unloaded => McdmaState::Unloaded,
            States::Loaded => McdmaState::Loaded,
            States::Opened => McdmaState::Opened,
            States::Error => McdmaState::Error,
            States::Closed => McdmaState::Closed,
            States::Reset => McdmaState::Reset,
        }
    }
}

/// Lifecycle points reported by the owning MAC driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum McdmaEvent {
    /// The MAC finished opening.
    OpenComplete,

    /// The DMA-error handler finished rebuilding the MAC's descriptor rings.
    ErrorResetComplete,

    /// The MAC was closed.
    Closed,

    /// The MAC's DMA-error handler started running.
    DmaError,
}

impl From<McdmaEvent> for Events {
    fn from(event: McdmaEvent) -> Self {
        match event {
            McdmaEvent::OpenComplete => Events::OpenComplete,
            McdmaEvent::ErrorResetComplete => Events::ErrorResetComplete,
            McdmaEvent::Closed => Events::Closed,
            McdmaEvent::DmaError => Events::DmaError,
        }
    }
}

/// The outcome of applying a peer reset to an instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum PeerReset {
    /// The instance was running and must run its DMA-error handler.
    Recover,

    /// The instance was in error or closed and is now back to idle.
    Rearmed,

    /// The instance was already quiescent or already recovering.
    Unchanged,
}

pub(crate) struct InstanceState {
    machine: StateMachine<Context>,
}

impl InstanceState {
    pub fn new() -> Self {
        Self {
            machine: StateMachine::new(Context),
        }
    }

    pub fn state(&self) -> McdmaState {
        self.machine.state().into()
    }

    /// Mark the instance as registered.
    pub fn register(&mut self) {
        self.machine.process_event(Events::Register).ok();
    }

    /// Apply an event reported by the owning driver.
    ///
    /// # Returns
    /// False if the event was ignored in the current state.
    pub fn report(&mut self, name: &str, event: McdmaEvent) -> bool {
        let accepted = self.machine.process_event(event.into()).is_ok();
        if accepted {
            info!("MCDMA SM {} event {:?}", name, event);
        } else {
            warn!(
                "MCDMA SM {} event {:?} ignored while in {:?} state",
                name,
                event,
                self.state()
            );
        }

        accepted
    }

    /// Apply a reset of the shared engine performed by another instance.
    pub fn peer_reset(&mut self) -> PeerReset {
        let previous = self.state();
        if self.machine.process_event(Events::PeerReset).is_err() {
            return PeerReset::Unchanged;
        }

        match previous {
            McdmaState::Opened => PeerReset::Recover,
            _ => PeerReset::Rearmed,
        }
    }
}

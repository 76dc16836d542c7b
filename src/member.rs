use crate::{
    recovery::DmaRecovery, Error, InstanceConfig, McdmaEvent, McdmaState, Registry,
    ResetDecision,
};
use core::fmt::Debug;

/// A MAC instance attached to a [Registry].
///
/// The instance is unregistered when the handle is dropped, which mirrors the probe/remove
/// lifetime of the MAC driver.
pub struct Member<'a, Id, const N: usize>
where
    Id: Clone + PartialEq + Debug,
{
    registry: &'a Registry<Id, N>,
    id: Id,
}

impl<Id, const N: usize> Registry<Id, N>
where
    Id: Clone + PartialEq + Debug,
{
    /// Register an instance and get a handle that unregisters it on drop.
    ///
    /// # Note
    /// Only one handle may own an instance. Attaching an identity that is already registered
    /// fails with [Error::AlreadyAttached].
    pub fn attach(&self, config: InstanceConfig<Id>) -> Result<Member<'_, Id, N>, Error> {
        let id = config.id.clone();
        if !self.insert(config)? {
            return Err(Error::AlreadyAttached);
        }

        Ok(Member { registry: self, id })
    }
}

impl<'a, Id, const N: usize> Member<'a, Id, N>
where
    Id: Clone + PartialEq + Debug,
{
    /// The identity of the instance.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// The current coordination state of the instance.
    pub fn state(&self) -> McdmaState {
        self.registry
            .state(&self.id)
            .unwrap_or(McdmaState::Unloaded)
    }

    /// Report a lifecycle event. See [Registry::event].
    pub fn report(&self, event: McdmaEvent) {
        self.registry.event(&self.id, event)
    }

    /// Ask whether the shared DMA engine may be reset. See [Registry::should_reset].
    pub fn should_reset(&self) -> ResetDecision<Id, N> {
        self.registry.should_reset(&self.id)
    }

    /// Arbitrate a reset and schedule recovery of the affected peers.
    ///
    /// # Returns
    /// True if the caller must now reset the shared DMA engine.
    pub fn arbitrate_reset<R: DmaRecovery<Id>>(&self, recovery: &mut R) -> bool {
        self.should_reset().dispatch(recovery)
    }
}

impl<'a, Id, const N: usize> Drop for Member<'a, Id, N>
where
    Id: Clone + PartialEq + Debug,
{
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

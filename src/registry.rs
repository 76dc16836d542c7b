//! Instance Registry
//!
//! # Design
//! The registry holds every MAC instance sharing one DMA engine, in registration order. The
//! instance list and the state of every instance are guarded by a single lock, so each
//! arbitration sees a consistent snapshot of all peers and at most one arbitration runs at a
//! time.
//!
//! The lock is a critical section. It is taken from thread context (open, close, probe, remove)
//! as well as from interrupt and deferred-work context (DMA error handling), so nothing executed
//! while it is held may block. Peer recovery is returned to the caller rather than run under it.
use crate::{
    arbiter::{Domain, ResetDecision},
    debug,
    design_parameters::DEFAULT_MAX_INSTANCES,
    error, info,
    instance::{Instance, InstanceConfig},
    Error, McdmaEvent, McdmaState,
};
use core::{
    cell::RefCell,
    fmt::Debug,
    sync::atomic::{AtomicUsize, Ordering},
};
use critical_section::Mutex;

/// The set of MAC instances sharing one DMA engine.
///
/// # Note
/// A registry is usually placed in a `static` shared by every MAC attached to the same engine.
pub struct Registry<Id, const N: usize = DEFAULT_MAX_INSTANCES> {
    domain: Mutex<RefCell<Domain<Id, N>>>,

    /// Mirrors the number of registered instances. Only written with the lock held.
    count: AtomicUsize,
}

impl<Id, const N: usize> Registry<Id, N> {
    /// Construct an empty registry.
    pub const fn new() -> Self {
        Self {
            domain: Mutex::new(RefCell::new(Domain::new())),
            count: AtomicUsize::new(0),
        }
    }

    /// Get the number of registered instances.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl<Id, const N: usize> Default for Registry<Id, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id, const N: usize> Registry<Id, N>
where
    Id: Clone + PartialEq + Debug,
{
    /// Add an instance to the registry and mark it `Loaded`.
    ///
    /// # Note
    /// Registering an identity that is already present is a no-op, its state is preserved.
    ///
    /// # Args
    /// * `config` - The configuration of the instance.
    pub fn register(&self, config: InstanceConfig<Id>) -> Result<(), Error> {
        self.insert(config).map(|_| ())
    }

    /// Add an instance unless it is already present.
    ///
    /// # Returns
    /// True if the instance was added by this call.
    pub(crate) fn insert(&self, config: InstanceConfig<Id>) -> Result<bool, Error> {
        critical_section::with(|cs| {
            let mut domain = self.domain.borrow_ref_mut(cs);
            if domain.position(&config.id).is_some() {
                debug!("MCDMA SM {:?} already registered", config.id);
                return Ok(false);
            }

            if domain.instances.is_full() {
                error!("MCDMA SM {:?} rejected, registry full", config.id);
                return Err(Error::RegistryFull);
            }

            let mut instance = Instance::new(config);
            instance.state.register();
            info!("MCDMA SM {} registered", instance.name);

            domain
                .instances
                .push(instance)
                .map_err(|_| Error::RegistryFull)?;
            self.count.store(domain.instances.len(), Ordering::Release);
            Ok(true)
        })
    }

    /// Remove an instance from the registry.
    ///
    /// # Returns
    /// True if the instance was registered.
    pub fn unregister(&self, id: &Id) -> bool {
        critical_section::with(|cs| {
            let mut domain = self.domain.borrow_ref_mut(cs);
            let Some(index) = domain.position(id) else {
                debug!("MCDMA SM {:?} not registered", id);
                return false;
            };

            // Keep registration order for the remaining instances.
            domain.instances[index..].rotate_left(1);
            if let Some(instance) = domain.instances.pop() {
                info!("MCDMA SM {} unregistered", instance.name);
            }

            domain.release(id);
            self.count.store(domain.instances.len(), Ordering::Release);
            true
        })
    }

    /// Determine if every registered instance is in `state`. True for an empty registry.
    pub fn all_in_state(&self, state: McdmaState) -> bool {
        critical_section::with(|cs| self.domain.borrow_ref(cs).all_in_state(state))
    }

    /// Get the state of an instance, if it is registered.
    pub fn state(&self, id: &Id) -> Option<McdmaState> {
        critical_section::with(|cs| {
            self.domain
                .borrow_ref(cs)
                .instances
                .iter()
                .find(|instance| instance.id == *id)
                .map(|instance| instance.state())
        })
    }

    /// Report a lifecycle event of an instance.
    ///
    /// # Note
    /// A [McdmaEvent::DmaError] reported while the instance is recovering from a peer reset is
    /// ignored. Events for unregistered instances are logged and dropped.
    ///
    /// # Args
    /// * `id` - The identity of the reporting instance.
    /// * `event` - The lifecycle point the instance reached.
    pub fn event(&self, id: &Id, event: McdmaEvent) {
        critical_section::with(|cs| {
            let mut domain = self.domain.borrow_ref_mut(cs);
            let Some(index) = domain.position(id) else {
                error!("MCDMA SM event {:?} for unregistered {:?}", event, id);
                return;
            };

            let instance = &mut domain.instances[index];
            if instance.state.report(&instance.name, event) {
                domain.release(id);
            }
        })
    }

    /// Ask whether the instance may reset the shared DMA engine now.
    ///
    /// # Note
    /// The caller must only reset the engine if the decision is granted, and must dispatch the
    /// recoveries listed in the decision in either case. An unregistered instance is denied.
    ///
    /// # Args
    /// * `id` - The identity of the requesting instance.
    pub fn should_reset(&self, id: &Id) -> ResetDecision<Id, N> {
        critical_section::with(|cs| {
            let mut domain = self.domain.borrow_ref_mut(cs);
            let caller = domain.position(id);

            // A lone MAC owns the engine outright, just like a dedicated DMA.
            if domain.instances.len() < 2 {
                info!("MCDMA SM {:?} only one instance", id);

                // Peers registering later must not redo the initial reset.
                if let Some(index) = caller {
                    if domain.instances[index].state() == McdmaState::Loaded {
                        domain.initial_reset = Some(id.clone());
                    }
                }

                return ResetDecision::grant();
            }

            let Some(caller) = caller else {
                error!("MCDMA SM reset requested by unregistered {:?}", id);
                return ResetDecision::deny();
            };

            domain.arbitrate(caller)
        })
    }
}

#[cfg(test)]
mod test {
    use super::Registry;
    use crate::{Error, InstanceConfig, McdmaEvent, McdmaState};

    fn config(id: u8) -> InstanceConfig<u8> {
        InstanceConfig::new(id)
    }

    #[test]
    fn register_is_idempotent() {
        let registry: Registry<u8, 4> = Registry::new();
        registry.register(config(1)).unwrap();
        registry.event(&1, McdmaEvent::OpenComplete);

        registry.register(config(1)).unwrap();
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.state(&1), Some(McdmaState::Opened));
    }

    #[test]
    fn unregister_absent_is_noop() {
        let registry: Registry<u8, 4> = Registry::new();
        registry.register(config(1)).unwrap();

        assert!(!registry.unregister(&2));
        assert_eq!(registry.count(), 1);

        assert!(registry.unregister(&1));
        assert!(!registry.unregister(&1));
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.state(&1), None);
    }

    #[test]
    fn unregister_preserves_order() {
        let registry: Registry<u8, 4> = Registry::new();
        for id in 0..4 {
            registry.register(config(id)).unwrap();
        }

        assert!(registry.unregister(&1));
        critical_section::with(|cs| {
            let ids: heapless::Vec<u8, 4> = registry
                .domain
                .borrow_ref(cs)
                .instances
                .iter()
                .map(|instance| instance.id)
                .collect();
            assert_eq!(ids.as_slice(), &[0, 2, 3]);
        });
        assert_eq!(registry.count(), 3);
    }

    #[test]
    fn capacity_is_bounded() {
        let registry: Registry<u8, 2> = Registry::new();
        registry.register(config(0)).unwrap();
        registry.register(config(1)).unwrap();
        assert_eq!(registry.register(config(2)), Err(Error::RegistryFull));
        assert_eq!(registry.count(), 2);

        // A known identity still registers idempotently when full.
        assert_eq!(registry.register(config(1)), Ok(()));
    }

    #[test]
    fn all_in_state() {
        let registry: Registry<u8, 4> = Registry::new();
        assert!(registry.all_in_state(McdmaState::Loaded));

        registry.register(config(0)).unwrap();
        registry.register(config(1)).unwrap();
        assert!(registry.all_in_state(McdmaState::Loaded));

        registry.event(&0, McdmaEvent::OpenComplete);
        assert!(!registry.all_in_state(McdmaState::Loaded));
    }

    #[test]
    fn events_for_unregistered_are_dropped() {
        let registry: Registry<u8, 4> = Registry::new();
        registry.event(&9, McdmaEvent::DmaError);
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.state(&9), None);
    }

    #[test]
    fn unregistered_is_denied() {
        let registry: Registry<u8, 4> = Registry::new();
        registry.register(config(0)).unwrap();
        registry.register(config(1)).unwrap();
        assert!(!registry.should_reset(&5).granted());
    }

    #[test]
    fn abandoned_initial_reset_passes_on() {
        let registry: Registry<u8, 4> = Registry::new();
        for id in 0..3 {
            registry.register(config(id)).unwrap();
        }

        assert!(registry.should_reset(&0).granted());
        assert!(!registry.should_reset(&1).granted());

        // eth0 is removed before it finished opening.
        registry.unregister(&0);
        assert!(registry.should_reset(&1).granted());
        assert!(!registry.should_reset(&2).granted());
    }

    #[test]
    fn lone_initial_reset_holds_against_late_peer() {
        let registry: Registry<u8, 4> = Registry::new();
        registry.register(config(0)).unwrap();
        assert!(registry.should_reset(&0).granted());

        // eth1 probes while eth0 is still opening.
        registry.register(config(1)).unwrap();
        assert_eq!(registry.state(&0), Some(McdmaState::Loaded));
        assert!(!registry.should_reset(&1).granted());
        assert!(registry.should_reset(&0).granted());

        registry.event(&0, McdmaEvent::OpenComplete);
        assert!(!registry.should_reset(&1).granted());
    }

    #[test]
    fn insert_reports_new_instances() {
        let registry: Registry<u8, 4> = Registry::new();
        assert_eq!(registry.insert(config(0)), Ok(true));
        assert_eq!(registry.insert(config(0)), Ok(false));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn single_instance_always_resets() {
        let registry: Registry<u8, 4> = Registry::new();
        registry.register(config(0)).unwrap();

        assert!(registry.should_reset(&0).granted());
        registry.event(&0, McdmaEvent::OpenComplete);
        assert!(registry.should_reset(&0).granted());
        registry.event(&0, McdmaEvent::DmaError);
        assert!(registry.should_reset(&0).granted());
    }
}

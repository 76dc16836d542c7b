use crate::{
    design_parameters::{MAX_NAME_LEN, MAX_RX_QUEUES},
    state::InstanceState,
    Error, McdmaState,
};
use core::fmt::{Debug, Write};
use heapless::String;

/// Configuration describing one MAC instance that shares the DMA engine.
#[derive(Clone, Debug)]
pub struct InstanceConfig<Id> {
    pub(crate) id: Id,
    pub(crate) name: String<MAX_NAME_LEN>,
    pub(crate) rx_queues: u8,
}

impl<Id> InstanceConfig<Id> {
    /// Construct the configuration of an instance.
    ///
    /// # Args
    /// * `id` - The identity of the instance. The owning driver chooses it and must keep it unique
    /// within one registry, e.g. the MAC index or the address of its private data.
    pub fn new(id: Id) -> Self {
        Self {
            id,
            name: String::new(),
            rx_queues: 1,
        }
    }

    /// Specify a display name used in log messages, typically the network interface name.
    pub fn name(mut self, name: &str) -> Result<Self, Error> {
        let mut owned = String::new();
        owned.push_str(name).map_err(|_| Error::NameTooLong)?;
        self.name = owned;
        Ok(self)
    }

    /// Specify the number of receive DMA queues owned by the instance. Each of them is recovered
    /// individually when a peer resets the shared engine.
    pub fn rx_queues(mut self, count: u8) -> Result<Self, Error> {
        if count == 0 || count > MAX_RX_QUEUES {
            return Err(Error::InvalidQueueCount);
        }

        self.rx_queues = count;
        Ok(self)
    }
}

/// One registered MAC instance.
pub(crate) struct Instance<Id> {
    pub id: Id,
    pub name: String<MAX_NAME_LEN>,
    pub rx_queues: u8,
    pub state: InstanceState,
}

impl<Id: Debug> Instance<Id> {
    pub fn new(config: InstanceConfig<Id>) -> Self {
        let mut name = config.name;
        if name.is_empty() {
            // Unnamed instances are logged by identity. Long identities are truncated.
            write!(name, "{:?}", config.id).ok();
        }

        Self {
            id: config.id,
            name,
            rx_queues: config.rx_queues,
            state: InstanceState::new(),
        }
    }
}

impl<Id> Instance<Id> {
    pub fn state(&self) -> McdmaState {
        self.state.state()
    }
}

//! Listener bridge between the media engine and the signaling authority
//!
//! Each engine listener capability gets its own dispatcher; the
//! [`Coordinator`] composes them. All dispatchers talk to the authority
//! through one shared [`Outlet`], which the coordinator cuts when it closes
//! so that late engine events never reach a caller that has moved on.

pub mod coordinator;
pub mod data_channel;
pub mod handles;
pub mod produce;
pub mod transport;

pub use coordinator::Coordinator;
pub use handles::{ConsumerHandle, DataConsumerHandle, DataProducerHandle, ProducerHandle};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{BridgeError, Result};
use crate::events::{BridgeEvent, EventBus};
use crate::signaling::Signaller;

/// Shared path from dispatchers to the authority and the event bus
pub struct Outlet {
    signaller: Arc<dyn Signaller>,
    events: EventBus,
    open: AtomicBool,
}

impl Outlet {
    pub fn new(signaller: Arc<dyn Signaller>, event_capacity: usize) -> Self {
        Self {
            signaller,
            events: EventBus::with_capacity(event_capacity),
            open: AtomicBool::new(true),
        }
    }

    /// The authority for a notification; `None` once cut.
    pub fn notify(&self) -> Option<&dyn Signaller> {
        self.open
            .load(Ordering::SeqCst)
            .then_some(self.signaller.as_ref())
    }

    /// The authority for a round trip; an error once cut.
    pub fn round_trip(&self) -> Result<&dyn Signaller> {
        self.notify()
            .ok_or_else(|| BridgeError::ResourceClosed("coordinator is closed".into()))
    }

    pub fn publish(&self, event: BridgeEvent) {
        if self.open.load(Ordering::SeqCst) {
            self.events.publish(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub fn cut(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Id namespaces within one coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdScope {
    Producer,
    Consumer,
    DataProducer,
    DataConsumer,
}

/// Authority-assigned ids of one coordinator's live resources
///
/// Ids are immutable once assigned; a second claim of the same id in the
/// same scope is a contract violation. Transport ids are not claimed: the
/// authority may reuse one id for both transports.
#[derive(Default)]
pub struct IdRegistry {
    ids: Mutex<HashSet<(IdScope, String)>>,
}

impl IdRegistry {
    pub fn claim(&self, scope: IdScope, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(BridgeError::ContractViolation(format!(
                "empty {:?} id",
                scope
            )));
        }
        if !self.ids.lock().insert((scope, id.to_string())) {
            return Err(BridgeError::ContractViolation(format!(
                "duplicate {:?} id {:?}",
                scope, id
            )));
        }
        Ok(())
    }

    /// Forget an id whose resource failed to be created or went away
    pub fn release(&self, scope: IdScope, id: &str) {
        self.ids.lock().remove(&(scope, id.to_string()));
    }

    pub fn contains(&self, scope: IdScope, id: &str) -> bool {
        self.ids.lock().contains(&(scope, id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

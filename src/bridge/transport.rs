//! Transport listener dispatcher
//!
//! One [`TransportEvents`] per transport. The authority's transport id is
//! opaque and may repeat across the send/recv pair, so state is held per
//! dispatcher instead of being looked up by id.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::Outlet;
use crate::engine::TransportListener;
use crate::error::{BridgeError, Result};
use crate::events::BridgeEvent;
use crate::signaling::types::{DtlsParameters, TransportDirection, TransportId, TransportState};

/// Forwards connect and connection-state events for one transport and
/// tracks its state machine.
pub struct TransportEvents {
    outlet: Arc<Outlet>,
    direction: TransportDirection,
    state: Mutex<TransportState>,
}

impl TransportEvents {
    pub fn new(outlet: Arc<Outlet>, direction: TransportDirection) -> Self {
        Self {
            outlet,
            direction,
            state: Mutex::new(TransportState::New),
        }
    }

    pub fn direction(&self) -> TransportDirection {
        self.direction
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    /// Reject new work once the transport has failed or closed
    pub fn ensure_usable(&self) -> Result<()> {
        match self.state() {
            TransportState::Failed => Err(BridgeError::TransportFailed(format!(
                "{} transport",
                self.direction
            ))),
            TransportState::Closed => Err(BridgeError::TransportClosed(format!(
                "{} transport",
                self.direction
            ))),
            _ => Ok(()),
        }
    }

    /// Local close; no notification is forwarded.
    pub fn mark_closed(&self) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = TransportState::Closed;
        }
    }

    fn advance(&self, next: TransportState) -> bool {
        let mut current = self.state.lock();
        if current.can_transition_to(next) {
            *current = next;
            true
        } else {
            false
        }
    }
}

impl TransportListener for TransportEvents {
    fn on_connect(&self, transport_id: &TransportId, dtls_parameters: &DtlsParameters) -> Result<()> {
        info!(
            "{} transport {} connecting to the remote side",
            self.direction, transport_id
        );
        self.outlet
            .round_trip()?
            .on_connect_transport(transport_id, dtls_parameters)
    }

    fn on_connection_state_change(&self, transport_id: &TransportId, state: &str) {
        debug!(
            "{} transport {} connection state: {}",
            self.direction, transport_id, state
        );

        match state.parse::<TransportState>() {
            Ok(next) if self.advance(next) => {
                self.outlet.publish(BridgeEvent::TransportStateChanged {
                    transport_id: transport_id.clone(),
                    direction: self.direction,
                    state: next,
                });
                if next == TransportState::Failed {
                    warn!(
                        "{} transport {} failed; recovery is up to the signaling side",
                        self.direction, transport_id
                    );
                    self.outlet.publish(BridgeEvent::TransportFailed {
                        transport_id: transport_id.clone(),
                        direction: self.direction,
                    });
                }
            }
            Ok(next) => debug!(
                "{} transport {}: ignoring {} after {}",
                self.direction,
                transport_id,
                next,
                self.state()
            ),
            // e.g. "disconnected": forwarded, not tracked
            Err(_) => debug!(
                "{} transport {}: untracked state {:?}",
                self.direction, transport_id, state
            ),
        }

        // The authority sees every notification verbatim
        if let Some(signaller) = self.outlet.notify() {
            signaller.on_connection_state(transport_id, state);
        }
    }
}

//! External port allocation

use crate::cluster::ServiceSummary;
use crate::errors::ControllerError;

/// Ports at or below this value are never handed out
pub const BASE_PORT: u16 = 31160;

/// Upper end of the cluster's node port range
pub const MAX_NODE_PORT: u16 = 32767;

/// Pick the next free external port: one above the highest port in use
/// within `BASE_PORT + 1..=MAX_NODE_PORT`. Ports outside that range never
/// collide with an allocation and are ignored.
pub fn allocate(services: &[ServiceSummary]) -> Result<u16, ControllerError> {
    let highest = services
        .iter()
        .flat_map(|s| s.all_ports())
        .filter(|port| (BASE_PORT..=MAX_NODE_PORT).contains(port))
        .fold(BASE_PORT, u16::max);

    match highest.checked_add(1) {
        Some(port) if port <= MAX_NODE_PORT => Ok(port),
        _ => Err(ControllerError::PortsExhausted {
            from: BASE_PORT + 1,
            to: MAX_NODE_PORT,
        }),
    }
}

/// Node port already held by a service
pub fn reusable(services: &[ServiceSummary], namespace: &str, name: &str) -> Option<u16> {
    services
        .iter()
        .find(|s| s.name == name && s.namespace == namespace)
        .and_then(|s| s.node_ports.first().copied())
}

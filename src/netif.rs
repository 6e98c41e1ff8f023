//! Host network-stack glue for one virtual interface.

use bytes::Bytes;

use crate::types::InterfaceState;

/// What the host side provides for a tunneling slave's virtual interface.
///
/// The glue is also the sole producer for the handler's transmit queue; it
/// gets the queue handle when the handler is created. `deliver_upward` runs
/// in the cyclic context and must hand the frame off without blocking.
pub trait HostInterface: Send {
    /// Hand a fully reassembled Ethernet frame to the host stack.
    fn deliver_upward(&mut self, frame: Bytes);

    /// The interface was administratively opened or closed.
    fn interface_state_changed(&mut self, state: InterfaceState);
}

use std::fmt;

/// Ring position of a slave on the bus.
///
/// Assigned by the (external) slave discovery; stable for the lifetime of a
/// bus scan and used as the registry key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlaveId(pub u16);

impl fmt::Display for SlaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slave {}", self.0)
    }
}

/// Administrative state of the virtual interface, independent of slave
/// health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    /// The interface exchanges traffic.
    Open,
    /// The interface is drained; no new transport operations are issued.
    Closed,
}

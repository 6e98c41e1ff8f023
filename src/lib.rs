//! Master-side Ethernet-over-EtherCAT (EoE) tunneling.
//!
//! Each tunneling-capable slave gets one [`EoeHandler`] that fragments
//! outbound Ethernet frames into mailbox datagrams, reassembles inbound
//! fragments into full frames for the host network stack, and tracks
//! throughput. The handler is driven by one [`EoeHandler::advance`] call
//! per fieldbus cycle and never blocks; outbound frames arrive through a
//! shared [`TransmitQueue`] fed by the host glue from an ordinary thread.
//!
//! The master core plugs in through two traits: [`MailboxTransport`] for
//! non-blocking mailbox datagram access and [`HostInterface`] for handing
//! frames up to the host stack. [`HandlerRegistry`] ties handler lifetime
//! to slave discovery and removal.

pub mod config;
pub mod error;
pub mod fragment;
pub mod handler;
pub mod netif;
pub mod queue;
pub mod rate;
pub mod registry;
pub mod transport;
pub mod types;
pub mod wire;

pub use config::EoeConfig;
pub use error::{Error, Result};
pub use fragment::{split, Fragment, Fragmenter, Reassembly, ReassemblyBuffer};
pub use handler::{EoeHandler, HandlerState, HandlerStats};
pub use netif::HostInterface;
pub use queue::TransmitQueue;
pub use rate::RateTracker;
pub use registry::HandlerRegistry;
pub use transport::{mailbox_full, MailboxTransport, PendingHandle, PollOutcome};
pub use types::{InterfaceState, SlaveId};

//! Ownership table mapping slaves to their EoE handlers.
//!
//! The external slave lifecycle calls `create` when a tunneling-capable
//! slave shows up and `destroy` when it disappears; the scheduler calls
//! `advance_all` once per cycle. A `BTreeMap` keeps the advance order
//! stable within a run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::config::EoeConfig;
use crate::error::{Error, Result};
use crate::handler::{EoeHandler, HandlerStats};
use crate::netif::HostInterface;
use crate::queue::TransmitQueue;
use crate::transport::MailboxTransport;
use crate::types::SlaveId;

/// One handler per tunneling-capable slave.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<SlaveId, EoeHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler for a discovered slave and hand back the
    /// producer-side queue handle for its host glue.
    pub fn create(
        &mut self,
        slave: SlaveId,
        config: EoeConfig,
        glue: Box<dyn HostInterface>,
    ) -> Result<Arc<TransmitQueue>> {
        if self.handlers.contains_key(&slave) {
            return Err(Error::HandlerExists(slave));
        }
        let handler = EoeHandler::new(slave, config, glue)?;
        let queue = handler.queue_handle();
        info!(%slave, "EoE handler created");
        self.handlers.insert(slave, handler);
        Ok(queue)
    }

    /// Tear down the handler for a vanished slave. Its transmit queue is
    /// flushed so no queued frame ownership leaks.
    pub fn destroy(&mut self, slave: SlaveId) -> bool {
        match self.handlers.remove(&slave) {
            Some(mut handler) => {
                handler.close();
                handler.queue_handle().flush();
                info!(%slave, "EoE handler destroyed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, slave: SlaveId) -> Option<&EoeHandler> {
        self.handlers.get(&slave)
    }

    pub fn get_mut(&mut self, slave: SlaveId) -> Option<&mut EoeHandler> {
        self.handlers.get_mut(&slave)
    }

    /// Advance every handler by one cycle, in slave order.
    pub fn advance_all(&mut self, transport: &mut dyn MailboxTransport, now: Instant) {
        for handler in self.handlers.values_mut() {
            handler.advance(transport, now);
        }
    }

    /// Statistics snapshots for all handlers, in slave order.
    pub fn stats(&self) -> Vec<HandlerStats> {
        self.handlers.values().map(EoeHandler::stats).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

//! Per-slave EoE handler: the cyclic state machine.
//!
//! The scheduler calls [`EoeHandler::advance`] once per fieldbus cycle. An
//! invocation performs at most one transport interaction so the cycle
//! budget stays bounded, and it never blocks; the only lock it touches is
//! the transmit queue's, for O(1) sections.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::config::EoeConfig;
use crate::fragment::{split, Fragment, Fragmenter, Reassembly, ReassemblyBuffer};
use crate::netif::HostInterface;
use crate::queue::TransmitQueue;
use crate::rate::RateTracker;
use crate::transport::{mailbox_full, MailboxTransport, PendingHandle, PollOutcome};
use crate::types::{InterfaceState, SlaveId};
use crate::wire::{FrameType, FragmentHeader, FRAME_MODULUS, TIMESTAMP_LEN};

/// State of the cyclic mailbox exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// Nothing on the wire; pick transmit or receive work next cycle.
    Idle,
    /// A mailbox write is on the wire.
    AwaitWriteResult,
    /// A sync-manager status fetch is on the wire.
    AwaitReadCheck,
    /// A mailbox read is on the wire.
    AwaitReadResult,
}

impl HandlerState {
    pub fn name(&self) -> &'static str {
        match self {
            HandlerState::Idle => "idle",
            HandlerState::AwaitWriteResult => "await-write-result",
            HandlerState::AwaitReadCheck => "await-read-check",
            HandlerState::AwaitReadResult => "await-read-result",
        }
    }
}

/// Frame currently being fragmented onto the wire.
#[derive(Debug)]
struct TxFrame {
    fragments: Fragmenter,
    /// Fragment awaiting a successful write, kept for retries.
    current: Option<Fragment>,
    /// Encoded form of `current`.
    mailbox: Bytes,
    frame_len: usize,
}

#[derive(Debug, Default)]
struct Counters {
    tx_bytes: u64,
    rx_bytes: u64,
    tx_frames: u64,
    rx_frames: u64,
    tx_dropped: u64,
    rx_dropped: u64,
    tx_errors: u64,
    rx_errors: u64,
    discontinuities: u64,
}

/// Read-only statistics snapshot for one handler.
#[derive(Debug, Clone)]
pub struct HandlerStats {
    pub slave: SlaveId,
    pub open: bool,
    pub state: &'static str,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_frames: u64,
    pub rx_frames: u64,
    pub tx_dropped: u64,
    pub rx_dropped: u64,
    pub tx_errors: u64,
    pub rx_errors: u64,
    pub discontinuities: u64,
    pub tx_rate_bps: u64,
    pub rx_rate_bps: u64,
    pub queued_frames: usize,
}

/// Handler for one tunneling-capable slave.
pub struct EoeHandler {
    slave: SlaveId,
    config: EoeConfig,
    glue: Box<dyn HostInterface>,
    state: HandlerState,
    open: bool,
    pending: Option<PendingHandle>,
    /// Retries spent on the operation currently on the wire.
    retries: u32,
    /// Write dispatches since the last read check.
    tx_since_check: u32,
    queue: Arc<TransmitQueue>,
    tx: Option<TxFrame>,
    next_frame_number: u8,
    rx: ReassemblyBuffer,
    tx_rate: RateTracker,
    rx_rate: RateTracker,
    counters: Counters,
}

impl EoeHandler {
    /// Create a handler for a discovered slave. The interface starts
    /// closed; the host glue opens it.
    pub fn new(
        slave: SlaveId,
        config: EoeConfig,
        glue: Box<dyn HostInterface>,
    ) -> crate::error::Result<Self> {
        config.validate()?;
        let window = config.rate_interval();
        Ok(Self {
            slave,
            glue,
            state: HandlerState::Idle,
            open: false,
            pending: None,
            retries: 0,
            tx_since_check: 0,
            queue: Arc::new(TransmitQueue::new(config.queue_capacity)),
            tx: None,
            next_frame_number: 0,
            rx: ReassemblyBuffer::new(),
            tx_rate: RateTracker::new(window),
            rx_rate: RateTracker::new(window),
            counters: Counters::default(),
            config,
        })
    }

    pub fn slave(&self) -> SlaveId {
        self.slave
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Producer-side handle for the host glue.
    pub fn queue_handle(&self) -> Arc<TransmitQueue> {
        Arc::clone(&self.queue)
    }

    /// Administratively open the interface.
    pub fn open(&mut self) {
        if !self.open {
            self.open = true;
            debug!(slave = %self.slave, "interface opened");
            self.glue.interface_state_changed(InterfaceState::Open);
        }
    }

    /// Administratively close the interface. Queued and in-flight frames
    /// are drained on the following cycles.
    pub fn close(&mut self) {
        if self.open {
            self.open = false;
            debug!(slave = %self.slave, "interface closed");
            self.glue.interface_state_changed(InterfaceState::Closed);
        }
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> HandlerStats {
        HandlerStats {
            slave: self.slave,
            open: self.open,
            state: self.state.name(),
            tx_bytes: self.counters.tx_bytes,
            rx_bytes: self.counters.rx_bytes,
            tx_frames: self.counters.tx_frames,
            rx_frames: self.counters.rx_frames,
            tx_dropped: self.counters.tx_dropped,
            rx_dropped: self.counters.rx_dropped,
            tx_errors: self.counters.tx_errors,
            rx_errors: self.counters.rx_errors,
            discontinuities: self.counters.discontinuities,
            tx_rate_bps: self.tx_rate.rate_bps(),
            rx_rate_bps: self.rx_rate.rate_bps(),
            queued_frames: self.queue.len(),
        }
    }

    /// Advance the state machine by one fieldbus cycle.
    pub fn advance(&mut self, transport: &mut dyn MailboxTransport, now: Instant) {
        self.tx_rate.sample(now);
        self.rx_rate.sample(now);
        if !self.open {
            self.drain(transport);
            return;
        }
        match self.state {
            HandlerState::Idle => self.advance_idle(transport),
            HandlerState::AwaitWriteResult => self.advance_write_result(transport),
            HandlerState::AwaitReadCheck => self.advance_read_check(transport),
            HandlerState::AwaitReadResult => self.advance_read_result(transport),
        }
    }

    /// Closed-interface path: drop local work, let an outstanding
    /// operation finish through the normal result poll, issue nothing new.
    fn drain(&mut self, transport: &mut dyn MailboxTransport) {
        let flushed = self.queue.flush();
        if flushed > 0 {
            debug!(slave = %self.slave, flushed, "flushed transmit queue");
            self.counters.tx_dropped += flushed as u64;
        }
        if self.tx.take().is_some() {
            self.counters.tx_dropped += 1;
        }
        if self.rx.in_progress() {
            self.counters.rx_dropped += 1;
            self.rx.reset();
        }
        match self.pending {
            Some(handle) => match transport.poll(handle) {
                PollOutcome::Pending => {}
                _ => {
                    self.pending = None;
                    self.state = HandlerState::Idle;
                }
            },
            None => self.state = HandlerState::Idle,
        }
    }

    fn advance_idle(&mut self, transport: &mut dyn MailboxTransport) {
        let force_check = self.tx_since_check >= self.config.tx_fairness_limit;
        if !force_check && self.start_transmit(transport) {
            return;
        }
        self.tx_since_check = 0;
        self.retries = 0;
        self.pending = Some(transport.queue_read_check(self.slave));
        self.state = HandlerState::AwaitReadCheck;
    }

    /// Dispatch the next outbound fragment if there is one. Returns true
    /// when a write went out.
    fn start_transmit(&mut self, transport: &mut dyn MailboxTransport) -> bool {
        if self.tx.is_none() {
            // pull the next frame, skipping any that cannot be fragmented
            while let Some(frame) = self.queue.dequeue() {
                let len = frame.len();
                match split(
                    frame,
                    self.next_frame_number,
                    self.config.port,
                    self.config.max_fragment_payload,
                ) {
                    Ok(fragments) => {
                        self.tx = Some(TxFrame {
                            fragments,
                            current: None,
                            mailbox: Bytes::new(),
                            frame_len: len,
                        });
                        break;
                    }
                    Err(error) => {
                        warn!(slave = %self.slave, len, %error, "dropping untransmittable frame");
                        self.counters.tx_dropped += 1;
                    }
                }
            }
        }
        let mut exhausted = false;
        let mailbox = match self.tx.as_mut() {
            None => return false,
            Some(tx) => {
                if tx.current.is_none() {
                    match tx.fragments.next() {
                        Some(fragment) => {
                            tx.mailbox = fragment.to_mailbox();
                            tx.current = Some(fragment);
                        }
                        None => exhausted = true,
                    }
                }
                tx.mailbox.clone()
            }
        };
        if exhausted {
            // a fragmenter never runs dry before its last fragment is
            // acknowledged; recover rather than wedge the cycle
            self.tx = None;
            return false;
        }
        trace!(slave = %self.slave, len = mailbox.len(), "dispatching fragment write");
        self.retries = 0;
        self.tx_since_check += 1;
        self.pending = Some(transport.queue_write(self.slave, mailbox));
        self.state = HandlerState::AwaitWriteResult;
        true
    }

    fn advance_write_result(&mut self, transport: &mut dyn MailboxTransport) {
        let handle = match self.pending {
            Some(handle) => handle,
            None => {
                self.state = HandlerState::Idle;
                return;
            }
        };
        match transport.poll(handle) {
            PollOutcome::Pending => {}
            PollOutcome::Done(_) => {
                self.pending = None;
                self.finish_fragment();
                self.state = HandlerState::Idle;
            }
            PollOutcome::Failed(reason) => {
                if self.retries >= self.config.transport_retry_limit {
                    warn!(
                        slave = %self.slave,
                        retries = self.retries,
                        %reason,
                        "mailbox write kept failing, dropping frame"
                    );
                    self.counters.tx_errors += 1;
                    self.counters.tx_dropped += 1;
                    self.tx = None;
                    self.pending = None;
                    self.state = HandlerState::Idle;
                } else {
                    self.retries += 1;
                    trace!(slave = %self.slave, retry = self.retries, %reason, "retrying mailbox write");
                    let mailbox = self.tx.as_ref().map(|tx| tx.mailbox.clone());
                    match mailbox {
                        Some(mailbox) => {
                            self.pending = Some(transport.queue_write(self.slave, mailbox));
                        }
                        None => {
                            self.pending = None;
                            self.state = HandlerState::Idle;
                        }
                    }
                }
            }
        }
    }

    /// A fragment write completed; release the frame if it was the last.
    fn finish_fragment(&mut self) {
        let (last, len) = match self.tx.as_mut() {
            Some(tx) => match tx.current.take() {
                Some(fragment) => (fragment.header.last_fragment, tx.frame_len),
                None => return,
            },
            None => return,
        };
        if last {
            debug!(slave = %self.slave, len, "frame transmitted");
            self.counters.tx_bytes += len as u64;
            self.counters.tx_frames += 1;
            self.tx_rate.record(len);
            self.next_frame_number = (self.next_frame_number + 1) % FRAME_MODULUS;
            self.tx = None;
        }
    }

    fn advance_read_check(&mut self, transport: &mut dyn MailboxTransport) {
        let handle = match self.pending {
            Some(handle) => handle,
            None => {
                self.state = HandlerState::Idle;
                return;
            }
        };
        match transport.poll(handle) {
            PollOutcome::Pending => {}
            PollOutcome::Done(status) => {
                self.pending = None;
                if mailbox_full(&status) {
                    self.retries = 0;
                    self.pending = Some(transport.queue_read(self.slave));
                    self.state = HandlerState::AwaitReadResult;
                } else {
                    // nothing to fetch this cycle
                    self.state = HandlerState::Idle;
                }
            }
            PollOutcome::Failed(reason) => {
                if self.retries >= self.config.transport_retry_limit {
                    self.give_up_receive(reason);
                } else {
                    self.retries += 1;
                    self.pending = Some(transport.queue_read_check(self.slave));
                }
            }
        }
    }

    fn advance_read_result(&mut self, transport: &mut dyn MailboxTransport) {
        let handle = match self.pending {
            Some(handle) => handle,
            None => {
                self.state = HandlerState::Idle;
                return;
            }
        };
        match transport.poll(handle) {
            PollOutcome::Pending => {}
            PollOutcome::Done(data) => {
                self.pending = None;
                self.state = HandlerState::Idle;
                self.process_mailbox(&data);
            }
            PollOutcome::Failed(reason) => {
                if self.retries >= self.config.transport_retry_limit {
                    self.give_up_receive(reason);
                } else {
                    self.retries += 1;
                    self.pending = Some(transport.queue_read(self.slave));
                }
            }
        }
    }

    /// The receive-side retry bound is exhausted.
    fn give_up_receive(&mut self, reason: String) {
        warn!(
            slave = %self.slave,
            retries = self.retries,
            %reason,
            "mailbox read kept failing"
        );
        self.counters.rx_errors += 1;
        if self.rx.in_progress() {
            self.counters.rx_dropped += 1;
            self.rx.reset();
        }
        self.pending = None;
        self.state = HandlerState::Idle;
    }

    /// Feed one fetched mailbox payload to the reassembly buffer.
    fn process_mailbox(&mut self, data: &Bytes) {
        let (header, payload) = match FragmentHeader::decode(data) {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!(slave = %self.slave, %error, "dropping undecodable mailbox payload");
                self.counters.rx_dropped += 1;
                return;
            }
        };
        if header.frame_type != FrameType::FragmentData {
            trace!(slave = %self.slave, frame_type = ?header.frame_type, "ignoring non-data frame");
            self.counters.rx_dropped += 1;
            return;
        }
        let mut payload = payload;
        if header.last_fragment && header.time_appended {
            if payload.len() < TIMESTAMP_LEN {
                self.counters.rx_dropped += 1;
                self.rx.reset();
                return;
            }
            payload = &payload[..payload.len() - TIMESTAMP_LEN];
        }
        let was_in_progress = self.rx.in_progress();
        match self.rx.push(&header, payload) {
            Ok(Reassembly::Complete(frame)) => self.deliver_frame(frame),
            Ok(Reassembly::Incomplete) => {}
            Err(error) => {
                debug!(slave = %self.slave, %error, "reassembly discontinuity");
                self.counters.discontinuities += 1;
                if was_in_progress {
                    self.counters.rx_dropped += 1;
                }
                // a fragment 0 that broke the old frame opens the next one
                if header.fragment_number == 0 {
                    match self.rx.push(&header, payload) {
                        Ok(Reassembly::Complete(frame)) => self.deliver_frame(frame),
                        Ok(Reassembly::Incomplete) => {}
                        Err(_) => {}
                    }
                }
            }
        }
    }

    fn deliver_frame(&mut self, frame: Bytes) {
        let len = frame.len();
        debug!(slave = %self.slave, len, "frame received");
        self.counters.rx_bytes += len as u64;
        self.counters.rx_frames += 1;
        self.rx_rate.record(len);
        self.glue.deliver_upward(frame);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Write,
        ReadCheck,
        Read,
    }

    /// Scripted transport: writes succeed or fail wholesale, reads hand
    /// out pre-loaded mailbox payloads.
    #[derive(Default)]
    struct MockTransport {
        next_handle: u64,
        in_flight: HashMap<u64, Op>,
        fail_writes: bool,
        writes: Vec<Bytes>,
        reads: std::collections::VecDeque<Bytes>,
    }

    impl MockTransport {
        fn issue(&mut self, op: Op) -> PendingHandle {
            let handle = self.next_handle;
            self.next_handle += 1;
            self.in_flight.insert(handle, op);
            PendingHandle(handle)
        }
    }

    impl MailboxTransport for MockTransport {
        fn queue_write(&mut self, _slave: SlaveId, payload: Bytes) -> PendingHandle {
            self.writes.push(payload);
            self.issue(Op::Write)
        }

        fn queue_read_check(&mut self, _slave: SlaveId) -> PendingHandle {
            self.issue(Op::ReadCheck)
        }

        fn queue_read(&mut self, _slave: SlaveId) -> PendingHandle {
            self.issue(Op::Read)
        }

        fn poll(&mut self, handle: PendingHandle) -> PollOutcome {
            match self.in_flight.remove(&handle.0) {
                Some(Op::Write) => {
                    if self.fail_writes {
                        PollOutcome::Failed("mailbox busy".into())
                    } else {
                        PollOutcome::Done(Bytes::new())
                    }
                }
                Some(Op::ReadCheck) => {
                    let status = if self.reads.is_empty() { 0x00 } else { 0x08 };
                    PollOutcome::Done(Bytes::from(vec![status]))
                }
                Some(Op::Read) => match self.reads.pop_front() {
                    Some(data) => PollOutcome::Done(data),
                    None => PollOutcome::Failed("mailbox empty".into()),
                },
                None => PollOutcome::Pending,
            }
        }
    }

    #[derive(Default)]
    struct RecordingGlue {
        delivered: std::sync::Arc<Mutex<Vec<Bytes>>>,
        states: std::sync::Arc<Mutex<Vec<InterfaceState>>>,
    }

    impl HostInterface for RecordingGlue {
        fn deliver_upward(&mut self, frame: Bytes) {
            self.delivered.lock().unwrap().push(frame);
        }

        fn interface_state_changed(&mut self, state: InterfaceState) {
            self.states.lock().unwrap().push(state);
        }
    }

    fn open_handler(config: EoeConfig) -> (EoeHandler, std::sync::Arc<Mutex<Vec<Bytes>>>) {
        let glue = RecordingGlue::default();
        let delivered = std::sync::Arc::clone(&glue.delivered);
        let mut handler = EoeHandler::new(SlaveId(4), config, Box::new(glue)).unwrap();
        handler.open();
        (handler, delivered)
    }

    fn frame_of(len: usize) -> Bytes {
        (0..len).map(|i| (i & 0xFF) as u8).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_write_retry_bound_counts_one_failure() {
        let config = EoeConfig {
            transport_retry_limit: 3,
            ..EoeConfig::default()
        };
        let (mut handler, _) = open_handler(config);
        let mut transport = MockTransport {
            fail_writes: true,
            ..MockTransport::default()
        };
        handler.queue_handle().enqueue(frame_of(100)).unwrap();

        let now = Instant::now();
        for _ in 0..8 {
            handler.advance(&mut transport, now);
        }
        // initial dispatch plus exactly three retries
        assert_eq!(transport.writes.len(), 4);
        let stats = handler.stats();
        assert_eq!(stats.tx_errors, 1);
        assert_eq!(stats.tx_dropped, 1);
        assert_eq!(stats.tx_bytes, 0);

        // the handler keeps working on the next frame
        transport.fail_writes = false;
        handler.queue_handle().enqueue(frame_of(64)).unwrap();
        for _ in 0..8 {
            handler.advance(&mut transport, now);
        }
        assert_eq!(handler.stats().tx_bytes, 64);
    }

    #[test]
    fn test_closed_handler_drains_and_stays_quiet() {
        let (mut handler, _) = open_handler(EoeConfig::default());
        let mut transport = MockTransport::default();
        handler.queue_handle().enqueue(frame_of(100)).unwrap();
        handler.close();

        let now = Instant::now();
        handler.advance(&mut transport, now);
        handler.advance(&mut transport, now);
        assert!(transport.writes.is_empty());
        assert_eq!(transport.next_handle, 0);
        let stats = handler.stats();
        assert_eq!(stats.tx_dropped, 1);
        assert_eq!(stats.queued_frames, 0);
    }

    #[test]
    fn test_open_close_notifies_glue() {
        let glue = RecordingGlue::default();
        let states = std::sync::Arc::clone(&glue.states);
        let mut handler =
            EoeHandler::new(SlaveId(1), EoeConfig::default(), Box::new(glue)).unwrap();
        handler.open();
        handler.open();
        handler.close();
        let seen = states.lock().unwrap();
        assert_eq!(seen.as_slice(), &[InterfaceState::Open, InterfaceState::Closed]);
    }

    #[test]
    fn test_idle_polls_receive_when_no_tx_work() {
        let (mut handler, _) = open_handler(EoeConfig::default());
        let mut transport = MockTransport::default();
        let now = Instant::now();
        handler.advance(&mut transport, now);
        assert_eq!(handler.state(), HandlerState::AwaitReadCheck);
        handler.advance(&mut transport, now);
        assert_eq!(handler.state(), HandlerState::Idle);
    }

    #[test]
    fn test_fairness_forces_read_check_between_frames() {
        let config = EoeConfig {
            tx_fairness_limit: 1,
            ..EoeConfig::default()
        };
        let (mut handler, _) = open_handler(config);
        let mut transport = MockTransport::default();
        let queue = handler.queue_handle();
        queue.enqueue(frame_of(32)).unwrap();
        queue.enqueue(frame_of(32)).unwrap();

        let now = Instant::now();
        // frame 1: dispatch + result
        handler.advance(&mut transport, now);
        assert_eq!(handler.state(), HandlerState::AwaitWriteResult);
        handler.advance(&mut transport, now);
        // fairness limit reached, the next idle cycle checks receive
        handler.advance(&mut transport, now);
        assert_eq!(handler.state(), HandlerState::AwaitReadCheck);
    }

    #[test]
    fn test_oversized_frame_dropped_not_fatal() {
        let (mut handler, _) = open_handler(EoeConfig::default());
        let mut transport = MockTransport::default();
        handler.queue_handle().enqueue(frame_of(3000)).unwrap();
        handler.queue_handle().enqueue(frame_of(40)).unwrap();

        let now = Instant::now();
        for _ in 0..6 {
            handler.advance(&mut transport, now);
        }
        let stats = handler.stats();
        assert_eq!(stats.tx_dropped, 1);
        assert_eq!(stats.tx_bytes, 40);
    }
}

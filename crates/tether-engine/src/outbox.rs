//! Outbound delivery: transports, sequencing, acknowledgement and replay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use tether_core::frame::Frame;

use crate::codec::{encode_server, ServerMessage};

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Persistent bidirectional stream (WebSocket).
    Stream,
    /// Long-poll fallback.
    Polling,
}

/// Sending half of one client connection. The receiving half is drained by
/// whatever owns the socket or the pending poll request.
#[derive(Clone, Debug)]
pub struct Transport {
    id: u64,
    kind: TransportKind,
    tx: mpsc::Sender<Frame>,
}

impl Transport {
    pub fn channel(kind: TransportKind, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, kind, tx }, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Sent,
    Queued,
    /// No full render has gone out and nobody is attached; the frame is
    /// dropped because the first attach renders from scratch.
    Deferred,
    /// The transport went away; it has been dropped and the frame queued.
    TransportClosed,
    /// Too many frames queued; everything was dropped and the next attach
    /// gets a full resync.
    Overflow,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AttachPlan {
    Replayed,
    NeedsResync,
}

pub(crate) struct Outbox {
    next_seq: u64,
    unacked: VecDeque<(u64, Frame)>,
    /// How many of `unacked` are already on the current transport.
    resent: usize,
    pending: VecDeque<(u64, Frame)>,
    transport: Option<Transport>,
    max_pending: usize,
    needs_resync: bool,
}

impl Outbox {
    /// `needs_resync`: whether a client claiming to hold a tree must still
    /// get a full render on first attach (true unless resuming a snapshot).
    pub fn new(max_pending: usize, needs_resync: bool) -> Self {
        Self {
            next_seq: 1,
            unacked: VecDeque::new(),
            resent: 0,
            pending: VecDeque::new(),
            transport: None,
            max_pending,
            needs_resync,
        }
    }

    pub fn transport(&self) -> Option<&Transport> {
        self.transport.as_ref()
    }

    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, body: &[ServerMessage]) -> SendOutcome {
        if self.needs_resync && self.transport.is_none() {
            return SendOutcome::Deferred;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        // Always behind whatever is already queued.
        self.pending.push_back((seq, encode_server(seq, body)));

        if self.transport.is_some() && !self.flush() {
            return self.check_overflow().unwrap_or(SendOutcome::TransportClosed);
        }
        if let Some(outcome) = self.check_overflow() {
            return outcome;
        }
        if self.pending.is_empty() {
            SendOutcome::Sent
        } else {
            SendOutcome::Queued
        }
    }

    /// Drop everything up to and including `seq`.
    pub fn ack(&mut self, seq: u64) {
        while self.unacked.front().is_some_and(|(s, _)| *s <= seq) {
            self.unacked.pop_front();
            self.resent = self.resent.saturating_sub(1);
        }
    }

    pub fn attach(&mut self, transport: Transport, has_tree: bool) -> AttachPlan {
        self.transport = Some(transport);
        if !has_tree || self.needs_resync {
            self.reset();
            return AttachPlan::NeedsResync;
        }
        self.replay();
        AttachPlan::Replayed
    }

    /// Detach if `transport_id` is the current transport.
    pub fn detach(&mut self, transport_id: u64) -> bool {
        if self.transport.as_ref().map(Transport::id) == Some(transport_id) {
            self.transport = None;
            true
        } else {
            false
        }
    }

    pub fn drop_transport(&mut self) {
        self.transport = None;
    }

    /// Forget everything in flight; the caller follows with a full render.
    pub fn reset(&mut self) {
        self.unacked.clear();
        self.resent = 0;
        self.pending.clear();
        self.needs_resync = false;
    }

    /// Resend unacked frames, then flush the pending queue while the
    /// transport accepts them. Returns false if the transport closed.
    pub fn replay(&mut self) -> bool {
        self.resent = 0;
        self.flush()
    }

    /// Move frames onto the transport, oldest first: unacked frames not yet
    /// resent on this transport, then the pending queue. A full transport
    /// stops the walk so nothing newer overtakes an older frame.
    pub fn flush(&mut self) -> bool {
        let Some(transport) = self.transport.clone() else {
            return false;
        };
        while let Some((_, frame)) = self.unacked.get(self.resent) {
            match transport.tx.try_send(frame.clone()) {
                Ok(()) => self.resent += 1,
                Err(TrySendError::Full(_)) => return true,
                Err(TrySendError::Closed(_)) => {
                    self.transport = None;
                    return false;
                }
            }
        }
        while let Some((seq, frame)) = self.pending.pop_front() {
            match transport.tx.try_send(frame.clone()) {
                Ok(()) => self.track(seq, frame),
                Err(TrySendError::Full(_)) => {
                    self.pending.push_front((seq, frame));
                    return true;
                }
                Err(TrySendError::Closed(_)) => {
                    self.pending.push_front((seq, frame));
                    self.transport = None;
                    return false;
                }
            }
        }
        true
    }

    fn track(&mut self, seq: u64, frame: Frame) {
        self.unacked.push_back((seq, frame));
        self.resent += 1;
        if self.unacked.len() > self.max_pending {
            // The client stopped acking; a reconnect can no longer replay.
            self.unacked.pop_front();
            self.resent = self.resent.saturating_sub(1);
            self.needs_resync = true;
        }
    }

    fn check_overflow(&mut self) -> Option<SendOutcome> {
        if self.pending.len() <= self.max_pending {
            return None;
        }
        self.unacked.clear();
        self.resent = 0;
        self.pending.clear();
        self.needs_resync = true;
        Some(SendOutcome::Overflow)
    }
}

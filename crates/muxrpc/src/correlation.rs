//! Call id issuance and bookkeeping for one connection.
//!
//! Both maps are keyed by the positive call id: outgoing calls by the id we
//! assigned, incoming calls by the id the peer assigned.

use crate::error::{Error, Result};
use crate::protocol::{Body, CallType};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

/// Completion slot for an outstanding async call.
pub type AsyncReply = oneshot::Sender<Result<Body>>;

/// What the consumer of a source call receives.
#[derive(Debug)]
pub enum StreamEvent {
    /// A value frame, or one whose body failed to decode.
    Item(Result<Body>),
    /// The terminal frame, with its error if the call failed.
    End(Option<Error>),
}

/// Feed for the consumer of an outstanding source call.
pub type StreamFeed = mpsc::Sender<StreamEvent>;

/// A call we initiated and have not seen the end of.
#[derive(Debug)]
pub enum OutgoingCall {
    /// Waiting for the single reply frame.
    Async(AsyncReply),
    /// Receiving stream frames until the terminal frame.
    Source(StreamFeed),
}

impl OutgoingCall {
    /// The call type this record tracks.
    #[must_use]
    pub const fn call_type(&self) -> CallType {
        match self {
            Self::Async(_) => CallType::Async,
            Self::Source(_) => CallType::Source,
        }
    }

    /// Fail the call, waking whoever is waiting on it.
    pub fn fail(self, err: Error) {
        match self {
            Self::Async(reply) => {
                let _ = reply.send(Err(err));
            }
            Self::Source(feed) => {
                // A full feed is closed without an end event, which the
                // consumer reads as a lost connection.
                let _ = feed.try_send(StreamEvent::End(Some(err)));
            }
        }
    }
}

/// A call the peer initiated that is still being served.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IncomingCall {
    /// The call type being served.
    pub call_type: CallType,
}

/// Outstanding calls in both directions, plus the id counter.
#[derive(Debug)]
pub struct CorrelationTable {
    next_id: i32,
    outgoing: HashMap<i32, OutgoingCall>,
    incoming: HashMap<i32, IncomingCall>,
    closed: bool,
}

impl CorrelationTable {
    /// Create an empty table whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(first_id: i32) -> Self {
        Self {
            next_id: first_id,
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            closed: false,
        }
    }

    /// Issue the next call id.
    ///
    /// Ids increase by one from 1. After `i32::MAX` the counter wraps to 1
    /// and skips ids that still belong to an outstanding call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdSpaceExhausted`] if every id is outstanding.
    pub fn next_id(&mut self) -> Result<i32> {
        for _ in 0..=self.outgoing.len() {
            let id = self.next_id;
            self.next_id = if id == i32::MAX { 1 } else { id + 1 };

            if !self.outgoing.contains_key(&id) {
                return Ok(id);
            }
        }

        Err(Error::IdSpaceExhausted)
    }

    /// Track an outgoing call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] once the table has been closed.
    pub fn register_outgoing(&mut self, id: i32, call: OutgoingCall) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.outgoing.insert(id, call);
        Ok(())
    }

    /// Issue an id and track `call` under it in one step.
    ///
    /// # Errors
    ///
    /// Fails if the table is closed or the id space is exhausted.
    pub fn open_outgoing(&mut self, call: OutgoingCall) -> Result<i32> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let id = self.next_id()?;
        self.outgoing.insert(id, call);
        Ok(id)
    }

    /// Look up an outgoing call.
    #[must_use]
    pub fn lookup_outgoing(&self, id: i32) -> Option<&OutgoingCall> {
        self.outgoing.get(&id)
    }

    /// Stop tracking an outgoing call.
    pub fn remove_outgoing(&mut self, id: i32) -> Option<OutgoingCall> {
        self.outgoing.remove(&id)
    }

    /// Remove and return the reply slot of an async call. Records of other
    /// types are left in place.
    pub fn take_async(&mut self, id: i32) -> Option<AsyncReply> {
        match self.outgoing.remove(&id)? {
            OutgoingCall::Async(reply) => Some(reply),
            other => {
                self.outgoing.insert(id, other);
                None
            }
        }
    }

    /// Remove an async call whose caller has stopped waiting. A record whose
    /// reply slot is still open belongs to a newer call and is kept.
    pub fn remove_abandoned_async(&mut self, id: i32) -> bool {
        let abandoned = matches!(
            self.outgoing.get(&id),
            Some(OutgoingCall::Async(reply)) if reply.is_closed()
        );
        if abandoned {
            self.outgoing.remove(&id);
        }
        abandoned
    }

    /// A handle to the feed of a source call, leaving the record in place.
    #[must_use]
    pub fn source_feed(&self, id: i32) -> Option<StreamFeed> {
        match self.outgoing.get(&id)? {
            OutgoingCall::Source(feed) => Some(feed.clone()),
            OutgoingCall::Async(_) => None,
        }
    }

    /// Remove and return the feed of a source call. Records of other types
    /// are left in place.
    pub fn take_source(&mut self, id: i32) -> Option<StreamFeed> {
        match self.outgoing.remove(&id)? {
            OutgoingCall::Source(feed) => Some(feed),
            other => {
                self.outgoing.insert(id, other);
                None
            }
        }
    }

    /// Remove a source call whose consumer has gone away. A record whose
    /// feed is still open belongs to a newer call and is kept.
    pub fn remove_abandoned_source(&mut self, id: i32) -> bool {
        let abandoned = matches!(
            self.outgoing.get(&id),
            Some(OutgoingCall::Source(feed)) if feed.is_closed()
        );
        if abandoned {
            self.outgoing.remove(&id);
        }
        abandoned
    }

    /// Track a call the peer initiated.
    pub fn register_incoming(&mut self, id: i32, call: IncomingCall) {
        self.incoming.insert(id, call);
    }

    /// Whether a call with this id is being served.
    #[must_use]
    pub fn has_incoming(&self, id: i32) -> bool {
        self.incoming.contains_key(&id)
    }

    /// Stop tracking a served call.
    pub fn remove_incoming(&mut self, id: i32) -> Option<IncomingCall> {
        self.incoming.remove(&id)
    }

    /// Number of outstanding outgoing calls.
    #[must_use]
    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    /// Number of calls being served.
    #[must_use]
    pub fn incoming_len(&self) -> usize {
        self.incoming.len()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Refuse new calls and hand back everything still outstanding.
    pub fn close(&mut self) -> Vec<OutgoingCall> {
        self.closed = true;
        self.incoming.clear();
        self.outgoing.drain().map(|(_, call)| call).collect()
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

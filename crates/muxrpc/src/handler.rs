//! Serving calls the peer makes.

use crate::error::RemoteError;
use crate::mux::Producer;
use crate::protocol::{Body, CallRequest, Encoding, Frame};
use crate::rpc::Shared;
use futures::stream::{self, Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Application logic for inbound calls.
///
/// Both methods run on the connection's reader, so they should hand long
/// work to a spawned task. An async call is answered through its
/// [`Responder`], which may be moved anywhere. A source call returns the
/// values to stream.
pub trait CallHandler: Send + Sync + 'static {
    /// Serve an async call.
    fn handle_async(&self, request: CallRequest, responder: Responder) {
        responder.reply(Err(RemoteError::new(format!(
            "no async method named {}",
            request.name
        ))));
    }

    /// Serve a source call.
    ///
    /// # Errors
    ///
    /// An error is sent to the caller as the stream's terminal frame.
    fn handle_source(&self, request: CallRequest) -> Result<Source, RemoteError> {
        Err(RemoteError::new(format!(
            "no source method named {}",
            request.name
        )))
    }
}

/// The values a source call streams back.
pub struct Source {
    pub(crate) encoding: Encoding,
    pub(crate) producer: Producer,
}

impl Source {
    /// Stream from a fallible producer. An `Err` item ends the stream with
    /// that error.
    pub fn new<S>(encoding: Encoding, producer: S) -> Self
    where
        S: Stream<Item = Result<Body, RemoteError>> + Send + 'static,
    {
        Self {
            encoding,
            producer: producer.boxed(),
        }
    }

    /// Stream every item of `values`, then end normally.
    pub fn values<S>(encoding: Encoding, values: S) -> Self
    where
        S: Stream + Send + 'static,
        S::Item: Into<Body>,
    {
        Self::new(encoding, values.map(|value| Ok::<_, RemoteError>(value.into())))
    }

    /// Stream every item of `iter`, then end normally.
    pub fn iter<I>(encoding: Encoding, iter: I) -> Self
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: Into<Body>,
    {
        Self::values(encoding, stream::iter(iter))
    }

    /// A stream that ends immediately.
    #[must_use]
    pub fn empty(encoding: Encoding) -> Self {
        Self::new(encoding, stream::empty())
    }

    /// Encoding of every value frame.
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

/// The one-shot reply slot of an inbound async call.
///
/// Dropping a responder without replying sends an error reply, so the
/// caller never waits forever.
pub struct Responder {
    id: i32,
    shared: Arc<Shared>,
    replied: bool,
}

impl Responder {
    pub(crate) const fn new(id: i32, shared: Arc<Shared>) -> Self {
        Self {
            id,
            shared,
            replied: false,
        }
    }

    /// The call id assigned by the peer.
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// Reply using the body's own encoding.
    pub fn reply(mut self, result: Result<Body, RemoteError>) {
        self.send(Frame::reply(-self.id, result));
    }

    /// Reply with an explicit encoding. A value that cannot be written with
    /// `encoding` turns into an error reply.
    pub fn reply_with_encoding(mut self, encoding: Encoding, result: Result<Body, RemoteError>) {
        let frame = match result {
            Ok(body) => Frame::with_encoding(-self.id, encoding, body, false, false),
            Err(err) => Frame::reply(-self.id, Err(err)),
        };
        self.send(frame);
    }

    fn send(&mut self, frame: Frame) {
        self.replied = true;
        self.shared.table.lock().remove_incoming(self.id);

        let max_frame_size = self.shared.config.max_frame_size;
        let encoded = frame.encode(max_frame_size).or_else(|err| {
            warn!(id = self.id, error = %err, "Reply could not be encoded");
            Frame::reply(-self.id, Err(RemoteError::from(&err))).encode(max_frame_size)
        });

        match encoded {
            Ok(encoded) => {
                if self.shared.send_encoded(encoded).is_err() {
                    debug!(id = self.id, "Connection closed before reply was sent");
                }
            }
            Err(err) => warn!(id = self.id, error = %err, "Dropping reply"),
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.replied {
            self.send(Frame::reply(
                -self.id,
                Err(RemoteError::new("call dropped without a reply")),
            ));
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("id", &self.id)
            .field("replied", &self.replied)
            .finish_non_exhaustive()
    }
}

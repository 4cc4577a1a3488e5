//! Outbound side of a source call we are serving.

use crate::error::RemoteError;
use crate::protocol::{Body, EncodedFrame, Encoding, Frame};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tracing::{debug, warn};

/// Values produced by a source handler.
pub type Producer = BoxStream<'static, Result<Body, RemoteError>>;

type OnEnd = Box<dyn FnOnce() + Send>;

/// Turns a producer into wire frames for call `id`.
///
/// Each value becomes a stream frame on `-id`. The stream always finishes
/// with exactly one terminal frame: `true` once the producer is exhausted,
/// or the error detail if it failed or yielded a value the encoding cannot
/// carry. The producer is dropped as soon as the terminal frame is built.
pub struct OutboundSource {
    id: i32,
    encoding: Encoding,
    max_frame_size: usize,
    producer: Option<Producer>,
    on_end: Option<OnEnd>,
}

impl OutboundSource {
    /// Serve the source call `id` from `producer`.
    #[must_use]
    pub fn new(id: i32, encoding: Encoding, max_frame_size: usize, producer: Producer) -> Self {
        Self {
            id,
            encoding,
            max_frame_size,
            producer: Some(producer),
            on_end: None,
        }
    }

    /// Run `on_end` once the terminal frame has been produced, or when the
    /// source is dropped before that.
    #[must_use]
    pub fn on_end(mut self, on_end: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(on_end));
        self
    }

    /// The call id being served.
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    fn finish(&mut self) {
        self.producer = None;
        if let Some(on_end) = self.on_end.take() {
            on_end();
        }
    }

    fn terminal(&self, error: Option<&RemoteError>) -> Option<EncodedFrame> {
        let frame = Frame::stream_end(-self.id, error);
        match frame.encode(self.max_frame_size) {
            Ok(encoded) => Some(encoded),
            Err(err) => {
                warn!(id = self.id, error = %err, "Error detail too large, sending generic end");
                Frame::stream_end(-self.id, Some(&RemoteError::new("source failed")))
                    .encode(self.max_frame_size)
                    .ok()
            }
        }
    }
}

impl Stream for OutboundSource {
    type Item = EncodedFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(producer) = this.producer.as_mut() else {
            return Poll::Ready(None);
        };

        let failure = match ready!(producer.poll_next_unpin(cx)) {
            Some(Ok(body)) => {
                match Frame::stream_data(-this.id, this.encoding, body).encode(this.max_frame_size)
                {
                    Ok(encoded) => return Poll::Ready(Some(encoded)),
                    Err(err) => {
                        warn!(id = this.id, error = %err, "Source value could not be encoded");
                        Some(RemoteError::from(&err))
                    }
                }
            }
            Some(Err(err)) => {
                debug!(id = this.id, error = %err, "Source ended with error");
                Some(err)
            }
            None => {
                debug!(id = this.id, "Source completed");
                None
            }
        };

        let terminal = this.terminal(failure.as_ref());
        this.finish();
        Poll::Ready(terminal)
    }
}

impl Drop for OutboundSource {
    fn drop(&mut self) {
        if let Some(on_end) = self.on_end.take() {
            on_end();
        }
    }
}

impl fmt::Debug for OutboundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundSource")
            .field("id", &self.id)
            .field("encoding", &self.encoding)
            .field("finished", &self.producer.is_none())
            .finish_non_exhaustive()
    }
}

//! Routing of inbound frames.
//!
//! Every frame read from the transport is classified against the
//! correlation table and handed to exactly one destination: a new call for
//! the local handler, the reply slot of one of our async calls, or the feed
//! of one of our source calls. Frames that fit none of these are dropped.

use crate::correlation::{CorrelationTable, IncomingCall, OutgoingCall, StreamEvent};
use crate::error::{CodecError, Error, ProtocolError, RemoteError};
use crate::handler::Responder;
use crate::mux::OutboundSource;
use crate::protocol::{Body, CallRequest, CallType, EncodedFrame, Frame, Header};
use crate::rpc::Shared;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where an inbound frame goes.
#[derive(Debug)]
pub enum Route {
    /// The peer opened an async call.
    NewAsyncCall(CallRequest),
    /// The reply to one of our async calls.
    AsyncResponse,
    /// The peer opened a source call.
    NewSourceCall(CallRequest),
    /// A value or terminal frame of one of our source calls.
    StreamData,
    /// The peer opened a call we cannot parse.
    InvalidCall(ProtocolError),
    /// The peer opened a call whose body failed to decode.
    UndecodableCall,
    /// Nothing claims this frame.
    Unroutable(Unroutable),
}

/// Why a frame was dropped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Unroutable {
    /// Id 0 is never issued.
    ZeroId,
    /// `i32::MIN` has no positive counterpart.
    IdOutOfRange,
    /// A new-call frame reused the id of a call still being served.
    DuplicateCall,
    /// No outstanding call of ours has this id.
    CorrelationMiss,
    /// The stream flag does not match the type of our call.
    TypeMismatch,
}

impl fmt::Display for Unroutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ZeroId => "zero id",
            Self::IdOutOfRange => "id out of range",
            Self::DuplicateCall => "duplicate call id",
            Self::CorrelationMiss => "no matching call",
            Self::TypeMismatch => "stream flag does not match call type",
        })
    }
}

/// Classify a frame.
///
/// Positive ids open calls from the peer. Negative ids answer our calls.
/// `body` is the decoded body, which only matters for new calls.
#[must_use]
pub fn classify(
    header: &Header,
    body: &Result<Body, CodecError>,
    table: &CorrelationTable,
) -> Route {
    let id = header.id;

    if id == 0 {
        return Route::Unroutable(Unroutable::ZeroId);
    }

    if id > 0 {
        if table.has_incoming(id) {
            return Route::Unroutable(Unroutable::DuplicateCall);
        }

        let Ok(body) = body else {
            return Route::UndecodableCall;
        };
        let Body::Json(value) = body else {
            return Route::InvalidCall(ProtocolError::UnexpectedEncoding(header.encoding));
        };

        return match CallRequest::from_value(value) {
            Ok(request) => match request.call_type {
                CallType::Async => Route::NewAsyncCall(request),
                CallType::Source => Route::NewSourceCall(request),
            },
            Err(err) => Route::InvalidCall(err),
        };
    }

    let Some(call_id) = id.checked_neg() else {
        return Route::Unroutable(Unroutable::IdOutOfRange);
    };

    match table.lookup_outgoing(call_id) {
        Some(OutgoingCall::Async(_)) if !header.stream => Route::AsyncResponse,
        Some(OutgoingCall::Source(_)) if header.stream => Route::StreamData,
        Some(_) => Route::Unroutable(Unroutable::TypeMismatch),
        None => Route::Unroutable(Unroutable::CorrelationMiss),
    }
}

/// Delivers classified frames.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Route and deliver one frame.
    ///
    /// Waits only when a source consumer's buffer is full, which is what
    /// stops the reader and, through the transport, the remote producer.
    pub async fn dispatch(&self, frame: EncodedFrame) {
        let header = frame.header;
        let body = frame.decode().map(|frame| frame.body);
        let route = classify(&header, &body, &self.shared.table.lock());

        match route {
            Route::NewAsyncCall(request) => self.start_async(header.id, request),
            Route::NewSourceCall(request) => self.start_source(header.id, request),
            Route::AsyncResponse => self.resolve_async(header, body),
            Route::StreamData => self.feed_source(header, body).await,
            Route::InvalidCall(err) => self.reject(&header, &Error::Protocol(err)),
            Route::UndecodableCall => {
                if let Err(err) = body {
                    self.reject(&header, &Error::Codec(err));
                }
            }
            Route::Unroutable(reason) => {
                debug!(id = header.id, stream = header.stream, %reason, "Dropping frame");
            }
        }
    }

    /// Fail every outstanding call; the connection is gone.
    pub fn close(&self) {
        self.shared.close_calls();
    }

    fn start_async(&self, id: i32, request: CallRequest) {
        let Some(handler) = self.shared.handler() else {
            self.reject_call(id, false, "no call handler registered");
            return;
        };

        debug!(id, name = %request.name, "Serving async call");
        self.shared.table.lock().register_incoming(
            id,
            IncomingCall {
                call_type: CallType::Async,
            },
        );
        handler.handle_async(request, Responder::new(id, Arc::clone(&self.shared)));
    }

    fn start_source(&self, id: i32, request: CallRequest) {
        let Some(handler) = self.shared.handler() else {
            self.reject_call(id, true, "no call handler registered");
            return;
        };

        debug!(id, name = %request.name, "Serving source call");
        self.shared.table.lock().register_incoming(
            id,
            IncomingCall {
                call_type: CallType::Source,
            },
        );

        match handler.handle_source(request) {
            Ok(source) => {
                let shared = Arc::downgrade(&self.shared);
                let outbound = OutboundSource::new(
                    id,
                    source.encoding,
                    self.shared.config.max_frame_size,
                    source.producer,
                )
                .on_end(move || {
                    if let Some(shared) = shared.upgrade() {
                        shared.table.lock().remove_incoming(id);
                    }
                });

                if self.shared.attach(outbound).is_err() {
                    debug!(id, "Connection closed before source started");
                }
            }
            Err(err) => {
                self.shared.table.lock().remove_incoming(id);
                self.send(&Frame::stream_end(-id, Some(&err)));
            }
        }
    }

    fn resolve_async(&self, header: Header, body: Result<Body, CodecError>) {
        let call_id = -header.id;
        let Some(reply) = self.shared.table.lock().take_async(call_id) else {
            debug!(id = header.id, "Async call already gone");
            return;
        };

        let result = match body {
            Ok(body) if header.err => Err(Error::Remote(RemoteError::from_body(&body))),
            Ok(body) => Ok(body),
            Err(err) => Err(Error::Codec(err)),
        };

        if reply.send(result).is_err() {
            debug!(id = call_id, "Caller stopped waiting for reply");
        }
    }

    async fn feed_source(&self, header: Header, body: Result<Body, CodecError>) {
        let call_id = -header.id;

        if header.is_terminal() {
            let Some(feed) = self.shared.table.lock().take_source(call_id) else {
                return;
            };
            let failure = match body {
                Ok(Body::Json(Value::Bool(true))) => None,
                Ok(body) => Some(Error::Remote(RemoteError::from_body(&body))),
                Err(err) => Some(Error::Codec(err)),
            };
            debug!(id = call_id, failed = failure.is_some(), "Source call ended");
            let _ = feed.send(StreamEvent::End(failure)).await;
            return;
        }

        let Some(feed) = self.shared.table.lock().source_feed(call_id) else {
            return;
        };
        let item = StreamEvent::Item(body.map_err(Error::Codec));
        if feed.send(item).await.is_err() {
            debug!(id = call_id, "Source consumer gone");
            self.shared.table.lock().remove_abandoned_source(call_id);
        }
    }

    /// Answer a malformed call on `-id`, matching the request's stream flag.
    fn reject(&self, header: &Header, err: &Error) {
        warn!(id = header.id, error = %err, "Rejecting malformed call");
        self.reject_call(header.id, header.stream, &err.to_string());
    }

    fn reject_call(&self, id: i32, stream: bool, message: &str) {
        let err = RemoteError::new(message);
        let frame = if stream {
            Frame::stream_end(-id, Some(&err))
        } else {
            Frame::reply(-id, Err(err))
        };
        self.send(&frame);
    }

    fn send(&self, frame: &Frame) {
        if let Err(err) = self.shared.push(frame) {
            debug!(id = frame.header.id, error = %err, "Could not send frame");
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

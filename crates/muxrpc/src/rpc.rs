//! The caller-facing handle of a muxrpc connection.

use crate::config::MuxRpcConfig;
use crate::correlation::{CorrelationTable, OutgoingCall, StreamEvent};
use crate::endpoint::Endpoint;
use crate::error::{CodecError, Error, Result};
use crate::handler::CallHandler;
use crate::mux::{FanIn, OutboundSource};
use crate::protocol::{Body, CallRequest, CallType, EncodedFrame, Frame};
use futures::stream::Stream;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// State shared by the handle, the endpoint and every responder.
pub(crate) struct Shared {
    pub(crate) table: Mutex<CorrelationTable>,
    pub(crate) config: MuxRpcConfig,
    pub(crate) shutdown: CancellationToken,
    control: mpsc::UnboundedSender<EncodedFrame>,
    attach: mpsc::UnboundedSender<OutboundSource>,
    handler: RwLock<Option<Arc<dyn CallHandler>>>,
}

impl Shared {
    /// Encode `frame` and queue it for writing.
    pub(crate) fn push(&self, frame: &Frame) -> Result<()> {
        let encoded = frame.encode(self.config.max_frame_size)?;
        self.send_encoded(encoded)
    }

    pub(crate) fn send_encoded(&self, frame: EncodedFrame) -> Result<()> {
        self.control
            .send(frame)
            .map_err(|_| Error::ConnectionClosed)
    }

    pub(crate) fn attach(&self, source: OutboundSource) -> Result<()> {
        self.attach.send(source).map_err(|_| Error::ConnectionClosed)
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn CallHandler>> {
        self.handler.read().clone()
    }

    /// Refuse new calls and fail every outstanding one.
    pub(crate) fn close_calls(&self) {
        let calls = self.table.lock().close();
        if !calls.is_empty() {
            debug!(count = calls.len(), "Failing outstanding calls");
        }
        for call in calls {
            call.fail(Error::ConnectionClosed);
        }
    }
}

/// A handle to one muxrpc connection.
///
/// Cloning is cheap. Calls can be made from any task once the paired
/// [`Endpoint`] is running over a transport.
#[derive(Clone)]
pub struct MuxRpc {
    shared: Arc<Shared>,
}

impl MuxRpc {
    /// Create a connection handle and the endpoint that drives it.
    #[must_use]
    pub fn new(config: MuxRpcConfig) -> (Self, Endpoint) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (attach_tx, attach_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            table: Mutex::new(CorrelationTable::new()),
            config,
            shutdown: CancellationToken::new(),
            control: control_tx,
            attach: attach_tx,
            handler: RwLock::new(None),
        });

        let endpoint = Endpoint::new(FanIn::new(control_rx, attach_rx), Arc::clone(&shared));
        (Self { shared }, endpoint)
    }

    /// Register the handler for inbound calls, replacing any previous one.
    ///
    /// Calls that arrive while no handler is registered get an error reply.
    pub fn on_request(&self, handler: impl CallHandler) {
        *self.shared.handler.write() = Some(Arc::new(handler));
    }

    /// Make an async call and wait for its single reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] for an error reply, [`Error::InvalidRequest`]
    /// if `name` is empty or `args` is not a sequence, [`Error::Timeout`] if
    /// the configured deadline passes, and [`Error::ConnectionClosed`] if the
    /// endpoint stops first.
    #[instrument(skip(self, args))]
    pub async fn request_async<A>(&self, name: &str, args: A) -> Result<Body>
    where
        A: Serialize,
    {
        let body = build_request(name, CallType::Async, &args)?.to_body()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let id = self
            .shared
            .table
            .lock()
            .open_outgoing(OutgoingCall::Async(reply_tx))?;
        let mut pending = PendingReply {
            id,
            shared: &self.shared,
            reply: reply_rx,
        };

        debug!(id, "Sending async request");
        self.shared.push(&Frame::new(id, body, false, false))?;

        let reply = match self.shared.config.request_timeout {
            Some(deadline) => tokio::time::timeout(deadline, &mut pending.reply)
                .await
                .map_err(|_| Error::Timeout(deadline))?,
            None => (&mut pending.reply).await,
        };

        reply.map_err(|_| Error::ConnectionClosed)?
    }

    /// Make a source call. Values arrive on the returned stream, which ends
    /// after the terminal frame. An error terminal yields one `Err` item
    /// first.
    ///
    /// Dropping the stream stops delivery and forgets the call.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be built or the endpoint has stopped.
    #[instrument(skip(self, args))]
    pub fn request_source<A>(&self, name: &str, args: A) -> Result<SourceStream>
    where
        A: Serialize,
    {
        let body = build_request(name, CallType::Source, &args)?.to_body()?;
        let (feed_tx, feed_rx) = mpsc::channel(self.shared.config.source_buffer.max(1));
        let id = self
            .shared
            .table
            .lock()
            .open_outgoing(OutgoingCall::Source(feed_tx))?;

        debug!(id, "Sending source request");
        if let Err(err) = self
            .shared
            .push(&Frame::new(id, body, false, true))
        {
            self.shared.table.lock().remove_outgoing(id);
            return Err(err);
        }

        Ok(SourceStream {
            id,
            inner: ReceiverStream::new(feed_rx),
            finished: false,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Stop the endpoint. Outstanding calls fail with
    /// [`Error::ConnectionClosed`] and no new calls are accepted.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.close_calls();
    }

    /// Whether the connection has stopped accepting calls.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.table.lock().is_closed()
    }

    /// Number of calls we made that have not completed.
    #[must_use]
    pub fn outstanding_calls(&self) -> usize {
        self.shared.table.lock().outgoing_len()
    }

    /// Number of peer calls being served.
    #[must_use]
    pub fn active_incoming(&self) -> usize {
        self.shared.table.lock().incoming_len()
    }
}

impl fmt::Debug for MuxRpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxRpc")
            .field("config", &self.shared.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn build_request<A: Serialize>(name: &str, call_type: CallType, args: &A) -> Result<CallRequest> {
    if name.is_empty() {
        return Err(Error::InvalidRequest("call name is empty".to_string()));
    }

    let args = match serde_json::to_value(args).map_err(CodecError::Serialize)? {
        Value::Array(args) => args,
        other => {
            return Err(Error::InvalidRequest(format!(
                "args must serialize to an array, got {other}"
            )));
        }
    };

    Ok(CallRequest {
        name: name.to_string(),
        call_type,
        args,
    })
}

/// The reply slot of an async call in flight. Dropping it before the reply
/// arrives forgets the call.
struct PendingReply<'a> {
    id: i32,
    shared: &'a Shared,
    reply: oneshot::Receiver<Result<Body>>,
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.reply.close();
        if self.shared.table.lock().remove_abandoned_async(self.id) {
            debug!(id = self.id, "Async caller stopped waiting");
        }
    }
}

/// Values of a source call, in arrival order.
///
/// A stream cut off without a terminal frame ends with
/// [`Error::ConnectionClosed`].
pub struct SourceStream {
    id: i32,
    inner: ReceiverStream<StreamEvent>,
    finished: bool,
    shared: Arc<Shared>,
}

impl SourceStream {
    /// The call id.
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }
}

impl Stream for SourceStream {
    type Item = Result<Body>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        let item = match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
            Some(StreamEvent::Item(item)) => return Poll::Ready(Some(item)),
            Some(StreamEvent::End(None)) => None,
            Some(StreamEvent::End(Some(err))) => Some(Err(err)),
            None => Some(Err(Error::ConnectionClosed)),
        };
        self.finished = true;
        Poll::Ready(item)
    }
}

impl Drop for SourceStream {
    fn drop(&mut self) {
        self.inner.close();
        if self.shared.table.lock().remove_abandoned_source(self.id) {
            debug!(id = self.id, "Source consumer dropped");
        }
    }
}

impl fmt::Debug for SourceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceStream")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_build_request_validation() {
        let request = build_request("Echo", CallType::Async, &("world",)).unwrap();
        assert_eq!(request.args, vec![json!("world")]);

        let empty: [u8; 0] = [];
        assert!(build_request("Echo", CallType::Async, &empty).unwrap().args.is_empty());

        assert!(matches!(
            build_request("", CallType::Async, &empty),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            build_request("Echo", CallType::Async, &json!({"not": "array"})),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_request_without_endpoint_fails() {
        let (rpc, endpoint) = MuxRpc::new(MuxRpcConfig::default());
        drop(endpoint);

        let result = rpc.request_async("Echo", ["world"]).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(rpc.outstanding_calls(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_calls() {
        let (rpc, _endpoint) = MuxRpc::new(MuxRpcConfig::default());
        rpc.shutdown();
        rpc.shutdown();

        assert!(rpc.is_closed());
        assert!(matches!(
            rpc.request_source("Count", [3]),
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_async_call_is_forgotten() {
        let (rpc, _endpoint) = MuxRpc::new(MuxRpcConfig::default());

        let call = rpc.request_async("Echo", ["world"]);
        let result = tokio::time::timeout(Duration::from_millis(5), call).await;
        assert!(result.is_err());
        assert_eq!(rpc.outstanding_calls(), 0);
    }

    #[tokio::test]
    async fn test_source_stream_cut_off_ends_with_error() {
        let (rpc, _endpoint) = MuxRpc::new(MuxRpcConfig::default());
        let mut stream = rpc.request_source("Count", [3]).unwrap();

        // The connection going away drops the feed without an end event.
        rpc.shared.table.lock().close();

        assert!(matches!(stream.next().await, Some(Err(Error::ConnectionClosed))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_source_stream_forgets_call() {
        let (rpc, _endpoint) = MuxRpc::new(MuxRpcConfig::default());
        let stream = rpc.request_source("Count", [3]).unwrap();
        assert_eq!(rpc.outstanding_calls(), 1);

        drop(stream);
        assert_eq!(rpc.outstanding_calls(), 0);
    }
}

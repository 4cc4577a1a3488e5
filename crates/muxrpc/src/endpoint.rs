//! Drives a connection over a byte transport.

use crate::config::MuxRpcConfig;
use crate::error::{Error, Result};
use crate::mux::FanIn;
use crate::protocol::FrameCodec;
use crate::router::Dispatcher;
use crate::rpc::{MuxRpc, Shared};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info};

/// The I/O half of a connection, paired with a [`MuxRpc`] handle.
///
/// Running it reads frames and routes them, and writes everything the
/// handle, responders and sources produce. It stops when the peer closes
/// the transport, on a fatal framing or I/O error, or on
/// [`MuxRpc::shutdown`]. Outstanding calls then fail with
/// [`Error::ConnectionClosed`].
///
/// When the peer closes its write side, frames already queued for it are
/// still written before the endpoint stops.
pub struct Endpoint {
    fan_in: FanIn,
    dispatcher: Dispatcher,
    shared: Arc<Shared>,
}

impl Endpoint {
    pub(crate) fn new(fan_in: FanIn, shared: Arc<Shared>) -> Self {
        Self {
            fan_in,
            dispatcher: Dispatcher::new(Arc::clone(&shared)),
            shared,
        }
    }

    /// Run over a bidirectional transport until the connection ends.
    ///
    /// # Errors
    ///
    /// Returns the framing or I/O error that ended the connection. A clean
    /// close or a shutdown returns `Ok`.
    pub async fn run<T>(self, io: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite,
    {
        let (reader, writer) = tokio::io::split(io);
        self.run_split(reader, writer).await
    }

    /// Run over separate read and write halves.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn run_split<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Self {
            mut fan_in,
            dispatcher,
            shared,
        } = self;

        let codec = FrameCodec::new().with_max_frame_size(shared.config.max_frame_size);
        let mut frames = FramedRead::new(reader, codec);
        let mut sink = FramedWrite::new(writer, codec);

        let (idle_tx, idle_rx) = oneshot::channel();
        fan_in.finish_when_idle(idle_rx);

        let read = async {
            while let Some(frame) = frames.next().await {
                dispatcher.dispatch(frame?).await;
            }
            debug!("Transport closed by peer");
            Ok::<(), Error>(())
        };

        let write = async {
            let mut outbound = (&mut fan_in).map(Ok::<_, Error>);
            sink.send_all(&mut outbound).await
        };
        tokio::pin!(write);

        let result = tokio::select! {
            result = read => match result {
                Ok(()) => {
                    let _ = idle_tx.send(());
                    tokio::select! {
                        result = &mut write => {
                            if let Err(err) = result {
                                debug!(error = %err, "Could not flush after peer closed");
                            }
                        }
                        () = shared.shutdown.cancelled() => {}
                    }
                    Ok(())
                }
                Err(err) => Err(err),
            },
            result = &mut write => result,
            () = shared.shutdown.cancelled() => {
                debug!("Endpoint shut down");
                Ok(())
            }
        };

        if let Err(err) = &result {
            error!(error = %err, "Connection failed");
        }
        dispatcher.close();
        result
    }

    /// Run on a new task.
    pub fn spawn<T>(self, io: T) -> JoinHandle<Result<()>>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        tokio::spawn(self.run(io))
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("fan_in", &self.fan_in)
            .finish_non_exhaustive()
    }
}

/// Connect to a TCP peer and start the endpoint on a new task.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect_tcp(
    addr: impl ToSocketAddrs,
    config: MuxRpcConfig,
) -> Result<(MuxRpc, JoinHandle<Result<()>>)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    info!(peer = %stream.peer_addr()?, "Connected");

    let (rpc, endpoint) = MuxRpc::new(config);
    Ok((rpc, endpoint.spawn(stream)))
}

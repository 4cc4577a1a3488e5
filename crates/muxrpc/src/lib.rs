//! Bidirectional muxrpc over any byte transport.
//!
//! Both peers of a connection can make calls and serve calls at the same
//! time. Frames of every call share one transport and are told apart by a
//! signed correlation id in a 9-byte header.
//!
//! # Features
//!
//! - **Async calls**: one request, one reply
//! - **Source calls**: one request, a stream of values, one terminal frame
//! - **Three body encodings**: binary, utf8 and json
//! - **Backpressure**: a slow consumer stalls the remote producer through
//!   the transport
//!
//! # Example
//!
//! ```no_run
//! use proven_muxrpc::{Body, CallHandler, CallRequest, MuxRpc, MuxRpcConfig, Responder};
//!
//! struct Greeter;
//!
//! impl CallHandler for Greeter {
//!     fn handle_async(&self, request: CallRequest, responder: Responder) {
//!         let name = request.args.first().and_then(|v| v.as_str()).unwrap_or("you");
//!         responder.reply(Ok(Body::from(format!("hi {name}!"))));
//!     }
//! }
//!
//! async fn example(stream: tokio::net::TcpStream) -> Result<(), proven_muxrpc::Error> {
//!     let (rpc, endpoint) = MuxRpc::new(MuxRpcConfig::default());
//!     rpc.on_request(Greeter);
//!     let running = endpoint.spawn(stream);
//!
//!     let reply = rpc.request_async("Echo", ["world"]).await?;
//!     println!("{reply:?}");
//!
//!     rpc.shutdown();
//!     running.await.ok();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod correlation;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod mux;
pub mod protocol;
pub mod router;
pub mod rpc;

// Re-export commonly used types
pub use config::{MuxRpcConfig, MuxRpcConfigBuilder};
pub use endpoint::{Endpoint, connect_tcp};
pub use error::{CodecError, Error, FramingError, ProtocolError, RemoteError, Result};
pub use handler::{CallHandler, Responder, Source};
pub use protocol::{Body, CallRequest, CallType, Encoding, Frame, FrameCodec, Header};
pub use rpc::{MuxRpc, SourceStream};

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;

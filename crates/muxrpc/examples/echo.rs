//! Echo and Count over a loopback TCP connection.
//!
//! Run with: `cargo run -p proven-muxrpc --example echo`

use anyhow::Result;
use futures::StreamExt;
use proven_muxrpc::{
    Body, CallHandler, CallRequest, Encoding, MuxRpc, MuxRpcConfig, RemoteError, Responder,
    Source, connect_tcp,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::info;

struct EchoService;

impl CallHandler for EchoService {
    fn handle_async(&self, request: CallRequest, responder: Responder) {
        match request.name.as_str() {
            "Echo" => {
                let who = request
                    .args
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or("nobody");
                responder.reply(Ok(Body::from(format!("hi {who}!"))));
            }
            other => responder.reply(Err(RemoteError::new(format!("unknown method {other}")))),
        }
    }

    fn handle_source(&self, request: CallRequest) -> Result<Source, RemoteError> {
        match request.name.as_str() {
            "Count" => {
                let n = request.args.first().and_then(Value::as_i64).unwrap_or(3);
                Ok(Source::iter(Encoding::Json, (1..=n).map(Value::from)))
            }
            other => Err(RemoteError::new(format!("unknown source {other}"))),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    info!(%addr, "Listening");

    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            info!(%peer, "Accepted connection");
            let (rpc, endpoint) = MuxRpc::new(MuxRpcConfig::default());
            rpc.on_request(EchoService);
            endpoint.spawn(stream);
        }
    });

    let (client, running) = connect_tcp(addr, MuxRpcConfig::default()).await?;

    let reply = client.request_async("Echo", ["world"]).await?;
    info!(?reply, "Echo replied");

    let mut counts = client.request_source("Count", [5])?;
    while let Some(value) = counts.next().await {
        let value = value?;
        info!(?value, "Count");
    }

    client.shutdown();
    running.await??;
    Ok(())
}

//! Scripted in-process RESP server for the integration suites.
//!
//! Each test binds a listener, spawns its own handling task with the
//! exact frames it expects, and points the client at the listener's
//! address. Request frames are themselves RESP arrays, so the crate's
//! decoder reads them on the server side too.

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use zero_redis::protocol::{FrameReader, codec};

pub async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock listener");
    let addr = listener.local_addr().expect("local addr");
    (listener, format!("redis://{addr}"))
}

pub async fn accept(listener: &TcpListener) -> FrameReader<TcpStream> {
    let (stream, _) = listener.accept().await.expect("accept");
    FrameReader::new(stream)
}

/// Read one request frame as a flat list of argument strings.
/// `None` once the client hangs up.
pub async fn read_command(peer: &mut FrameReader<TcpStream>) -> Option<Vec<String>> {
    let reply = codec::read_reply(peer).await.ok()?;
    let items = reply.into_array().expect("request frame is an array");
    Some(
        items
            .into_iter()
            .map(|item| item.into_text().expect("request argument is text"))
            .collect(),
    )
}

/// Write raw reply bytes back to the client.
pub async fn send(peer: &mut FrameReader<TcpStream>, raw: &[u8]) {
    peer.get_mut().write_all(raw).await.expect("mock write");
}

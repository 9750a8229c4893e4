use std::{io, time::Duration};

use comms::{OnoReceiver, OnoSender};
use log::debug;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time,
};

pub(crate) type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;
pub(crate) type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// Both ends of a framed connection to a peer.
pub(crate) type Link = (OnoReceiver<BoxedRead>, OnoSender<BoxedWrite>);

/// Wraps a reader and a writer in a type erased `Link`.
pub(crate) fn link<R, W>(rx: R, tx: W) -> Link
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    comms::channel(Box::new(rx) as BoxedRead, Box::new(tx) as BoxedWrite)
}

/// Opens a `Link` over TCP.
pub(crate) fn tcp_link(stream: TcpStream) -> Link {
    let (rx, tx) = stream.into_split();
    link(rx, tx)
}

/// Connects to `addr`, retrying while the peer isn't listening yet.
///
/// # Arguments
/// * `addr` - The peer's endpoint.
/// * `retries` - How many failed attempts to tolerate.
/// * `interval` - The wait between attempts.
///
/// # Returns
/// The connected stream or the last connection error.
pub(crate) async fn connect_with_retry(
    addr: &str,
    retries: usize,
    interval: Duration,
) -> io::Result<TcpStream> {
    let mut attempt = 0;

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < retries => {
                attempt += 1;
                debug!(attempt = attempt; "connection to {addr} failed, retrying: {e}");
                time::sleep(interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}

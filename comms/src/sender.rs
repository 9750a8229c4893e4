//! The sending end of the framed protocol.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, Serialize};

/// Writes length prefixed frames into a writer.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends `msg` as a single frame.
    ///
    /// The borrowed part of the message, if any, is written right after the owned one
    /// without being copied into the frame buffer.
    ///
    /// # Errors
    /// `io::ErrorKind::InvalidInput` if the frame doesn't fit in the length prefix, or
    /// whatever encoding the message or the writer fail with.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);

        let borrowed = msg.serialize(buf)?;
        let len = buf.len() - LEN_TYPE_SIZE + borrowed.map_or(0, <[_]>::len);
        let header = LenType::try_from(len).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("a frame of {len} bytes doesn't fit the length prefix"),
            )
        })?;

        buf[..LEN_TYPE_SIZE].copy_from_slice(&header.to_be_bytes());
        tx.write_all(buf).await?;

        if let Some(data) = borrowed {
            tx.write_all(data).await?;
        }

        tx.flush().await
    }
}

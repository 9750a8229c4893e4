//! The receiving end of the framed protocol.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, Deserialize, LEN_TYPE_SIZE, LenType};

/// The largest frame accepted by default, 1 GiB.
pub const DEFAULT_MAX_FRAME: usize = 1 << 30;

/// Reads length prefixed frames out of a reader.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Rejects frames longer than `max_frame` bytes instead of allocating them.
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Waits for the next frame and deserializes it.
    ///
    /// # Arguments
    /// * `buf` - The buffer the frame is read into, the returned `T` borrows from it.
    ///   Its element type only decides the alignment of the frame.
    ///
    /// # Errors
    /// `io::ErrorKind::InvalidData` if the frame is longer than the receiver accepts,
    /// or whatever reading and deserializing fail with.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let mut header = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut header).await?;
        let len = LenType::from_be_bytes(header) as usize;

        if len > self.max_frame {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds the limit of {}", self.max_frame),
            ));
        }

        buf.clear();
        buf.resize(len.div_ceil(size_of::<B>()), B::zeroed());

        let view: &mut [u8] = bytemuck::cast_slice_mut(buf.as_mut_slice());
        let frame = &mut view[..len];
        self.rx.read_exact(frame).await?;

        T::deserialize(frame)
    }
}

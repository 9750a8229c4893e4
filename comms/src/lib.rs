mod align;
mod deserialize;
pub mod msg;
mod receiver;
mod sender;
mod serialize;

use tokio::io::{AsyncRead, AsyncWrite};

pub use align::{Align1, Align4};
pub use deserialize::Deserialize;
pub use receiver::{DEFAULT_MAX_FRAME, OnoReceiver};
pub use sender::OnoSender;
pub use serialize::Serialize;

/// Every frame starts with its length as a big endian `LenType`.
type LenType = u32;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Wraps a reader and a writer into both ends of a framed connection.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}

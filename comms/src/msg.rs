use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const GRADIENT: Header = 2;
const PARAMS: Header = 3;
const PARTIAL: Header = 4;
const REDUCED: Header = 5;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A worker's gradient pushed to a parameter server.
    Gradient(&'a [f32]),
    /// A parameter server's current parameters.
    Params(&'a mut [f32]),
    /// A collective participant's contribution to an all-reduce.
    Partial(&'a [f32]),
    /// The result of an all-reduce, broadcasted by the root.
    Reduced(&'a mut [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// A worker announces itself to a collective root or a parameter server.
    Join { worker_index: usize },
    /// Barrier arrival (leaf to root) or release (root to leaf).
    Barrier,
    /// A worker requests the current parameters without pushing a gradient.
    Pull,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }

    /// Returns a stable name for the message kind, used when reporting protocol violations.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Join { .. }) => "join",
            Msg::Control(Command::Barrier) => "barrier",
            Msg::Control(Command::Pull) => "pull",
            Msg::Control(Command::Disconnect) => "disconnect",
            Msg::Data(Payload::Gradient(_)) => "gradient",
            Msg::Data(Payload::Params(_)) => "params",
            Msg::Data(Payload::Partial(_)) => "partial",
            Msg::Data(Payload::Reduced(_)) => "reduced",
            Msg::Err(_) => "err",
        }
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        let borrowed = match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());
                serde_json::to_writer(buf, cmd).map_err(io::Error::other)?;
                None
            }
            Msg::Data(payload) => {
                let (kind, nums): (Header, &[f32]) = match payload {
                    Payload::Gradient(grad) => (GRADIENT, *grad),
                    Payload::Params(params) => (PARAMS, &params[..]),
                    Payload::Partial(partial) => (PARTIAL, *partial),
                    Payload::Reduced(reduced) => (REDUCED, &reduced[..]),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        };

        Ok(borrowed)
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);
        let mut header = [0; HEADER_SIZE];
        header.copy_from_slice(kind_buf);
        let kind = Header::from_be_bytes(header);

        match kind {
            ERR => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            GRADIENT..=REDUCED => {
                let nums: &mut [f32] = bytemuck::try_cast_slice_mut(rest).map_err(|err| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("{err:?}"))
                })?;

                let payload = match kind {
                    GRADIENT => Payload::Gradient(nums),
                    PARAMS => Payload::Params(nums),
                    PARTIAL => Payload::Partial(nums),
                    _ => Payload::Reduced(nums),
                };

                Ok(Self::Data(payload))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(msg: &Msg) -> Vec<u8> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).unwrap().map(<[u8]>::to_vec);
        buf.extend(tail.unwrap_or_default());
        buf
    }

    #[test]
    fn control_messages_have_no_borrowed_tail() {
        let mut buf = Vec::new();
        let tail = Msg::Control(Command::Barrier).serialize(&mut buf).unwrap();

        assert!(tail.is_none());
        assert_eq!(&buf[HEADER_SIZE..], br#""barrier""#);
    }

    #[test]
    fn control_message() {
        let mut buf = frame(&Msg::Control(Command::Join { worker_index: 3 }));
        let msg = Msg::deserialize(&mut buf).unwrap();

        assert!(matches!(
            msg,
            Msg::Control(Command::Join { worker_index: 3 })
        ));
    }

    #[test]
    fn partial_payload() {
        let partial = [1.0, 2.0, 3.0];
        let bytes = frame(&Msg::Data(Payload::Partial(&partial)));

        let mut aligned = vec![0f32; bytes.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<f32, u8>(&mut aligned)[..bytes.len()].copy_from_slice(&bytes);
        let view = &mut bytemuck::cast_slice_mut::<f32, u8>(&mut aligned)[..bytes.len()];

        let Msg::Data(Payload::Partial(nums)) = Msg::deserialize(view).unwrap() else {
            panic!("expected a partial payload");
        };
        assert_eq!(nums, partial);
    }

    #[test]
    fn invalid_kind() {
        let mut buf = 42u32.to_be_bytes().to_vec();
        assert!(Msg::deserialize(&mut buf).is_err());
    }

    #[test]
    fn too_small() {
        let mut buf = vec![0u8; 2];
        assert!(Msg::deserialize(&mut buf).is_err());
    }
}

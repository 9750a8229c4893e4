//! Collective operations among the workers of a job over a star topology.
//!
//! Worker `0` is the root: every other worker holds a single link to it.

use comms::msg::{Command, Msg, Payload};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    DistributedErr, Result,
    transport::{self, Link},
};

/// The reduction applied element wise by `all_reduce`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    #[default]
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    /// Reduces `other` into `acc`.
    fn reduce(self, acc: &mut [f32], other: &[f32]) {
        let f: fn(f32, f32) -> f32 = match self {
            ReduceOp::Sum => |a, b| a + b,
            ReduceOp::Max => f32::max,
            ReduceOp::Min => f32::min,
        };

        acc.iter_mut().zip(other).for_each(|(a, &b)| *a = f(*a, b));
    }
}

enum Topology {
    Solo,
    /// The links to workers `1..size`, ordered by worker index.
    Root(Vec<Link>),
    Leaf(Link),
}

/// Star shaped collective among the workers of a job.
pub struct StarCollective {
    index: usize,
    size: usize,
    topology: Topology,
    buf: Vec<f32>,
}

impl StarCollective {
    /// A collective with a single participant, every operation is local.
    pub fn solo() -> Self {
        Self {
            index: 0,
            size: 1,
            topology: Topology::Solo,
            buf: Vec::new(),
        }
    }

    /// Creates the root's end of the collective.
    ///
    /// Every peer must announce itself with a `Join` message before the collective is usable.
    ///
    /// # Arguments
    /// * `size` - The amount of participants, including the root.
    /// * `peers` - The raw connections to the other `size - 1` participants, in any order.
    ///
    /// # Errors
    /// `DistributedErr::Protocol` if a peer doesn't join properly or two peers claim the same index.
    pub async fn accept<R, W>(size: usize, peers: Vec<(R, W)>) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if peers.len() + 1 != size {
            return Err(DistributedErr::LengthMismatch {
                got: peers.len() + 1,
                expected: size,
            });
        }

        let mut slots: Vec<Option<Link>> = (1..size).map(|_| None).collect();
        let mut buf: Vec<u32> = Vec::new();

        for (rx, tx) in peers {
            let (mut rx, tx) = transport::link(rx, tx);

            let msg: Msg = rx.recv_into(&mut buf).await?;
            let Msg::Control(Command::Join { worker_index }) = msg else {
                return Err(DistributedErr::unexpected("join", &msg));
            };

            let slot = worker_index
                .checked_sub(1)
                .and_then(|i| slots.get_mut(i))
                .filter(|slot| slot.is_none())
                .ok_or_else(|| {
                    DistributedErr::Protocol(format!(
                        "worker {worker_index} can't join a collective of size {size}"
                    ))
                })?;

            debug!(worker_index = worker_index; "peer joined the collective");
            *slot = Some((rx, tx));
        }

        Ok(Self {
            index: 0,
            size,
            topology: Topology::Root(slots.into_iter().flatten().collect()),
            buf: Vec::new(),
        })
    }

    /// Joins the collective rooted at the other end of `rx`/`tx`.
    ///
    /// # Arguments
    /// * `index` - This participant's index, must be in `1..size`.
    /// * `size` - The amount of participants, including the root.
    /// * `rx` - The reading end of the connection to the root.
    /// * `tx` - The writing end of the connection to the root.
    pub async fn join<R, W>(index: usize, size: usize, rx: R, tx: W) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if index == 0 || index >= size {
            return Err(DistributedErr::Protocol(format!(
                "worker {index} can't join a collective of size {size}"
            )));
        }

        let (rx, mut tx) = transport::link(rx, tx);
        let msg = Msg::Control(Command::Join {
            worker_index: index,
        });
        tx.send(&msg).await?;

        Ok(Self {
            index,
            size,
            topology: Topology::Leaf((rx, tx)),
            buf: Vec::new(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Reduces `input` across all participants and writes the result into `output`.
    ///
    /// The root reduces the contributions in worker index order so every participant
    /// ends with bitwise identical results.
    ///
    /// # Errors
    /// `DistributedErr::LengthMismatch` if `input` and `output` differ in length or a peer
    /// contributes a buffer of a different length. Transport failures are returned as is.
    pub async fn all_reduce(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        op: ReduceOp,
    ) -> Result<()> {
        check_len(input.len(), output.len())?;

        match &mut self.topology {
            Topology::Solo => output.copy_from_slice(input),
            Topology::Root(peers) => {
                output.copy_from_slice(input);

                for (rx, _) in peers.iter_mut() {
                    let msg: Msg = rx.recv_into(&mut self.buf).await?;
                    let Msg::Data(Payload::Partial(partial)) = msg else {
                        return Err(DistributedErr::unexpected("partial", &msg));
                    };

                    check_len(partial.len(), output.len())?;
                    op.reduce(output, partial);
                }

                for (_, tx) in peers.iter_mut() {
                    let msg = Msg::Data(Payload::Reduced(&mut *output));
                    tx.send(&msg).await?;
                }
            }
            Topology::Leaf((rx, tx)) => {
                tx.send(&Msg::Data(Payload::Partial(input))).await?;

                let msg: Msg = rx.recv_into(&mut self.buf).await?;
                let Msg::Data(Payload::Reduced(reduced)) = msg else {
                    return Err(DistributedErr::unexpected("reduced", &msg));
                };

                check_len(reduced.len(), output.len())?;
                output.copy_from_slice(reduced);
            }
        }

        Ok(())
    }

    /// Blocks until every participant reached the barrier.
    pub async fn barrier(&mut self) -> Result<()> {
        match &mut self.topology {
            Topology::Solo => {}
            Topology::Root(peers) => {
                for (rx, _) in peers.iter_mut() {
                    let msg: Msg = rx.recv_into(&mut self.buf).await?;
                    if !matches!(msg, Msg::Control(Command::Barrier)) {
                        return Err(DistributedErr::unexpected("barrier", &msg));
                    }
                }

                for (_, tx) in peers.iter_mut() {
                    tx.send(&Msg::Control(Command::Barrier)).await?;
                }
            }
            Topology::Leaf((rx, tx)) => {
                tx.send(&Msg::Control(Command::Barrier)).await?;

                let msg: Msg = rx.recv_into(&mut self.buf).await?;
                if !matches!(msg, Msg::Control(Command::Barrier)) {
                    return Err(DistributedErr::unexpected("barrier", &msg));
                }
            }
        }

        Ok(())
    }
}

fn check_len(got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(DistributedErr::LengthMismatch { got, expected });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_ops() {
        let mut acc = [1., 5., -2.];

        ReduceOp::Sum.reduce(&mut acc, &[1., 1., 1.]);
        assert_eq!(acc, [2., 6., -1.]);

        ReduceOp::Max.reduce(&mut acc, &[3., 0., -4.]);
        assert_eq!(acc, [3., 6., -1.]);

        ReduceOp::Min.reduce(&mut acc, &[0., 7., -1.5]);
        assert_eq!(acc, [0., 6., -1.5]);
    }

    #[tokio::test]
    async fn solo_is_a_local_copy() {
        let mut collective = StarCollective::solo();
        let mut out = [0.; 3];

        collective
            .all_reduce(&[1., 2., 3.], &mut out, ReduceOp::Sum)
            .await
            .unwrap();
        assert_eq!(out, [1., 2., 3.]);
        collective.barrier().await.unwrap();

        let err = collective.all_reduce(&[1.], &mut out, ReduceOp::Sum).await;
        assert!(matches!(
            err,
            Err(DistributedErr::LengthMismatch { got: 1, expected: 3 })
        ));
    }
}

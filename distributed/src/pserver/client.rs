use std::{ops::Range, time::Duration};

use comms::msg::{Command, Msg, Payload};
use log::debug;

use crate::{
    DistributedErr, Result,
    algorithm::partition_range,
    transport::{self, Link},
};

/// A worker's connections to every parameter server of the job.
///
/// The flat parameter vector is split in contiguous ranges, server `i` owns range `i`.
pub(crate) struct PsClient {
    links: Vec<(Link, Range<usize>)>,
    len: usize,
    buf: Vec<f32>,
}

impl PsClient {
    /// Connects to every server over TCP.
    ///
    /// # Arguments
    /// * `endpoints` - The servers' endpoints, in server index order.
    /// * `worker_index` - The index of this worker.
    /// * `len` - The total amount of parameters.
    /// * `retries` - How many failed connection attempts to tolerate per server.
    /// * `interval` - The wait between connection attempts.
    pub(crate) async fn connect(
        endpoints: &[String],
        worker_index: usize,
        len: usize,
        retries: usize,
        interval: Duration,
    ) -> Result<Self> {
        let mut links = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let stream = transport::connect_with_retry(endpoint, retries, interval).await?;
            debug!(worker_index = worker_index; "connected to server {endpoint}");
            links.push(transport::tcp_link(stream));
        }

        Self::join(links, worker_index, len).await
    }

    /// Announces this worker to every server.
    ///
    /// # Arguments
    /// * `links` - The connections to the servers, in server index order.
    /// * `worker_index` - The index of this worker.
    /// * `len` - The total amount of parameters.
    pub(crate) async fn join(links: Vec<Link>, worker_index: usize, len: usize) -> Result<Self> {
        let servers = links.len();
        let mut ranged = Vec::with_capacity(servers);

        for (i, (rx, mut tx)) in links.into_iter().enumerate() {
            tx.send(&Msg::Control(Command::Join { worker_index }))
                .await?;
            ranged.push(((rx, tx), partition_range(len, i, servers)));
        }

        Ok(Self {
            links: ranged,
            len,
            buf: Vec::new(),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.len {
            return Err(DistributedErr::LengthMismatch {
                got: len,
                expected: self.len,
            });
        }

        Ok(())
    }

    /// Pushes `grad` to the servers and writes the parameters they answer with into `params`.
    pub(crate) async fn push_pull(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        self.check_len(grad.len())?;
        self.check_len(params.len())?;

        for ((_, tx), range) in self.links.iter_mut() {
            let msg = Msg::Data(Payload::Gradient(&grad[range.clone()]));
            tx.send(&msg).await?;
        }

        self.recv_params(params).await
    }

    /// Writes the servers' current parameters into `params`.
    pub(crate) async fn pull(&mut self, params: &mut [f32]) -> Result<()> {
        self.check_len(params.len())?;

        for ((_, tx), _) in self.links.iter_mut() {
            tx.send(&Msg::Control(Command::Pull)).await?;
        }

        self.recv_params(params).await
    }

    async fn recv_params(&mut self, params: &mut [f32]) -> Result<()> {
        for ((rx, _), range) in self.links.iter_mut() {
            let msg: Msg = rx.recv_into(&mut self.buf).await?;
            let Msg::Data(Payload::Params(received)) = msg else {
                return Err(DistributedErr::unexpected("params", &msg));
            };

            if received.len() != range.len() {
                return Err(DistributedErr::LengthMismatch {
                    got: received.len(),
                    expected: range.len(),
                });
            }

            params[range.clone()].copy_from_slice(received);
        }

        Ok(())
    }

    /// Tells every server this worker is done.
    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        for ((_, tx), _) in self.links.iter_mut() {
            tx.send(&Msg::Control(Command::Disconnect)).await?;
        }

        Ok(())
    }
}

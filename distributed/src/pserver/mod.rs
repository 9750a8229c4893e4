mod client;
mod handle;
mod server;
mod shard;
mod store;
mod synchronizer;

pub(crate) use client::PsClient;
pub use handle::ParameterHandle;
pub use server::{ParameterServer, Server, ServerBuilder};
pub(super) use shard::ParameterShard;
pub use store::ParameterStore;
pub use synchronizer::{BarrierSync, NoBlockingSync, Synchronizer};

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use machine_learning::optimization::OptimizerSpec;
    use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};

    use super::*;
    use crate::{
        config::{DistributedStrategy, SyncMode},
        transport,
    };

    type Half = (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>);

    fn pair() -> (Half, transport::Link) {
        let (server_side, worker_side) = io::duplex(4096);
        let (wrx, wtx) = io::split(worker_side);
        (io::split(server_side), transport::link(wrx, wtx))
    }

    fn strategy(sync_mode: SyncMode) -> DistributedStrategy {
        DistributedStrategy {
            sync_mode,
            average_gradients: true,
            shard_size: NonZeroUsize::new(2).unwrap(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_servers_serve_their_ranges() {
        let rule = OptimizerSpec::GradientDescent { learning_rate: 1. };
        let strategy = strategy(SyncMode::Sync);
        let builder = ServerBuilder::new();

        // 5 parameters split 3 + 2 among two servers.
        let mut first = builder.build(rule, &strategy, 1, &[0., 0., 0.]);
        let mut second = builder.build(rule, &strategy, 1, &[1., 1.]);

        let ((rx0, tx0), link0) = pair();
        let ((rx1, tx1), link1) = pair();
        let (rx0, tx0) = comms::channel(rx0, tx0);
        let (rx1, tx1) = comms::channel(rx1, tx1);
        first.spawn(rx0, tx0);
        second.spawn(rx1, tx1);

        let mut client = PsClient::join(vec![link0, link1], 0, 5).await.unwrap();
        assert_eq!(client.len(), 5);

        let mut params = [0.; 5];
        client.pull(&mut params).await.unwrap();
        assert_eq!(params, [0., 0., 0., 1., 1.]);

        client
            .push_pull(&[1., 2., 3., 4., 5.], &mut params)
            .await
            .unwrap();
        assert_eq!(params, [-1., -2., -3., -3., -4.]);

        client.disconnect().await.unwrap();
        assert_eq!(first.run().await.unwrap(), [-1., -2., -3.]);
        assert_eq!(second.run().await.unwrap(), [-3., -4.]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sync_servers_average_the_workers_gradients() {
        let rule = OptimizerSpec::GradientDescent { learning_rate: 1. };
        let mut server = ServerBuilder::new().build(rule, &strategy(SyncMode::Sync), 2, &[0.; 2]);

        let ((rx0, tx0), link0) = pair();
        let ((rx1, tx1), link1) = pair();
        let (rx0, tx0) = comms::channel(rx0, tx0);
        let (rx1, tx1) = comms::channel(rx1, tx1);
        server.spawn(rx0, tx0);
        server.spawn(rx1, tx1);

        let mut a = PsClient::join(vec![link0], 0, 2).await.unwrap();
        let mut b = PsClient::join(vec![link1], 1, 2).await.unwrap();

        let (pa, pb) = tokio::join!(
            async {
                let mut params = [0.; 2];
                a.push_pull(&[2., 4.], &mut params).await.map(|_| params)
            },
            async {
                let mut params = [0.; 2];
                b.push_pull(&[4., 0.], &mut params).await.map(|_| params)
            }
        );

        assert_eq!(pa.unwrap(), [-3., -2.]);
        assert_eq!(pb.unwrap(), [-3., -2.]);

        a.disconnect().await.unwrap();
        b.disconnect().await.unwrap();
        assert_eq!(server.run().await.unwrap(), [-3., -2.]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn client_rejects_wrong_lengths() {
        let rule = OptimizerSpec::GradientDescent { learning_rate: 1. };
        let mut server = ServerBuilder::new().build(rule, &strategy(SyncMode::Async), 1, &[0.; 3]);

        let ((rx, tx), link) = pair();
        let (rx, tx) = comms::channel(rx, tx);
        server.spawn(rx, tx);

        let mut client = PsClient::join(vec![link], 0, 3).await.unwrap();
        let err = client.push_pull(&[1.; 2], &mut [0.; 3]).await;
        assert!(matches!(
            err,
            Err(crate::DistributedErr::LengthMismatch { got: 2, expected: 3 })
        ));

        client.disconnect().await.unwrap();
        server.run().await.unwrap();
    }
}

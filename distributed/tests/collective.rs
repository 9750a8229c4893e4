mod common;

use std::time::Duration;

use distributed::{
    CollectiveRoleMaker, DistributedErr, JobConfig, ReduceOp, RoleKind, RoleMaker, StarCollective,
};
use tokio::{io, net::TcpListener, task::JoinSet};

#[tokio::test]
async fn all_reduce_sums_on_every_participant() {
    let collectives = common::collectives(3).await;
    let mut tasks = JoinSet::new();

    for mut collective in collectives {
        tasks.spawn(async move {
            let index = collective.index() as f32;
            let input = [index, 1., -index];
            let mut output = [0.; 3];

            collective
                .all_reduce(&input, &mut output, ReduceOp::Sum)
                .await
                .map(|_| output)
        });
    }

    while let Some(res) = tasks.join_next().await {
        assert_eq!(res.unwrap().unwrap(), [3., 3., -3.]);
    }
}

#[tokio::test]
async fn all_reduce_max_and_min() {
    let collectives = common::collectives(2).await;
    let mut tasks = JoinSet::new();

    for mut collective in collectives {
        tasks.spawn(async move {
            let input = [collective.index() as f32, 5.];
            let mut max = [0.; 2];
            let mut min = [0.; 2];

            collective.all_reduce(&input, &mut max, ReduceOp::Max).await?;
            collective.all_reduce(&input, &mut min, ReduceOp::Min).await?;
            Ok::<_, DistributedErr>((max, min))
        });
    }

    while let Some(res) = tasks.join_next().await {
        let (max, min) = res.unwrap().unwrap();
        assert_eq!(max, [1., 5.]);
        assert_eq!(min, [0., 5.]);
    }
}

#[tokio::test]
async fn barrier_releases_everyone() {
    let collectives = common::collectives(3).await;
    let mut tasks = JoinSet::new();

    for mut collective in collectives {
        tasks.spawn(async move {
            collective.barrier().await?;
            collective.barrier().await
        });
    }

    let released = tokio::time::timeout(Duration::from_secs(5), async {
        let mut released = 0;
        while let Some(res) = tasks.join_next().await {
            res.unwrap().unwrap();
            released += 1;
        }
        released
    })
    .await
    .unwrap();

    assert_eq!(released, 3);
}

#[tokio::test]
async fn duplicated_join_is_a_protocol_error() {
    let (root_a, leaf_a) = io::duplex(1024);
    let (root_b, leaf_b) = io::duplex(1024);

    let (rx, tx) = io::split(leaf_a);
    let _a = StarCollective::join(1, 3, rx, tx).await.unwrap();
    let (rx, tx) = io::split(leaf_b);
    let _b = StarCollective::join(1, 3, rx, tx).await.unwrap();

    let peers = vec![io::split(root_a), io::split(root_b)];
    let err = StarCollective::accept(3, peers).await;
    assert!(matches!(err, Err(DistributedErr::Protocol(_))));
}

#[tokio::test]
async fn role_makers_connect_over_tcp() {
    // Grab a free port for the collective root.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let endpoints = vec![
        format!("127.0.0.1:{port}"),
        "127.0.0.1:0".to_string(),
    ];

    let mut tasks = JoinSet::new();
    for index in 0..2 {
        let config = JobConfig {
            role: RoleKind::Worker,
            index,
            worker_num: 2,
            worker_endpoints: endpoints.clone(),
            server_endpoints: Vec::new(),
            current_endpoint: endpoints[index].clone(),
            connect_retries: 50,
            retry_interval_ms: 20,
        };

        tasks.spawn(async move {
            let mut role_maker = CollectiveRoleMaker::new(config);
            role_maker.generate_role().await?;

            let mut out = [0.; 2];
            role_maker
                .all_reduce_worker(&[1., index as f32], &mut out, ReduceOp::Sum)
                .await?;
            role_maker.barrier_worker().await?;

            let first = role_maker.context().is_first_worker()?;
            Ok::<_, DistributedErr>((first, out))
        });
    }

    let mut firsts = 0;
    while let Some(res) = tasks.join_next().await {
        let (first, out) = res.unwrap().unwrap();
        firsts += first as usize;
        assert_eq!(out, [2., 1.]);
    }
    assert_eq!(firsts, 1);
}

mod spec;
mod train;

use std::{env, future::Future, io};

use distributed::{CollectiveRoleMaker, Result, UserDefinedRoleMaker};
use log::{info, warn};
use tokio::signal;

use crate::{spec::NodeSpec, train::Report};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let spec = match env::args().nth(1) {
        Some(path) => NodeSpec::from_json_file(&path).map_err(io::Error::other)?,
        None => NodeSpec::default(),
    };
    let job = spec.job().map_err(io::Error::other)?;
    info!(index = job.index; "starting a {} in {} mode", job.role, spec.mode);

    let ret = if spec.mode.is_parameter_server() {
        let role_maker = UserDefinedRoleMaker::new(
            job.role,
            job.index,
            job.worker_num,
            job.server_endpoints.clone(),
            job.current_endpoint.clone(),
        );
        until_interrupted(train::run(&spec, &job, role_maker)).await
    } else {
        let role_maker = CollectiveRoleMaker::new(job.clone());
        until_interrupted(train::run(&spec, &job, role_maker)).await
    };

    match ret.map_err(io::Error::other)? {
        Some(Some(Report {
            initial_loss,
            final_loss,
        })) => info!(
            initial_loss = initial_loss,
            final_loss = final_loss;
            "training finished"
        ),
        Some(None) => info!("server finished"),
        None => warn!("interrupted before finishing"),
    }

    Ok(())
}

/// Runs `task` until it finishes or the process receives a ctrl-c.
async fn until_interrupted<F, T>(task: F) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        ret = task => ret.map(Some),
        _ = signal::ctrl_c() => {
            info!("received ctrl-c");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finished_tasks_are_not_interrupted() {
        let ret = until_interrupted(async { Ok(3) }).await.unwrap();
        assert_eq!(ret, Some(3));
    }
}

use std::{env, fs, num::NonZeroUsize, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    DistributedErr, Result,
    role::{Role, RoleKind},
};

const ROLE_VAR: &str = "TRAINING_ROLE";
const TRAINER_ID_VAR: &str = "PADDLE_TRAINER_ID";
const TRAINERS_NUM_VAR: &str = "PADDLE_TRAINERS_NUM";
const TRAINER_ENDPOINTS_VAR: &str = "PADDLE_TRAINER_ENDPOINTS";
const PSERVERS_VAR: &str = "PADDLE_PSERVERS_IP_PORT_LIST";
const CURRENT_ENDPOINT_VAR: &str = "PADDLE_CURRENT_ENDPOINT";

fn default_connect_retries() -> usize {
    30
}

fn default_retry_interval_ms() -> u64 {
    200
}

/// The static topology of a distributed job, as seen from one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub role: RoleKind,
    /// The index of this process among its peers of the same kind.
    #[serde(default)]
    pub index: usize,
    pub worker_num: usize,
    #[serde(default)]
    pub worker_endpoints: Vec<String>,
    #[serde(default)]
    pub server_endpoints: Vec<String>,
    #[serde(default)]
    pub current_endpoint: String,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: usize,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl JobConfig {
    /// Reads the job configuration from the process environment.
    ///
    /// # Errors
    /// `DistributedErr::InvalidConfig` if a variable is missing, malformed or inconsistent.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Reads the job configuration through a variable lookup.
    ///
    /// # Arguments
    /// * `get` - Returns the value of a variable, if set.
    ///
    /// # Errors
    /// `DistributedErr::InvalidConfig` if a variable is missing, malformed or inconsistent.
    pub fn from_vars<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            get(key).ok_or_else(|| DistributedErr::InvalidConfig(format!("{key} is not set")))
        };
        let parse = |key: &str| -> Result<usize> {
            require(key)?.trim().parse::<usize>().map_err(|e| {
                DistributedErr::InvalidConfig(format!("{key} is not an unsigned integer: {e}"))
            })
        };

        let role = match require(ROLE_VAR)?.trim() {
            "TRAINER" => RoleKind::Worker,
            "PSERVER" => RoleKind::Server,
            other => {
                return Err(DistributedErr::InvalidConfig(format!(
                    "{ROLE_VAR} must be TRAINER or PSERVER, got {other}"
                )));
            }
        };

        let worker_num = parse(TRAINERS_NUM_VAR)?;
        let worker_endpoints = split_list(get(TRAINER_ENDPOINTS_VAR).as_deref());
        let server_endpoints = split_list(get(PSERVERS_VAR).as_deref());
        let current_endpoint = get(CURRENT_ENDPOINT_VAR);

        let (index, current_endpoint) = match role {
            RoleKind::Worker => {
                let index = parse(TRAINER_ID_VAR)?;
                let current = current_endpoint
                    .or_else(|| worker_endpoints.get(index).cloned())
                    .unwrap_or_default();
                (index, current)
            }
            RoleKind::Server => {
                let current = require(CURRENT_ENDPOINT_VAR)?;
                let index = server_endpoints
                    .iter()
                    .position(|endpoint| *endpoint == current)
                    .ok_or_else(|| {
                        DistributedErr::InvalidConfig(format!(
                            "{current} is not listed in {PSERVERS_VAR}"
                        ))
                    })?;
                (index, current)
            }
        };

        let config = Self {
            role,
            index,
            worker_num,
            worker_endpoints,
            server_endpoints,
            current_endpoint,
            connect_retries: default_connect_retries(),
            retry_interval_ms: default_retry_interval_ms(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads the job configuration from a JSON file.
    ///
    /// # Errors
    /// `DistributedErr::Io` if the file can't be read, `DistributedErr::InvalidConfig`
    /// if it can't be parsed or is inconsistent.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| DistributedErr::InvalidConfig(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the topology is consistent.
    ///
    /// # Errors
    /// `DistributedErr::InvalidConfig` describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        let invalid =
            |detail: String| -> Result<()> { Err(DistributedErr::InvalidConfig(detail)) };

        if self.worker_num == 0 {
            return invalid("the job must have at least one worker".into());
        }

        if !self.worker_endpoints.is_empty() && self.worker_endpoints.len() != self.worker_num {
            return invalid(format!(
                "got {} worker endpoints for {} workers",
                self.worker_endpoints.len(),
                self.worker_num
            ));
        }

        match self.role {
            RoleKind::Worker if self.index >= self.worker_num => invalid(format!(
                "worker index {} out of range for {} workers",
                self.index, self.worker_num
            )),
            RoleKind::Server if self.index >= self.server_endpoints.len() => invalid(format!(
                "server index {} out of range for {} servers",
                self.index,
                self.server_endpoints.len()
            )),
            RoleKind::Server if self.server_endpoints[self.index] != self.current_endpoint => {
                invalid(format!(
                    "server {} is listed as {} but runs at {}",
                    self.index, self.server_endpoints[self.index], self.current_endpoint
                ))
            }
            _ => Ok(()),
        }
    }

    /// The role described by this configuration.
    pub fn role(&self) -> Role {
        Role {
            kind: self.role,
            index: self.index,
            worker_num: self.worker_num,
            current_endpoint: self.current_endpoint.clone(),
            worker_endpoints: self.worker_endpoints.clone(),
            server_endpoints: self.server_endpoints.clone(),
        }
    }
}

/// Splits a comma separated list of endpoints, skipping empty entries.
fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// How parameter servers apply the gradients pushed by the workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Wait for every worker's gradient before updating.
    #[default]
    Sync,
    /// Apply every gradient as soon as it arrives.
    Async,
}

fn default_average_gradients() -> bool {
    true
}

fn default_shard_size() -> NonZeroUsize {
    NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN)
}

/// Strategy configuration handed to `distributed_optimizer`.
///
/// The optimizer adapters store it untouched, each strategy reads the fields it cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedStrategy {
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// Divide all-reduced gradients by the amount of workers.
    #[serde(default = "default_average_gradients")]
    pub average_gradients: bool,
    /// Maximum amount of parameters per parameter server shard.
    #[serde(default = "default_shard_size")]
    pub shard_size: NonZeroUsize,
}

impl Default for DistributedStrategy {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            average_gradients: default_average_gradients(),
            shard_size: default_shard_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn trainer_from_vars() {
        let config = JobConfig::from_vars(lookup(&[
            ("TRAINING_ROLE", "TRAINER"),
            ("PADDLE_TRAINER_ID", "1"),
            ("PADDLE_TRAINERS_NUM", "2"),
            ("PADDLE_TRAINER_ENDPOINTS", "127.0.0.1:6170, 127.0.0.1:6171"),
            ("PADDLE_PSERVERS_IP_PORT_LIST", "127.0.0.1:6000"),
        ]))
        .unwrap();

        assert_eq!(config.role, RoleKind::Worker);
        assert_eq!(config.index, 1);
        assert_eq!(config.current_endpoint, "127.0.0.1:6171");
        assert_eq!(config.server_endpoints, ["127.0.0.1:6000"]);
    }

    #[test]
    fn pserver_index_is_its_position() {
        let config = JobConfig::from_vars(lookup(&[
            ("TRAINING_ROLE", "PSERVER"),
            ("PADDLE_TRAINERS_NUM", "3"),
            ("PADDLE_PSERVERS_IP_PORT_LIST", "a:1,b:2,c:3"),
            ("PADDLE_CURRENT_ENDPOINT", "b:2"),
        ]))
        .unwrap();

        assert_eq!(config.role, RoleKind::Server);
        assert_eq!(config.index, 1);
    }

    #[test]
    fn invalid_vars() {
        let unknown_role = JobConfig::from_vars(lookup(&[
            ("TRAINING_ROLE", "CHIEF"),
            ("PADDLE_TRAINERS_NUM", "1"),
        ]));
        assert!(matches!(unknown_role, Err(DistributedErr::InvalidConfig(_))));

        let out_of_range = JobConfig::from_vars(lookup(&[
            ("TRAINING_ROLE", "TRAINER"),
            ("PADDLE_TRAINER_ID", "2"),
            ("PADDLE_TRAINERS_NUM", "2"),
        ]));
        assert!(matches!(out_of_range, Err(DistributedErr::InvalidConfig(_))));

        let unlisted_server = JobConfig::from_vars(lookup(&[
            ("TRAINING_ROLE", "PSERVER"),
            ("PADDLE_TRAINERS_NUM", "1"),
            ("PADDLE_PSERVERS_IP_PORT_LIST", "a:1"),
            ("PADDLE_CURRENT_ENDPOINT", "z:9"),
        ]));
        assert!(matches!(unlisted_server, Err(DistributedErr::InvalidConfig(_))));
    }

    #[test]
    fn json_defaults() {
        let config: JobConfig =
            serde_json::from_str(r#"{ "role": "worker", "worker_num": 1 }"#).unwrap();

        assert_eq!(config.index, 0);
        assert_eq!(config.connect_retries, 30);
        assert!(config.validate().is_ok());

        let strategy: DistributedStrategy = serde_json::from_str("{}").unwrap();
        assert_eq!(strategy, DistributedStrategy::default());
        assert_eq!(strategy.shard_size.get(), 1024);
    }
}

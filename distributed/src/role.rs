use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::{DistributedErr, Result};

/// The kind of process inside a distributed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Worker,
    Server,
}

impl Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Worker => f.write_str("worker"),
            RoleKind::Server => f.write_str("server"),
        }
    }
}

/// The identity of a process within a distributed job.
///
/// `index` is the position of the process among the peers of its own kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub kind: RoleKind,
    pub index: usize,
    pub worker_num: usize,
    pub current_endpoint: String,
    pub worker_endpoints: Vec<String>,
    pub server_endpoints: Vec<String>,
}

/// Identity and endpoint queries over the role assigned by role discovery.
///
/// Every query fails with `DistributedErr::UninitializedRole` until a role is set.
#[derive(Debug, Clone, Default)]
pub struct RoleContext {
    role: Option<Role>,
}

impl RoleContext {
    /// Creates a context with no role assigned yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the discovered role.
    pub(crate) fn set(&mut self, role: Role) {
        self.role = Some(role);
    }

    pub fn is_initialized(&self) -> bool {
        self.role.is_some()
    }

    /// The discovered role.
    ///
    /// # Errors
    /// `DistributedErr::UninitializedRole` before role discovery.
    pub fn role(&self) -> Result<&Role> {
        self.role.as_ref().ok_or(DistributedErr::UninitializedRole)
    }

    pub fn kind(&self) -> Result<RoleKind> {
        Ok(self.role()?.kind)
    }

    pub fn is_worker(&self) -> Result<bool> {
        Ok(self.kind()? == RoleKind::Worker)
    }

    pub fn is_server(&self) -> Result<bool> {
        Ok(self.kind()? == RoleKind::Server)
    }

    pub fn is_first_worker(&self) -> Result<bool> {
        let role = self.role()?;
        Ok(role.kind == RoleKind::Worker && role.index == 0)
    }

    /// The index of this process among its peers.
    pub fn worker_index(&self) -> Result<usize> {
        Ok(self.role()?.index)
    }

    pub fn worker_num(&self) -> Result<usize> {
        Ok(self.role()?.worker_num)
    }

    pub fn worker_endpoints(&self) -> Result<&[String]> {
        Ok(&self.role()?.worker_endpoints)
    }

    /// The worker endpoints joined with commas.
    pub fn worker_endpoints_str(&self) -> Result<String> {
        Ok(self.worker_endpoints()?.join(","))
    }

    /// The index of this process among its peers.
    pub fn server_index(&self) -> Result<usize> {
        Ok(self.role()?.index)
    }

    pub fn server_num(&self) -> Result<usize> {
        Ok(self.role()?.server_endpoints.len())
    }

    pub fn server_endpoints(&self) -> Result<&[String]> {
        Ok(&self.role()?.server_endpoints)
    }

    /// The server endpoints joined with commas.
    pub fn server_endpoints_str(&self) -> Result<String> {
        Ok(self.server_endpoints()?.join(","))
    }

    pub fn current_endpoint(&self) -> Result<&str> {
        Ok(&self.role()?.current_endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_role() -> Role {
        Role {
            kind: RoleKind::Server,
            index: 1,
            worker_num: 4,
            current_endpoint: "10.0.0.2:6000".into(),
            worker_endpoints: Vec::new(),
            server_endpoints: vec!["10.0.0.1:6000".into(), "10.0.0.2:6000".into()],
        }
    }

    #[test]
    fn queries_fail_before_discovery() {
        let ctx = RoleContext::new();

        assert!(matches!(ctx.is_worker(), Err(DistributedErr::UninitializedRole)));
        assert!(matches!(ctx.is_first_worker(), Err(DistributedErr::UninitializedRole)));
        assert!(matches!(ctx.worker_index(), Err(DistributedErr::UninitializedRole)));
        assert!(matches!(ctx.worker_num(), Err(DistributedErr::UninitializedRole)));
        assert!(matches!(ctx.worker_endpoints(), Err(DistributedErr::UninitializedRole)));
        assert!(matches!(ctx.server_num(), Err(DistributedErr::UninitializedRole)));
        assert!(matches!(ctx.server_index(), Err(DistributedErr::UninitializedRole)));
        assert!(matches!(ctx.server_endpoints(), Err(DistributedErr::UninitializedRole)));
        assert!(matches!(ctx.is_server(), Err(DistributedErr::UninitializedRole)));
    }

    #[test]
    fn server_queries() {
        let mut ctx = RoleContext::new();
        ctx.set(server_role());

        assert!(ctx.is_server().unwrap());
        assert!(!ctx.is_worker().unwrap());
        assert!(!ctx.is_first_worker().unwrap());
        assert_eq!(ctx.server_index().unwrap(), 1);
        assert_eq!(ctx.server_num().unwrap(), 2);
        assert_eq!(ctx.worker_num().unwrap(), 4);
        assert_eq!(
            ctx.server_endpoints_str().unwrap(),
            "10.0.0.1:6000,10.0.0.2:6000"
        );
    }

    #[test]
    fn first_worker() {
        let mut ctx = RoleContext::new();
        ctx.set(Role {
            kind: RoleKind::Worker,
            index: 0,
            worker_num: 2,
            current_endpoint: "a:1".into(),
            worker_endpoints: vec!["a:1".into(), "b:1".into()],
            server_endpoints: Vec::new(),
        });

        assert!(ctx.is_first_worker().unwrap());
        assert_eq!(ctx.worker_endpoints_str().unwrap(), "a:1,b:1");
        assert_eq!(ctx.server_num().unwrap(), 0);
    }
}

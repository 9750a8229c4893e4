use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::role_maker::RoleMakerCapabilities;

/// Tags the distributed strategy a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Parameter servers driven by a transpiled program.
    Transpiler,
    /// Parameter servers backed by the pslib runtime.
    PsLib,
    /// Peer to peer training with collectives among workers.
    Collective,
}

impl Mode {
    pub fn is_parameter_server(&self) -> bool {
        matches!(self, Mode::Transpiler | Mode::PsLib)
    }

    /// The role maker capabilities this mode can't run without.
    pub fn required_capabilities(&self) -> RoleMakerCapabilities {
        RoleMakerCapabilities {
            servers: self.is_parameter_server(),
            collective: !self.is_parameter_server(),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Transpiler => "transpiler",
            Mode::PsLib => "pslib",
            Mode::Collective => "collective",
        };

        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements() {
        assert!(Mode::Transpiler.required_capabilities().servers);
        assert!(Mode::PsLib.is_parameter_server());
        assert!(Mode::Collective.required_capabilities().collective);
        assert!(!Mode::Collective.required_capabilities().servers);
    }

    #[test]
    fn serde_names() {
        let mode: Mode = serde_json::from_str(r#""ps_lib""#).unwrap();
        assert_eq!(mode, Mode::PsLib);
        assert_eq!(Mode::Collective.to_string(), "collective");
    }
}

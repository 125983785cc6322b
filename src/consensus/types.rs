use std::fmt;
use std::io::Cursor;

use openraft::BasicNode;
use serde::{Deserialize, Serialize};

use crate::error::{BrightError, CommandErrorKind};
use crate::models::Command;

/// Node ID type
pub type NodeId = u64;

/// OpenRaft type configuration for Bright
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[derive(Serialize, Deserialize)]
pub struct TypeConfig;

impl fmt::Display for TypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeConfig")
    }
}

impl openraft::RaftTypeConfig for TypeConfig {
    type D = Request;
    type R = CommandResult;
    type Node = BasicNode;
    type NodeId = NodeId;
    type Entry = openraft::Entry<TypeConfig>;
    type SnapshotData = Cursor<Vec<u8>>;
    type AsyncRuntime = openraft::TokioRuntime;
    type Responder = openraft::impls::OneshotResponder<TypeConfig>;
}

/// Request data for Raft (what gets proposed)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self { command }
    }
}

/// Outcome of applying one replicated command on the state machine.
///
/// Logical failures travel as data: the entry stays committed on every
/// node, and only the leader surfaces the failure to its caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandResult {
    pub ok: bool,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub kind: Option<CommandErrorKind>,
}

impl CommandResult {
    pub fn success() -> Self {
        Self {
            ok: true,
            message: None,
            kind: None,
        }
    }

    pub fn failure(error: &BrightError) -> Self {
        Self {
            ok: false,
            message: Some(error.to_string()),
            kind: Some(error.command_kind()),
        }
    }

    /// Convert a replicated failure back into an error for the caller
    pub fn into_result(self) -> crate::error::Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(BrightError::Command {
                kind: self.kind.unwrap_or(CommandErrorKind::Internal),
                message: self.message.unwrap_or_else(|| "command failed".to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_carries_kind() {
        let result = CommandResult::failure(&BrightError::IndexNotFound("x".to_string()));
        assert!(!result.ok);
        assert_eq!(result.kind, Some(CommandErrorKind::NotFound));

        match result.into_result() {
            Err(BrightError::Command { kind, .. }) => {
                assert_eq!(kind, CommandErrorKind::NotFound)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_success_round_trip() {
        let bytes = bincode::serialize(&CommandResult::success()).unwrap();
        let decoded: CommandResult = bincode::deserialize(&bytes).unwrap();
        assert!(decoded.ok);
        assert!(decoded.into_result().is_ok());
    }
}

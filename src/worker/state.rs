//! Instance state machine.
//!
//! Numeric values are shared with the scheduling server and must not change.

use serde::{Deserialize, Serialize};

/// Status of a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum InstanceStatus {
    WaitingDispatch,
    WaitingWorkerReceive,
    Running,
    Failed,
    Succeeded,
    Canceled,
    Stopped,
}

impl InstanceStatus {
    /// Wire value of this status.
    pub fn code(self) -> i32 {
        match self {
            Self::WaitingDispatch => 1,
            Self::WaitingWorkerReceive => 2,
            Self::Running => 3,
            Self::Failed => 4,
            Self::Succeeded => 5,
            Self::Canceled => 9,
            Self::Stopped => 10,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::WaitingDispatch,
            2 => Self::WaitingWorkerReceive,
            3 => Self::Running,
            4 => Self::Failed,
            5 => Self::Succeeded,
            9 => Self::Canceled,
            10 => Self::Stopped,
            _ => return None,
        })
    }

    /// Terminal states are entered once and never left.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Succeeded | Self::Canceled | Self::Stopped
        )
    }

    /// Any non-terminal state may be rewritten, including with itself.
    pub fn can_transition_to(self, _target: InstanceStatus) -> bool {
        !self.is_terminal()
    }

    /// Wire codes of every terminal status.
    pub fn terminal_codes() -> [i32; 4] {
        [
            Self::Failed.code(),
            Self::Succeeded.code(),
            Self::Canceled.code(),
            Self::Stopped.code(),
        ]
    }
}

impl From<InstanceStatus> for i32 {
    fn from(status: InstanceStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for InstanceStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown instance status {code}"))
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WaitingDispatch => "waiting_dispatch",
            Self::WaitingWorkerReceive => "waiting_worker_receive",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
            Self::Canceled => "canceled",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

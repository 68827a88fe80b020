use serde::{Deserialize, Serialize};

/// The cross-group dispatch policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Iterate groups starting after the last one served; skip empty or
    /// capped groups without consuming a turn.
    RoundRobin,
    /// Release from whichever eligible group has the oldest head,
    /// ties broken lexicographically by group name.
    Fifo,
    /// Smooth weighted round-robin over `groupPriorities`: deterministic,
    /// proportional to weight, starvation-free.
    Priority,
}

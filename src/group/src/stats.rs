use serde::{Deserialize, Serialize};

/// Cached aggregate counters for a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    pub total: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub paused: u64,
}

impl GroupStats {
    pub(crate) fn to_fields(self) -> [(&'static str, String); 5] {
        [
            ("total", self.total.to_string()),
            ("active", self.active.to_string()),
            ("completed", self.completed.to_string()),
            ("failed", self.failed.to_string()),
            ("paused", self.paused.to_string()),
        ]
    }

    pub(crate) fn from_fields(fields: &std::collections::HashMap<String, String>) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        Some(Self {
            total: field_or_zero(fields, "total"),
            active: field_or_zero(fields, "active"),
            completed: field_or_zero(fields, "completed"),
            failed: field_or_zero(fields, "failed"),
            paused: field_or_zero(fields, "paused"),
        })
    }
}

fn field_or_zero(fields: &std::collections::HashMap<String, String>, name: &str) -> u64 {
    fields.get(name).and_then(|v| v.parse().ok()).unwrap_or(0)
}

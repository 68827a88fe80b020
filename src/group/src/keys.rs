//! Redis key naming for a group's indices, per the wire layout §7 names.

pub fn membership_key(group: &str) -> String {
    format!("group:{group}:tasks")
}

pub fn order_key(group: &str) -> String {
    format!("group:{group}:order")
}

pub fn processing_key(group: &str) -> String {
    format!("group:{group}:processing")
}

pub fn state_key(group: &str) -> String {
    format!("group:{group}:state")
}

/// The single queue a group's tasks are drawn from. A group belongs to
/// exactly one queue (this is what lets the Scheduler filter "groups
/// eligible for this slot's queue set"); stored as a plain string rather
/// than a per-task hash.
pub fn queue_key(group: &str) -> String {
    format!("group:{group}:queue")
}

/// Map of task id -> serialized [`taskqueue_registry::TaskOptions`], used
/// by the Scheduler to check `notBefore` eligibility at a group's head.
pub fn options_key(group: &str) -> String {
    format!("group:{group}:options")
}

pub fn stats_key(group: &str) -> String {
    format!("group:{group}:stats")
}

pub fn cap_key(group: &str) -> String {
    format!("group:{group}:cap")
}

/// Unordered set of group names that have ever had a task enqueued for
/// `queue`. The Scheduler iterates this to find groups eligible for a
/// worker slot's queue set.
pub fn queue_groups_key(queue: &str) -> String {
    format!("queue:{queue}:groups")
}

/// The synthetic group name a task with no explicit group is scheduled
/// under: one synthetic group per queue, unifying the scheduling code
/// path.
pub fn synthetic_group_name(queue: &str) -> String {
    format!("__queue__:{queue}")
}

//! Metric names recorded by the node connection layer.

/// Node dial attempts (counter).
pub const NODE_DIALS_TOTAL: &str = "node_dials_total";
/// Node connection leases handed out (counter).
pub const NODE_LEASES_TOTAL: &str = "node_leases_total";
/// Failed node connection attempts (counter).
pub const NODE_CONNECTION_FAILURES_TOTAL: &str = "node_connection_failures_total";
/// Single-use exchanges that timed out (counter).
pub const NODE_PUSH_PULL_TIMEOUTS_TOTAL: &str = "node_push_pull_timeouts_total";

//! Error taxonomy of the tracker.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// A claim cannot be satisfied. Recovered by the caller (the scheduler
    /// retries elsewhere), never fatal to the tracker itself.
    #[error("insufficient {resource}: requested {requested}, available {available}")]
    ResourceUnavailable {
        resource: String,
        requested: u64,
        available: u64,
    },

    /// Driver-reported stats are neither a map nor a string parseable as
    /// one. Aborts the current reconciliation pass; the previously published
    /// record remains authoritative.
    #[error("malformed driver stats: {0}")]
    MalformedDriverReport(String),

    /// Persistence lookup miss for a (host, node) record.
    #[error("no resource record found for {host}/{node}")]
    HostNotFound { host: String, node: String },

    /// The persistence collaborator failed to store a record.
    #[error("failed to persist resource record for {host}/{node}: {reason}")]
    Persistence {
        host: String,
        node: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors raised by the scheduling core. All of these are local to the
/// queue manager and reported to whatever triggered the operation; none
/// of them aborts the process.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// A queue mutation or read could not acquire the queue's lock
    /// within the configured bound. Retryable.
    #[error("timed out waiting for the lock on queue `{queue}`")]
    LockTimeout { queue: String },

    #[error("unknown queue `{0}`")]
    UnknownQueue(String),

    #[error("unknown project `{0}`")]
    UnknownProject(String),

    #[error("project `{0}` has no running integrator")]
    NotRunning(String),
}

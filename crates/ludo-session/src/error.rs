/// Errors from authenticating a connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Missing, unknown or malformed credential.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
}

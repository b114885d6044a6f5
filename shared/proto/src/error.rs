use thiserror::Error;

/// Abstract error kinds the core raises. The wire-format name for
/// each ("MalformedPacket", ...) is spec.md §7's terminology.
#[derive(Debug, Error)]
pub enum HubError {
    /// Wire-format violation on a DMRD burst or the repeater-config blob.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// Bad HMAC / unknown repeater id / bad challenge response.
    #[error("authentication failed: {0}")]
    AuthFailed(&'static str),

    /// The store has no such repeater/user/talkgroup.
    #[error("unknown entity: {0}")]
    UnknownEntity(&'static str),

    /// A pub/sub publish or database error that may succeed on retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Refused because the hub is stopping.
    #[error("hub is shutting down")]
    Shutdown,
}

pub type HubResult<T> = Result<T, HubError>;

use thiserror::Error;

/// Error types for the group call server
#[derive(Debug, Error)]
pub enum GroupCallError {
    /// Membership errors
    #[error("Participant {name} already exists in room {room}")]
    DuplicateParticipant { room: String, name: String },

    #[error("Room {0} is closed")]
    RoomClosed(String),

    #[error("Connection is not in a room")]
    NotInRoom,

    #[error("Connection already joined room {0}")]
    AlreadyInRoom(String),

    /// Media engine errors
    #[error("Media allocation failed: {0}")]
    MediaAllocation(String),

    #[error("SDP negotiation failed: {0}")]
    Negotiation(String),

    #[error("Invalid SDP format: {0}")]
    InvalidSdp(String),

    #[error("Release failed: {0}")]
    Release(String),

    #[error("Media engine transport error: {0}")]
    MediaEngineTransport(String),

    /// Signaling errors
    #[error("Failed to deliver message to {0}")]
    Channel(String),

    #[error("Invalid signaling message: {0}")]
    InvalidSignalingMessage(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using GroupCallError
pub type Result<T> = std::result::Result<T, GroupCallError>;

impl GroupCallError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        GroupCallError::Internal(msg.into())
    }

    /// Helper to create media allocation errors
    pub fn allocation(msg: impl Into<String>) -> Self {
        GroupCallError::MediaAllocation(msg.into())
    }

    /// Helper to create media engine transport errors
    pub fn transport(msg: impl Into<String>) -> Self {
        GroupCallError::MediaEngineTransport(msg.into())
    }

    /// True for failures of the offer/answer exchange
    pub fn is_negotiation_failure(&self) -> bool {
        matches!(
            self,
            GroupCallError::Negotiation(_) | GroupCallError::InvalidSdp(_)
        )
    }
}

/// Offers are parsed by webrtc before they reach the media engine
impl From<webrtc::Error> for GroupCallError {
    fn from(err: webrtc::Error) -> Self {
        GroupCallError::InvalidSdp(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GroupCallError::DuplicateParticipant {
            room: "R1".to_string(),
            name: "alice".to_string(),
        };
        assert_eq!(err.to_string(), "Participant alice already exists in room R1");

        let err = GroupCallError::RoomClosed("R2".to_string());
        assert_eq!(err.to_string(), "Room R2 is closed");
    }

    #[test]
    fn test_error_helpers() {
        let err = GroupCallError::internal("Something went wrong");
        assert!(matches!(err, GroupCallError::Internal(_)));

        let err = GroupCallError::allocation("no pipeline");
        assert!(matches!(err, GroupCallError::MediaAllocation(_)));
    }

    #[test]
    fn test_negotiation_failures() {
        assert!(GroupCallError::InvalidSdp("bad".into()).is_negotiation_failure());
        assert!(GroupCallError::Negotiation("rejected".into()).is_negotiation_failure());
        assert!(!GroupCallError::Channel("alice".into()).is_negotiation_failure());
    }
}

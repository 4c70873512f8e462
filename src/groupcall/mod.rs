pub mod participant;
pub mod registry;
pub mod room;
pub mod signaling;

pub use participant::{ClientSender, Participant, ParticipantKey};
pub use registry::{RoomManager, RoomSummary};
pub use room::Room;
pub use signaling::{ClientMessage, ServerMessage, SignalingHandler};

//! Gateway protocol definitions
//!
//! Op codes, frame format, payloads, and close codes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseAction, CloseCode};
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    Activity, HelloPayload, IdentifyPayload, IdentifyProperties, PresenceUpdatePayload,
    ReadyPayload, RequestGuildMembersPayload, ResumePayload, UnavailableGuild,
    VoiceStateUpdatePayload,
};

//! Gateway event types
//!
//! Names carried in the `t` field of dispatch frames, and the intents each one requires.

use crate::Intents;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gateway dispatch event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Connection events
    /// Sent after successful Identify
    Ready,
    /// Sent after successful Resume
    Resumed,

    // Guild events
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    GuildBanAdd,
    GuildBanRemove,
    GuildEmojisUpdate,
    GuildRoleCreate,
    GuildRoleUpdate,
    GuildRoleDelete,

    // Channel events
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    ChannelPinsUpdate,
    ThreadCreate,
    ThreadUpdate,
    ThreadDelete,

    // Message events
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    MessageDeleteBulk,

    // Reaction events
    MessageReactionAdd,
    MessageReactionRemove,
    MessageReactionRemoveAll,

    // Member events
    GuildMemberAdd,
    GuildMemberUpdate,
    GuildMemberRemove,
    /// Response to a Request Guild Members command
    GuildMembersChunk,

    // Invite events
    InviteCreate,
    InviteDelete,

    // Presence events
    PresenceUpdate,
    TypingStart,

    // Voice events
    VoiceStateUpdate,
    VoiceServerUpdate,

    // Misc
    UserUpdate,
    WebhooksUpdate,
    InteractionCreate,
}

impl EventType {
    /// Every known event type
    pub const ALL: &'static [EventType] = &[
        Self::Ready,
        Self::Resumed,
        Self::GuildCreate,
        Self::GuildUpdate,
        Self::GuildDelete,
        Self::GuildBanAdd,
        Self::GuildBanRemove,
        Self::GuildEmojisUpdate,
        Self::GuildRoleCreate,
        Self::GuildRoleUpdate,
        Self::GuildRoleDelete,
        Self::ChannelCreate,
        Self::ChannelUpdate,
        Self::ChannelDelete,
        Self::ChannelPinsUpdate,
        Self::ThreadCreate,
        Self::ThreadUpdate,
        Self::ThreadDelete,
        Self::MessageCreate,
        Self::MessageUpdate,
        Self::MessageDelete,
        Self::MessageDeleteBulk,
        Self::MessageReactionAdd,
        Self::MessageReactionRemove,
        Self::MessageReactionRemoveAll,
        Self::GuildMemberAdd,
        Self::GuildMemberUpdate,
        Self::GuildMemberRemove,
        Self::GuildMembersChunk,
        Self::InviteCreate,
        Self::InviteDelete,
        Self::PresenceUpdate,
        Self::TypingStart,
        Self::VoiceStateUpdate,
        Self::VoiceServerUpdate,
        Self::UserUpdate,
        Self::WebhooksUpdate,
        Self::InteractionCreate,
    ];

    /// Get the string representation of the event type
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Resumed => "RESUMED",
            Self::GuildCreate => "GUILD_CREATE",
            Self::GuildUpdate => "GUILD_UPDATE",
            Self::GuildDelete => "GUILD_DELETE",
            Self::GuildBanAdd => "GUILD_BAN_ADD",
            Self::GuildBanRemove => "GUILD_BAN_REMOVE",
            Self::GuildEmojisUpdate => "GUILD_EMOJIS_UPDATE",
            Self::GuildRoleCreate => "GUILD_ROLE_CREATE",
            Self::GuildRoleUpdate => "GUILD_ROLE_UPDATE",
            Self::GuildRoleDelete => "GUILD_ROLE_DELETE",
            Self::ChannelCreate => "CHANNEL_CREATE",
            Self::ChannelUpdate => "CHANNEL_UPDATE",
            Self::ChannelDelete => "CHANNEL_DELETE",
            Self::ChannelPinsUpdate => "CHANNEL_PINS_UPDATE",
            Self::ThreadCreate => "THREAD_CREATE",
            Self::ThreadUpdate => "THREAD_UPDATE",
            Self::ThreadDelete => "THREAD_DELETE",
            Self::MessageCreate => "MESSAGE_CREATE",
            Self::MessageUpdate => "MESSAGE_UPDATE",
            Self::MessageDelete => "MESSAGE_DELETE",
            Self::MessageDeleteBulk => "MESSAGE_DELETE_BULK",
            Self::MessageReactionAdd => "MESSAGE_REACTION_ADD",
            Self::MessageReactionRemove => "MESSAGE_REACTION_REMOVE",
            Self::MessageReactionRemoveAll => "MESSAGE_REACTION_REMOVE_ALL",
            Self::GuildMemberAdd => "GUILD_MEMBER_ADD",
            Self::GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
            Self::GuildMemberRemove => "GUILD_MEMBER_REMOVE",
            Self::GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
            Self::InviteCreate => "INVITE_CREATE",
            Self::InviteDelete => "INVITE_DELETE",
            Self::PresenceUpdate => "PRESENCE_UPDATE",
            Self::TypingStart => "TYPING_START",
            Self::VoiceStateUpdate => "VOICE_STATE_UPDATE",
            Self::VoiceServerUpdate => "VOICE_SERVER_UPDATE",
            Self::UserUpdate => "USER_UPDATE",
            Self::WebhooksUpdate => "WEBHOOKS_UPDATE",
            Self::InteractionCreate => "INTERACTION_CREATE",
        }
    }

    /// Parse an event type from a string
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|event| event.as_str() == s)
    }

    /// Intents that make the gateway send this event.
    ///
    /// Empty for events that are always delivered (READY, RESUMED, interactions, ...).
    #[must_use]
    pub const fn required_intents(self) -> Intents {
        match self {
            Self::Ready
            | Self::Resumed
            | Self::UserUpdate
            | Self::VoiceServerUpdate
            | Self::InteractionCreate
            | Self::GuildMembersChunk => Intents::empty(),

            Self::GuildCreate
            | Self::GuildUpdate
            | Self::GuildDelete
            | Self::GuildRoleCreate
            | Self::GuildRoleUpdate
            | Self::GuildRoleDelete
            | Self::ChannelCreate
            | Self::ChannelUpdate
            | Self::ChannelDelete
            | Self::ThreadCreate
            | Self::ThreadUpdate
            | Self::ThreadDelete => Intents::GUILDS,

            Self::ChannelPinsUpdate => Intents::GUILDS.union(Intents::DIRECT_MESSAGES),

            Self::GuildBanAdd | Self::GuildBanRemove => Intents::GUILD_MODERATION,
            Self::GuildEmojisUpdate => Intents::GUILD_EXPRESSIONS,

            Self::MessageCreate
            | Self::MessageUpdate
            | Self::MessageDelete => Intents::GUILD_MESSAGES.union(Intents::DIRECT_MESSAGES),
            Self::MessageDeleteBulk => Intents::GUILD_MESSAGES,

            Self::MessageReactionAdd
            | Self::MessageReactionRemove
            | Self::MessageReactionRemoveAll => {
                Intents::GUILD_MESSAGE_REACTIONS.union(Intents::DIRECT_MESSAGE_REACTIONS)
            }

            Self::GuildMemberAdd | Self::GuildMemberUpdate | Self::GuildMemberRemove => {
                Intents::GUILD_MEMBERS
            }

            Self::InviteCreate | Self::InviteDelete => Intents::GUILD_INVITES,
            Self::PresenceUpdate => Intents::GUILD_PRESENCES,
            Self::TypingStart => {
                Intents::GUILD_MESSAGE_TYPING.union(Intents::DIRECT_MESSAGE_TYPING)
            }
            Self::VoiceStateUpdate => Intents::GUILD_VOICE_STATES,
            Self::WebhooksUpdate => Intents::GUILD_WEBHOOKS,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<EventType> for String {
    fn from(event: EventType) -> Self {
        event.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_as_str() {
        assert_eq!(EventType::Ready.as_str(), "READY");
        assert_eq!(EventType::MessageCreate.as_str(), "MESSAGE_CREATE");
        assert_eq!(EventType::PresenceUpdate.as_str(), "PRESENCE_UPDATE");
    }

    #[test]
    fn test_from_str_matches_as_str_for_all() {
        for event in EventType::ALL {
            assert_eq!(EventType::from_str(event.as_str()), Some(*event));
        }
        assert_eq!(EventType::from_str("INVALID"), None);
    }

    #[test]
    fn test_serde_name_matches_as_str() {
        for event in EventType::ALL {
            let json = serde_json::to_string(event).unwrap();
            assert_eq!(json, format!("\"{}\"", event.as_str()));
        }
    }

    #[test]
    fn test_required_intents() {
        assert!(EventType::Ready.required_intents().is_empty());
        assert_eq!(
            EventType::MessageCreate.required_intents(),
            Intents::GUILD_MESSAGES | Intents::DIRECT_MESSAGES
        );
        assert_eq!(EventType::GuildMemberAdd.required_intents(), Intents::GUILD_MEMBERS);
        assert_eq!(EventType::GuildCreate.required_intents(), Intents::GUILDS);
    }
}

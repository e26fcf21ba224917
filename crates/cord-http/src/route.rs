//! REST routes and their rate-limit scopes
//!
//! Buckets are keyed by method and route template with only the major parameter (channel, guild
//! or webhook ID) filled in, so `/channels/1/messages/2` and `/channels/1/messages/3` share a
//! bucket while `/channels/4/messages/2` does not.

use cord_core::Snowflake;
use reqwest::Method;

/// One REST endpoint call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    template: &'static str,
    major: Option<(&'static str, Snowflake)>,
    path: String,
    resource: Option<String>,
}

impl Route {
    /// Build a route from its template and the concrete path.
    ///
    /// `major` names the placeholder in `template` that separates buckets.
    pub fn new(
        method: Method,
        template: &'static str,
        major: Option<(&'static str, Snowflake)>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method,
            template,
            major,
            path: path.into(),
            resource: None,
        }
    }

    /// Add a resource-scoped limit key, e.g. `reactions:{channel_id}`
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &'static str {
        self.template
    }

    /// Path relative to the API base URL
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Bucket key of the route itself: `"{METHOD} {template with major parameter}"`
    pub fn scope_key(&self) -> String {
        let route = match self.major {
            Some((name, id)) => self
                .template
                .replace(&format!("{{{name}}}"), &id.to_string()),
            None => self.template.to_string(),
        };
        format!("{} {route}", self.method)
    }

    /// Every bucket key this request is charged against (global excluded)
    pub fn scope_keys(&self) -> Vec<String> {
        let mut keys = vec![self.scope_key()];
        if let Some(resource) = &self.resource {
            keys.push(resource.clone());
        }
        keys
    }

    /// `GET /gateway/bot`
    #[must_use]
    pub fn gateway_bot() -> Self {
        Self::new(Method::GET, "/gateway/bot", None, "/gateway/bot")
    }

    /// `GET /channels/{channel_id}`
    #[must_use]
    pub fn get_channel(channel_id: Snowflake) -> Self {
        Self::new(
            Method::GET,
            "/channels/{channel_id}",
            Some(("channel_id", channel_id)),
            format!("/channels/{channel_id}"),
        )
    }

    /// `POST /channels/{channel_id}/messages`
    #[must_use]
    pub fn create_message(channel_id: Snowflake) -> Self {
        Self::new(
            Method::POST,
            "/channels/{channel_id}/messages",
            Some(("channel_id", channel_id)),
            format!("/channels/{channel_id}/messages"),
        )
    }

    /// `DELETE /channels/{channel_id}/messages/{message_id}`
    #[must_use]
    pub fn delete_message(channel_id: Snowflake, message_id: Snowflake) -> Self {
        Self::new(
            Method::DELETE,
            "/channels/{channel_id}/messages/{message_id}",
            Some(("channel_id", channel_id)),
            format!("/channels/{channel_id}/messages/{message_id}"),
        )
    }

    /// `PUT /channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me`
    ///
    /// Charged against the channel's reaction limit as well as the route bucket.
    #[must_use]
    pub fn create_reaction(channel_id: Snowflake, message_id: Snowflake, emoji: &str) -> Self {
        Self::new(
            Method::PUT,
            "/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me",
            Some(("channel_id", channel_id)),
            format!("/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me"),
        )
        .with_resource(format!("reactions:{channel_id}"))
    }

    /// `DELETE /channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me`
    #[must_use]
    pub fn delete_own_reaction(channel_id: Snowflake, message_id: Snowflake, emoji: &str) -> Self {
        Self::new(
            Method::DELETE,
            "/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me",
            Some(("channel_id", channel_id)),
            format!("/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me"),
        )
        .with_resource(format!("reactions:{channel_id}"))
    }

    /// `GET /guilds/{guild_id}`
    #[must_use]
    pub fn get_guild(guild_id: Snowflake) -> Self {
        Self::new(
            Method::GET,
            "/guilds/{guild_id}",
            Some(("guild_id", guild_id)),
            format!("/guilds/{guild_id}"),
        )
    }

    /// `PATCH /guilds/{guild_id}/emojis/{emoji_id}`
    #[must_use]
    pub fn modify_guild_emoji(guild_id: Snowflake, emoji_id: Snowflake) -> Self {
        Self::new(
            Method::PATCH,
            "/guilds/{guild_id}/emojis/{emoji_id}",
            Some(("guild_id", guild_id)),
            format!("/guilds/{guild_id}/emojis/{emoji_id}"),
        )
        .with_resource(format!("emoji:{guild_id}"))
    }
}

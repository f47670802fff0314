use async_trait::async_trait;
use serenity::{
    http::Http,
    model::id::{GuildId, UserId},
};
use std::sync::Arc;

use crate::audio::persistence::MemberResolver;
use crate::audio::Requester;
use crate::error::{MusicError, Result};

/// Resuelve miembros con la API HTTP de Discord
pub struct SerenityMembers {
    http: Arc<Http>,
}

impl SerenityMembers {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MemberResolver for SerenityMembers {
    async fn resolve(&self, guild_id: GuildId, user_id: UserId) -> Result<Requester> {
        let member = self
            .http
            .get_member(guild_id, user_id)
            .await
            .map_err(|e| MusicError::MemberResolution {
                user_id,
                reason: e.to_string(),
            })?;

        Ok(Requester::new(member.user.id, member.display_name()))
    }
}

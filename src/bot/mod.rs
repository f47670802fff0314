//! # Bot Module
//!
//! Gateway wiring between serenity and the per-guild sessions.
//!
//! The handler only reacts to lifecycle events: when the bot itself is
//! disconnected from a voice channel, the guild's session is released so its
//! state is saved and the player binding is dropped.

pub mod members;

use serenity::{
    all::{Context, EventHandler, Ready, VoiceState},
    async_trait,
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::audio::SessionManager;

pub use members::SerenityMembers;

impl TypeMapKey for SessionManager {
    type Value = Arc<SessionManager>;
}

/// Handler de eventos del gateway
pub struct MusicHandler {
    sessions: Arc<SessionManager>,
}

impl MusicHandler {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl EventHandler for MusicHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
    }

    /// Libera la sesión cuando el bot sale del canal de voz
    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };

        info!("🔌 Bot desconectado en guild {}", guild_id);
        if let Err(e) = self.sessions.release(guild_id).await {
            error!("Error al liberar la sesión de guild {}: {:?}", guild_id, e);
        }
    }
}

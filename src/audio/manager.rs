use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::session::{Session, SessionContext};
use crate::error::Result;

/// Registro de sesiones por guild.
pub struct SessionManager {
    sessions: DashMap<GuildId, Arc<Session>>,
    ctx: SessionContext,
}

impl SessionManager {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            sessions: DashMap::new(),
            ctx,
        }
    }

    /// Obtiene la sesión de la guild, creándola y restaurándola si no existe
    pub async fn get_or_load(&self, guild_id: GuildId) -> Result<Arc<Session>> {
        if let Some(session) = self.get(guild_id) {
            return Ok(session);
        }

        let session = Session::new(guild_id, self.ctx.clone());
        session.load().await?;

        // Si otra tarea la creó mientras cargábamos, gana la primera
        let session = self.sessions.entry(guild_id).or_insert(session).clone();
        Ok(session)
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions.get(&guild_id).map(|s| s.value().clone())
    }

    /// Destruye el reproductor de la guild y olvida la sesión
    pub async fn release(&self, guild_id: GuildId) -> Result<()> {
        let Some((_, session)) = self.sessions.remove(&guild_id) else {
            return Ok(());
        };
        session.destroy_player().await
    }

    /// Elimina las sesiones sin reproductor y sin cola.
    ///
    /// Una sesión que alguna tarea todavía tiene en uso no se elimina, aunque
    /// esté vacía: lo que esa tarea haga con ella no puede quedar huérfano.
    pub async fn sweep_inactive(&self) -> usize {
        let guild_ids: Vec<GuildId> = self.sessions.iter().map(|e| *e.key()).collect();
        let mut removed = 0;
        for guild_id in guild_ids {
            let Some(session) = self.get(guild_id) else {
                continue;
            };
            if !session.is_inactive().await {
                continue;
            }
            if let Err(e) = session.save().await {
                error!("Error al guardar estado de guild {}: {:?}", guild_id, e);
            }
            drop(session);

            // Se vuelve a comprobar con la entrada bloqueada
            let swept = self
                .sessions
                .remove_if(&guild_id, |_, s| Arc::strong_count(s) == 1 && s.is_inactive_now());
            if swept.is_some() {
                removed += 1;
            } else {
                debug!("Guild {} volvió a usarse, se conserva su sesión", guild_id);
            }
        }

        if removed > 0 {
            info!("🧹 {} sesiones inactivas eliminadas", removed);
        }
        removed
    }

    /// Cierra todos los reproductores guardando cada guild
    pub async fn shutdown(&self) {
        for session in self.all() {
            if let Err(e) = session.destroy_player().await {
                error!("Error al cerrar guild {}: {:?}", session.guild_id(), e);
            }
        }
        self.sessions.clear();
        info!("💤 Sesiones cerradas");
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }
}

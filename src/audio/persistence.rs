//! Snapshot of a guild's playback settings and queue in the key-value store.
//!
//! Four fields are written per guild, each as JSON text: `repeat_mode`,
//! `is_shuffled`, `volume` and `queue`. The queue is a list of
//! `{ track, requester_id }` records where `track` is the portable blob from
//! [`Track::encode`]. Missing fields load as defaults.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serenity::model::id::{GuildId, UserId};
use std::collections::HashMap;
use tracing::debug;

use super::queue::RepeatMode;
use super::track::{Requester, Track, TrackItem};
use crate::error::{MusicError, Result};
use crate::storage::StateStore;

const REPEAT_MODE: &str = "repeat_mode";
const IS_SHUFFLED: &str = "is_shuffled";
const VOLUME: &str = "volume";
const QUEUE: &str = "queue";

pub const DEFAULT_VOLUME: u8 = 100;

/// Resuelve ids de usuario a miembros vivos de la guild.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MemberResolver: Send + Sync {
    async fn resolve(&self, guild_id: GuildId, user_id: UserId) -> Result<Requester>;
}

/// Registro guardado de un elemento de la cola
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItem {
    pub track: String,
    pub requester_id: String,
}

impl StoredItem {
    pub fn from_item(item: &TrackItem) -> Result<Self> {
        Ok(Self {
            track: item.track().encode()?,
            requester_id: item.requester().id.to_string(),
        })
    }
}

/// Estado de una guild tal como se guarda
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub repeat_mode: RepeatMode,
    pub is_shuffled: bool,
    pub volume: u8,
    pub queue: Vec<StoredItem>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            repeat_mode: RepeatMode::None,
            is_shuffled: false,
            volume: DEFAULT_VOLUME,
            queue: Vec::new(),
        }
    }
}

impl SessionSnapshot {
    /// Escribe los cuatro campos, uno tras otro
    pub async fn save(&self, store: &dyn StateStore, entity: &str) -> Result<()> {
        store.set_field(entity, REPEAT_MODE, serde_json::to_string(&self.repeat_mode)?).await?;
        store.set_field(entity, IS_SHUFFLED, serde_json::to_string(&self.is_shuffled)?).await?;
        store.set_field(entity, VOLUME, serde_json::to_string(&self.volume)?).await?;
        store.set_field(entity, QUEUE, serde_json::to_string(&self.queue)?).await?;
        debug!("💾 Estado guardado para guild {} ({} tracks)", entity, self.queue.len());
        Ok(())
    }

    pub async fn load(store: &dyn StateStore, entity: &str) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            repeat_mode: read_field(store, entity, REPEAT_MODE, defaults.repeat_mode).await?,
            is_shuffled: read_field(store, entity, IS_SHUFFLED, defaults.is_shuffled).await?,
            volume: read_field(store, entity, VOLUME, defaults.volume).await?,
            queue: read_field(store, entity, QUEUE, defaults.queue).await?,
        })
    }

    /// Reconstruye la cola resolviendo cada requester una sola vez.
    ///
    /// Si algún miembro no se puede resolver la carga entera falla.
    pub async fn resolve_queue(
        &self,
        guild_id: GuildId,
        members: &dyn MemberResolver,
    ) -> Result<Vec<TrackItem>> {
        let mut ids: Vec<UserId> = Vec::new();
        for stored in &self.queue {
            let id = parse_user_id(&stored.requester_id)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        let resolved = try_join_all(ids.into_iter().map(|id| members.resolve(guild_id, id))).await?;
        let by_id: HashMap<UserId, Requester> = resolved.into_iter().map(|r| (r.id, r)).collect();

        self.queue
            .iter()
            .map(|stored| {
                let id = parse_user_id(&stored.requester_id)?;
                let requester = by_id.get(&id).cloned().ok_or_else(|| {
                    MusicError::MemberResolution {
                        user_id: id,
                        reason: "el resolvedor devolvió otro miembro".to_string(),
                    }
                })?;
                Ok(TrackItem::new(Track::decode(&stored.track)?, requester))
            })
            .collect()
    }
}

async fn read_field<T: DeserializeOwned>(
    store: &dyn StateStore,
    entity: &str,
    field: &str,
    default: T,
) -> Result<T> {
    match store.get_field(entity, field).await? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(default),
    }
}

fn parse_user_id(raw: &str) -> Result<UserId> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(UserId::new)
        .ok_or_else(|| MusicError::InvalidRecord(format!("id de requester inválido: {raw}")))
}

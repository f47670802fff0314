use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

use super::track::Track;
use crate::error::Result;

/// Notificaciones que el reproductor externo envía a la sesión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// El track actual terminó, ya sea de forma natural o por `stop`
    TrackFinished,
    /// La conexión de voz se perdió
    Disconnected,
}

pub type PlayerEvents = mpsc::UnboundedSender<PlayerEvent>;

/// Nodo del reproductor externo capaz de abrir conexiones de voz.
#[async_trait]
pub trait PlayerNode: Send + Sync {
    /// Conecta al canal y entrega los eventos del reproductor en `events`.
    ///
    /// Un `stop` explícito debe producir un [`PlayerEvent::TrackFinished`],
    /// igual que el final natural de un track.
    async fn connect(
        &self,
        guild_id: GuildId,
        channel: ChannelId,
        events: PlayerEvents,
    ) -> Result<Arc<dyn PlayerConnection>>;
}

/// Superficie de control de una conexión activa.
#[async_trait]
pub trait PlayerConnection: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn disconnect(&self) -> Result<()>;
    async fn play(&self, track: &Track) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn seek(&self, position: Duration) -> Result<()>;
    async fn set_volume(&self, volume: u8) -> Result<()>;
    async fn position(&self) -> Duration;
}

/// Estado de la conexión de una sesión con el reproductor
#[derive(Clone, Default)]
pub enum PlayerBinding {
    #[default]
    Disconnected,
    Connected(Arc<dyn PlayerConnection>),
}

impl PlayerBinding {
    /// Conexión utilizable, si la hay y sigue viva
    pub fn active(&self) -> Option<Arc<dyn PlayerConnection>> {
        match self {
            PlayerBinding::Connected(conn) if conn.is_connected() => Some(conn.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for PlayerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerBinding::Disconnected => write!(f, "Disconnected"),
            PlayerBinding::Connected(conn) => write!(f, "Connected(alive: {})", conn.is_connected()),
        }
    }
}

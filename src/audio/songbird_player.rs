use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{Input, YoutubeDl},
    tracks::TrackHandle,
    Call, CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::persistence::DEFAULT_VOLUME;
use super::player::{PlayerConnection, PlayerEvent, PlayerEvents, PlayerNode};
use super::track::Track;
use crate::error::{MusicError, Result};

/// Nodo de reproducción sobre songbird
pub struct SongbirdNode {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdNode {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PlayerNode for SongbirdNode {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel: ChannelId,
        events: PlayerEvents,
    ) -> Result<Arc<dyn PlayerConnection>> {
        let call = self
            .manager
            .join(guild_id, channel)
            .await
            .map_err(|e| MusicError::Transport(format!("no se pudo unir al canal {}: {:?}", channel, e)))?;

        let connected = Arc::new(AtomicBool::new(true));
        {
            let mut handler = call.lock().await;
            // Una llamada reutilizada conserva los handlers de la conexión anterior
            handler.remove_all_global_events();
            handler.add_global_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    events: events.clone(),
                },
            );
            handler.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DisconnectNotifier {
                    events,
                    connected: connected.clone(),
                },
            );
        }

        info!("🔗 Songbird conectado al canal {} en guild {}", channel, guild_id);
        Ok(Arc::new(SongbirdConnection {
            manager: self.manager.clone(),
            http: self.http.clone(),
            guild_id,
            call,
            current: SyncMutex::new(None),
            volume: AtomicU8::new(DEFAULT_VOLUME),
            connected,
        }))
    }
}

/// Conexión de voz de una guild
pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    current: SyncMutex<Option<TrackHandle>>,
    volume: AtomicU8,
    connected: Arc<AtomicBool>,
}

impl SongbirdConnection {
    fn current(&self) -> Option<TrackHandle> {
        self.current.lock().clone()
    }

    fn gain(&self) -> f32 {
        self.volume.load(Ordering::SeqCst) as f32 / 100.0
    }
}

fn control_error(e: impl std::fmt::Debug) -> MusicError {
    MusicError::Transport(format!("{:?}", e))
}

#[async_trait]
impl PlayerConnection for SongbirdConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.current.lock().take();
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| MusicError::Transport(format!("no se pudo salir de la guild {}: {:?}", self.guild_id, e)))
    }

    async fn play(&self, track: &Track) -> Result<()> {
        let input: Input = YoutubeDl::new(self.http.clone(), track.url().to_string()).into();

        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input)
        };
        handle.set_volume(self.gain()).map_err(control_error)?;

        *self.current.lock() = Some(handle);
        debug!("🎵 Songbird reproduciendo {} en guild {}", track.title(), self.guild_id);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let handle = self.current.lock().take();
        if let Some(handle) = handle {
            handle.stop().map_err(control_error)?;
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        if let Some(handle) = self.current() {
            handle.pause().map_err(control_error)?;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        if let Some(handle) = self.current() {
            handle.play().map_err(control_error)?;
        }
        Ok(())
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        if let Some(handle) = self.current() {
            handle.seek_async(position).await.map_err(control_error)?;
        }
        Ok(())
    }

    async fn set_volume(&self, volume: u8) -> Result<()> {
        self.volume.store(volume, Ordering::SeqCst);
        if let Some(handle) = self.current() {
            handle.set_volume(self.gain()).map_err(control_error)?;
        }
        Ok(())
    }

    async fn position(&self) -> Duration {
        match self.current() {
            Some(handle) => handle.get_info().await.map(|state| state.position).unwrap_or_default(),
            None => Duration::ZERO,
        }
    }
}

/// Reenvía el fin de cada track a la sesión
struct TrackEndNotifier {
    events: PlayerEvents,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("Track terminado, notificando a la sesión");
        let _ = self.events.send(PlayerEvent::TrackFinished);
        None
    }
}

struct DisconnectNotifier {
    events: PlayerEvents,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceEventHandler for DisconnectNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        warn!("🔌 Driver de voz desconectado");
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(PlayerEvent::Disconnected);
        None
    }
}

//! Fakes compartidos por los tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crate::audio::persistence::MemberResolver;
use crate::audio::player::{PlayerConnection, PlayerEvent, PlayerEvents, PlayerNode};
use crate::audio::shuffle::RandomSource;
use crate::audio::track::{Requester, Track, TrackItem};
use crate::error::{MusicError, Result};

pub fn requester(id: u64) -> Requester {
    Requester::new(UserId::new(id), format!("user-{id}"))
}

pub fn item_by(title: &str, user: u64) -> TrackItem {
    TrackItem::new(
        Track::new(title, format!("https://example.com/{title}")),
        requester(user),
    )
}

pub fn item(title: &str) -> TrackItem {
    item_by(title, 1)
}

pub fn titles(items: &[TrackItem]) -> Vec<String> {
    items.iter().map(|i| i.track().title().to_string()).collect()
}

/// Siempre devuelve el mismo valor, acotado al rango
pub struct FixedRandom(pub usize);

impl RandomSource for FixedRandom {
    fn next_below(&self, bound: usize) -> usize {
        self.0.min(bound.saturating_sub(1))
    }
}

/// Resuelve cualquier id a un miembro sintético
pub struct AnyMember;

#[async_trait]
impl MemberResolver for AnyMember {
    async fn resolve(&self, _guild_id: GuildId, user_id: UserId) -> Result<Requester> {
        Ok(requester(user_id.get()))
    }
}

/// Conexión falsa que registra cada llamada
pub struct FakeConnection {
    pub calls: Mutex<Vec<String>>,
    pub connected: AtomicBool,
    pub fail_play: AtomicBool,
    pub finish_on_stop: bool,
    pub position: Duration,
    events: PlayerEvents,
}

impl FakeConnection {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Simula el final natural del track actual
    pub fn finish_track(&self) {
        let _ = self.events.send(PlayerEvent::TrackFinished);
    }

    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(PlayerEvent::Disconnected);
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PlayerConnection for FakeConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.record("disconnect".into());
        Ok(())
    }

    async fn play(&self, track: &Track) -> Result<()> {
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(MusicError::Transport("nodo caído".into()));
        }
        self.record(format!("play {}", track.title()));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop".into());
        if self.finish_on_stop {
            self.finish_track();
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.record("pause".into());
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.record("resume".into());
        Ok(())
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        self.record(format!("seek {}", position.as_secs()));
        Ok(())
    }

    async fn set_volume(&self, volume: u8) -> Result<()> {
        self.record(format!("volume {volume}"));
        Ok(())
    }

    async fn position(&self) -> Duration {
        self.position
    }
}

/// Nodo falso; guarda la última conexión abierta
#[derive(Default)]
pub struct FakeNode {
    pub finish_on_stop: bool,
    pub position: Duration,
    pub connects: Mutex<Vec<ChannelId>>,
    pub last: Mutex<Option<Arc<FakeConnection>>>,
}

impl FakeNode {
    pub fn connection(&self) -> Arc<FakeConnection> {
        self.last.lock().clone().expect("no se abrió ninguna conexión")
    }
}

#[async_trait]
impl PlayerNode for FakeNode {
    async fn connect(
        &self,
        _guild_id: GuildId,
        channel: ChannelId,
        events: PlayerEvents,
    ) -> Result<Arc<dyn PlayerConnection>> {
        let conn = Arc::new(FakeConnection {
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            fail_play: AtomicBool::new(false),
            finish_on_stop: self.finish_on_stop,
            position: self.position,
            events,
        });
        self.connects.lock().push(channel);
        *self.last.lock() = Some(conn.clone());
        Ok(conn)
    }
}

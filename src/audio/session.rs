use parking_lot::{Mutex, RwLock};
use serenity::model::id::{ChannelId, GuildId};
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use super::persistence::{MemberResolver, SessionSnapshot, StoredItem, DEFAULT_VOLUME};
use super::player::{PlayerBinding, PlayerConnection, PlayerEvent, PlayerNode};
use super::queue::{MusicQueue, RepeatMode};
use super::shuffle::RandomSource;
use super::track::TrackItem;
use crate::error::Result;
use crate::storage::StateStore;

/// Colaboradores compartidos por todas las sesiones
#[derive(Clone)]
pub struct SessionContext {
    pub node: Arc<dyn PlayerNode>,
    pub store: Arc<dyn StateStore>,
    pub members: Arc<dyn MemberResolver>,
    pub rng: Arc<dyn RandomSource>,
    /// Espera antes de avanzar tras un fin de track
    pub advance_delay: Duration,
}

#[derive(Debug, Clone)]
struct PlaybackState {
    repeat_mode: RepeatMode,
    is_shuffled: bool,
    is_playing: bool,
    volume: u8,
    now_playing: Option<TrackItem>,
    // Stops enviados cuyo fin de track aún no llegó
    pending_stops: u32,
    // Fines de track que ya no deben avanzar la cola
    stale_finishes: u32,
}

impl PlaybackState {
    fn reset_playback(&mut self) {
        self.is_playing = false;
        self.now_playing = None;
        self.pending_stops = 0;
        self.stale_finishes = 0;
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            repeat_mode: RepeatMode::None,
            is_shuffled: false,
            is_playing: false,
            volume: DEFAULT_VOLUME,
            now_playing: None,
            pending_stops: 0,
            stale_finishes: 0,
        }
    }
}

/// Destino de [`Session::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    Absolute(Duration),
    Forward(Duration),
    Back(Duration),
}

/// Sesión de reproducción de una guild.
///
/// Las operaciones de control son no-ops mientras no haya una conexión activa
/// con el reproductor. Los ajustes escalares se asumen serializados por la capa
/// de comandos; la cola tiene su propio mutex.
pub struct Session {
    guild_id: GuildId,
    queue: MusicQueue,
    state: Mutex<PlaybackState>,
    binding: RwLock<PlayerBinding>,
    // Serializa todo lo que puede avanzar la cola: órdenes y fines de track
    advance_lock: AsyncMutex<()>,
    // Cada conexión nueva invalida los eventos de la anterior
    generation: AtomicU64,
    ctx: SessionContext,
}

impl Session {
    pub fn new(guild_id: GuildId, ctx: SessionContext) -> Arc<Self> {
        Arc::new(Self {
            guild_id,
            queue: MusicQueue::new(ctx.rng.clone()),
            state: Mutex::new(PlaybackState::default()),
            binding: RwLock::new(PlayerBinding::Disconnected),
            advance_lock: AsyncMutex::new(()),
            generation: AtomicU64::new(0),
            ctx,
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    // Lectura de estado

    pub fn repeat_mode(&self) -> RepeatMode {
        self.state.lock().repeat_mode
    }

    pub fn is_shuffled(&self) -> bool {
        self.state.lock().is_shuffled
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().is_playing
    }

    pub fn volume(&self) -> u8 {
        self.state.lock().volume
    }

    pub fn now_playing(&self) -> Option<TrackItem> {
        self.state.lock().now_playing.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_some()
    }

    /// Copia de la cola pendiente
    pub async fn queue(&self) -> Vec<TrackItem> {
        self.queue.snapshot().await
    }

    /// Sin reproductor y sin nada en cola
    pub async fn is_inactive(&self) -> bool {
        !self.is_connected() && self.queue.is_empty().await
    }

    /// Como [`Session::is_inactive`] pero sin esperar; una cola bloqueada cuenta como ocupada
    pub(crate) fn is_inactive_now(&self) -> bool {
        !self.is_connected() && self.queue.try_is_empty().unwrap_or(false)
    }

    // Persistencia

    /// Guarda ajustes y cola en el almacenamiento
    pub async fn save(&self) -> Result<()> {
        let queue = self
            .queue
            .snapshot()
            .await
            .iter()
            .map(StoredItem::from_item)
            .collect::<Result<Vec<_>>>()?;
        let snapshot = {
            let state = self.state.lock();
            SessionSnapshot {
                repeat_mode: state.repeat_mode,
                is_shuffled: state.is_shuffled,
                volume: state.volume,
                queue,
            }
        };

        snapshot.save(self.ctx.store.as_ref(), &self.entity()).await
    }

    /// Restaura ajustes y cola guardados; no hay carga parcial
    pub async fn load(&self) -> Result<()> {
        let snapshot = SessionSnapshot::load(self.ctx.store.as_ref(), &self.entity()).await?;
        let items = snapshot
            .resolve_queue(self.guild_id, self.ctx.members.as_ref())
            .await?;

        {
            let mut state = self.state.lock();
            state.repeat_mode = snapshot.repeat_mode;
            state.is_shuffled = snapshot.is_shuffled;
            state.volume = snapshot.volume;
        }
        let count = items.len();
        self.queue.replace(items).await;

        info!("📂 Sesión restaurada para guild {} ({} tracks)", self.guild_id, count);
        Ok(())
    }

    // Cola

    /// Agrega un track a la cola
    pub async fn enqueue(&self, item: TrackItem) {
        let (mode, shuffled) = self.with_state(|s| (s.repeat_mode, s.is_shuffled));
        info!("➕ Agregado a la cola de guild {}: {}", self.guild_id, item.track().title());
        self.queue.enqueue(item, mode, shuffled).await;
    }

    /// Elimina el track en `index`; `None` si está fuera de rango
    pub async fn remove(&self, index: usize) -> Option<TrackItem> {
        self.queue.remove(index).await
    }

    pub async fn empty_queue(&self) -> usize {
        self.queue.empty().await
    }

    /// Activa el modo aleatorio y mezcla la cola
    pub async fn shuffle(&self) {
        let was_shuffled = self.with_state(|s| std::mem::replace(&mut s.is_shuffled, true));
        if was_shuffled {
            return;
        }
        self.queue.reshuffle().await;
    }

    pub async fn reshuffle(&self) {
        self.queue.reshuffle().await;
    }

    /// Desactiva el modo aleatorio sin reordenar
    pub fn stop_shuffle(&self) {
        self.with_state(|s| s.is_shuffled = false);
        info!("➡️ Modo aleatorio desactivado en guild {}", self.guild_id);
    }

    /// Cambia el modo de repetición y ajusta la cabeza de la cola
    pub async fn set_repeat_mode(&self, mode: RepeatMode) {
        let (previous, now_playing) = self.with_state(|s| {
            let previous = std::mem::replace(&mut s.repeat_mode, mode);
            (previous, s.now_playing.clone())
        });

        if let Some(current) = now_playing {
            self.queue.reconcile_repeat(previous, mode, &current).await;
        }

        match mode {
            RepeatMode::None => info!("➡️ Repetición desactivada en guild {}", self.guild_id),
            RepeatMode::Single => info!("🔂 Repetir canción activado en guild {}", self.guild_id),
            RepeatMode::All => info!("🔁 Repetir cola activado en guild {}", self.guild_id),
        }
    }

    // Reproductor

    /// Conecta al canal de voz; no hace nada si ya hay conexión
    pub async fn create_player(self: &Arc<Self>, channel: ChannelId) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let (events, rx) = mpsc::unbounded_channel();
        let conn = self.ctx.node.connect(self.guild_id, channel, events).await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.binding.write() = PlayerBinding::Connected(conn.clone());
        // Los eventos de la conexión caída ya no llegan
        self.recover_cut_track(false).await;
        self.spawn_event_pump(rx, generation);
        info!("🔗 Reproductor conectado al canal {} en guild {}", channel, self.guild_id);

        let volume = self.volume();
        if volume != DEFAULT_VOLUME {
            conn.set_volume(volume).await?;
        }
        Ok(())
    }

    /// Desconecta el reproductor y guarda el estado
    pub async fn destroy_player(&self) -> Result<()> {
        let binding = std::mem::take(&mut *self.binding.write());
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.with_state(PlaybackState::reset_playback);

        let disconnected = match binding {
            PlayerBinding::Connected(conn) if conn.is_connected() => conn.disconnect().await,
            _ => Ok(()),
        };
        info!("👋 Reproductor destruido en guild {}", self.guild_id);

        self.save().await?;
        disconnected
    }

    /// Empieza a reproducir si no hay nada sonando
    pub async fn play(&self) -> Result<()> {
        let Some(conn) = self.connection() else {
            return Ok(());
        };
        let _advancing = self.advance_lock.lock().await;
        let started = self.with_state(|s| {
            if s.now_playing.is_some() {
                return false;
            }
            // Este avance reemplaza al que harían los stops pendientes
            s.stale_finishes += std::mem::take(&mut s.pending_stops);
            true
        });
        if !started {
            return Ok(());
        }
        self.advance(&conn).await
    }

    pub async fn pause(&self) -> Result<()> {
        let Some(conn) = self.connection() else {
            return Ok(());
        };
        self.with_state(|s| s.is_playing = false);
        conn.pause().await?;
        info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let Some(conn) = self.connection() else {
            return Ok(());
        };
        self.with_state(|s| s.is_playing = true);
        conn.resume().await?;
        info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
        Ok(())
    }

    /// Detiene el track actual.
    ///
    /// El reproductor informa el fin del track, así que la cola avanza sola.
    pub async fn stop(&self) -> Result<()> {
        let Some(conn) = self.connection() else {
            return Ok(());
        };
        let _advancing = self.advance_lock.lock().await;
        let was_playing = self.with_state(|s| {
            s.is_playing = false;
            let was_playing = s.now_playing.take().is_some();
            if was_playing {
                s.pending_stops += 1;
            }
            was_playing
        });
        if let Err(e) = conn.stop().await {
            if was_playing {
                self.with_state(|s| s.pending_stops = s.pending_stops.saturating_sub(1));
            }
            return Err(e);
        }
        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
        Ok(())
    }

    /// Salta al siguiente track de la cola
    pub async fn skip(&self) -> Result<()> {
        self.stop().await
    }

    /// Vuelve a empezar el track actual.
    ///
    /// Reencola el track en la cabeza y detiene el reproductor con el mutex de
    /// la cola tomado; el fin de track lo vuelve a sacar.
    pub async fn restart(&self) -> Result<()> {
        let Some(conn) = self.connection() else {
            return Ok(());
        };
        let _advancing = self.advance_lock.lock().await;
        let (mode, current) = self.with_state(|s| (s.repeat_mode, s.now_playing.clone()));
        let Some(current) = current else {
            return Ok(());
        };

        let mut items = self.queue.lock().await;
        requeue_front(&mut items, mode, &current);
        self.with_state(|s| s.pending_stops += 1);
        if let Err(e) = conn.stop().await {
            self.with_state(|s| s.pending_stops = s.pending_stops.saturating_sub(1));
            return Err(e);
        }
        drop(items);

        info!("⏮️ Reiniciando {} en guild {}", current.track().title(), self.guild_id);
        Ok(())
    }

    /// Busca una posición absoluta o relativa a la actual; hacia atrás no baja de cero
    pub async fn seek(&self, target: SeekTarget) -> Result<()> {
        let Some(conn) = self.connection() else {
            return Ok(());
        };
        let position = match target {
            SeekTarget::Absolute(position) => position,
            SeekTarget::Forward(offset) => conn.position().await.saturating_add(offset),
            SeekTarget::Back(offset) => conn.position().await.saturating_sub(offset),
        };
        conn.seek(position).await?;
        debug!("⏩ Posición {:?} en guild {}", position, self.guild_id);
        Ok(())
    }

    /// Ajusta el volumen (0-100); se guarda aunque el reproductor falle
    pub async fn set_volume(&self, volume: u8) -> Result<()> {
        let Some(conn) = self.connection() else {
            return Ok(());
        };
        let volume = volume.min(100);
        self.with_state(|s| s.volume = volume);
        conn.set_volume(volume).await?;
        info!("🔊 Volumen ajustado a {}% en guild {}", volume, self.guild_id);
        Ok(())
    }

    /// Posición en el track actual, cero si no suena nada
    pub async fn current_position(&self) -> Duration {
        if self.now_playing().is_none() {
            return Duration::ZERO;
        }
        match self.connection() {
            Some(conn) => conn.position().await,
            None => Duration::ZERO,
        }
    }

    // Eventos del reproductor

    fn spawn_event_pump(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<PlayerEvent>, generation: u64) {
        let session: Weak<Session> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                if session.generation.load(Ordering::SeqCst) != generation {
                    debug!("Evento {:?} de una conexión anterior, ignorado", event);
                    break;
                }
                session.handle_event(event).await;
            }
        });
    }

    pub(crate) async fn handle_event(&self, event: PlayerEvent) {
        match event {
            PlayerEvent::TrackFinished => self.on_track_finished().await,
            PlayerEvent::Disconnected => self.on_disconnected().await,
        }
    }

    async fn on_disconnected(&self) {
        warn!("🔌 Conexión de voz perdida en guild {}", self.guild_id);
        if !self.recover_cut_track(true).await {
            return;
        }
        if let Err(e) = self.save().await {
            error!("Error al guardar estado de guild {}: {:?}", self.guild_id, e);
        }
    }

    /// El track cortado vuelve a la cabeza para sonar al reconectar.
    ///
    /// Con `only_if_disconnected` no hace nada si ya hay otra conexión viva.
    async fn recover_cut_track(&self, only_if_disconnected: bool) -> bool {
        let _advancing = self.advance_lock.lock().await;
        if only_if_disconnected && self.connection().is_some() {
            return false;
        }
        let (mode, current) = self.with_state(|s| {
            let current = s.now_playing.clone();
            s.reset_playback();
            (s.repeat_mode, current)
        });

        if let Some(current) = current {
            requeue_front(&mut *self.queue.lock().await, mode, &current);
        }
        true
    }

    /// Avance automático; los errores se registran y la sesión queda en reposo
    async fn on_track_finished(&self) {
        tokio::time::sleep(self.ctx.advance_delay).await;

        let advancing = self.advance_lock.lock().await;
        let stale = self.with_state(|s| {
            if s.stale_finishes > 0 {
                s.stale_finishes -= 1;
                return true;
            }
            s.pending_stops = s.pending_stops.saturating_sub(1);
            s.is_playing = false;
            false
        });
        if stale {
            debug!("Fin de track ya atendido en guild {}, ignorado", self.guild_id);
            return;
        }

        match self.connection() {
            Some(conn) => {
                if let Err(e) = self.advance(&conn).await {
                    error!("Error al reproducir siguiente track en guild {}: {:?}", self.guild_id, e);
                }
            }
            None => self.with_state(|s| s.now_playing = None),
        }
        drop(advancing);

        if let Err(e) = self.save().await {
            error!("Error al guardar estado de guild {}: {:?}", self.guild_id, e);
        }
    }

    /// Saca el siguiente track y lo manda al reproductor
    async fn advance(&self, conn: &Arc<dyn PlayerConnection>) -> Result<()> {
        let mode = self.repeat_mode();
        let Some(next) = self.queue.dequeue(mode).await else {
            self.with_state(|s| {
                s.now_playing = None;
                s.is_playing = false;
            });
            info!("📭 Cola vacía en guild {}", self.guild_id);
            return Ok(());
        };

        self.with_state(|s| {
            s.now_playing = Some(next.clone());
            s.is_playing = true;
        });

        if let Err(e) = conn.play(next.track()).await {
            self.with_state(|s| {
                s.now_playing = None;
                s.is_playing = false;
            });
            return Err(e);
        }

        info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, next.track().title());
        Ok(())
    }

    // Funciones privadas

    fn connection(&self) -> Option<Arc<dyn PlayerConnection>> {
        self.binding.read().active()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut PlaybackState) -> R) -> R {
        f(&mut self.state.lock())
    }

    fn entity(&self) -> String {
        self.guild_id.get().to_string()
    }
}

/// Devuelve `current` a la cabeza de la cola sin duplicarlo
fn requeue_front(items: &mut VecDeque<TrackItem>, mode: RepeatMode, current: &TrackItem) {
    match mode {
        // En Single la cabeza ya es el track actual
        RepeatMode::Single if items.front() == Some(current) => {}
        // En All el track actual quedó al final al sacarlo
        RepeatMode::All if items.back() == Some(current) => {
            if let Some(last) = items.pop_back() {
                items.push_front(last);
            }
        }
        _ => items.push_front(current.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::shuffle::SecureRandom;
    use crate::storage::MemoryStore;
    use crate::testing::{item, item_by, titles, AnyMember, FakeNode};
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(4242);
    const CHANNEL: ChannelId = ChannelId::new(99);

    struct Harness {
        node: Arc<FakeNode>,
        store: Arc<MemoryStore>,
        session: Arc<Session>,
    }

    fn harness_with(node: FakeNode) -> Harness {
        harness_delayed(node, Duration::ZERO)
    }

    fn harness_delayed(node: FakeNode, advance_delay: Duration) -> Harness {
        let node = Arc::new(node);
        let store = Arc::new(MemoryStore::new());
        let ctx = SessionContext {
            node: node.clone(),
            store: store.clone(),
            members: Arc::new(AnyMember),
            rng: Arc::new(SecureRandom),
            advance_delay,
        };
        Harness {
            node,
            store,
            session: Session::new(GUILD, ctx),
        }
    }

    fn harness() -> Harness {
        harness_with(FakeNode::default())
    }

    /// Espera a que la bomba de eventos procese lo pendiente
    async fn settle<F: Fn() -> bool>(done: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("la sesión no llegó al estado esperado");
    }

    #[tokio::test]
    async fn test_end_to_end_single_track() {
        let h = harness();
        h.session.enqueue(item("a")).await;
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();

        assert_eq!(h.session.now_playing(), Some(item("a")));
        assert!(h.session.queue().await.is_empty());
        assert!(h.session.is_playing());

        h.node.connection().finish_track();
        let session = h.session.clone();
        settle(move || session.now_playing().is_none()).await;

        assert!(!h.session.is_playing());
        assert_eq!(h.node.connection().calls(), vec!["play a"]);
    }

    #[tokio::test]
    async fn test_completion_advances_and_saves() {
        let h = harness();
        for name in ["a", "b"] {
            h.session.enqueue(item(name)).await;
        }
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();

        h.node.connection().finish_track();
        let session = h.session.clone();
        settle(move || session.now_playing() == Some(item("b"))).await;

        assert!(h.session.is_playing());
        assert_eq!(h.node.connection().calls(), vec!["play a", "play b"]);
        // El snapshot se escribe después de avanzar
        let entity = GUILD.get().to_string();
        tokio::time::timeout(Duration::from_secs(2), async {
            while h.store.get_field(&entity, "queue").await.unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no se guardó el estado");
    }

    #[tokio::test]
    async fn test_controls_are_noops_without_player() {
        let h = harness();
        h.session.enqueue(item("a")).await;

        h.session.play().await.unwrap();
        h.session.pause().await.unwrap();
        h.session.resume().await.unwrap();
        h.session.stop().await.unwrap();
        h.session.restart().await.unwrap();
        h.session.seek(SeekTarget::Forward(Duration::from_secs(10))).await.unwrap();
        h.session.set_volume(30).await.unwrap();

        assert_eq!(h.session.now_playing(), None);
        assert!(!h.session.is_playing());
        assert_eq!(h.session.volume(), 100);
        assert_eq!(h.session.queue().await.len(), 1);
        assert_eq!(h.session.current_position().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_controls_are_noops_after_connection_drops() {
        let h = harness();
        h.session.enqueue(item("a")).await;
        h.session.create_player(CHANNEL).await.unwrap();
        h.node.connection().drop_connection();

        assert!(!h.session.is_connected());
        h.session.play().await.unwrap();
        h.session.set_volume(10).await.unwrap();
        assert!(h.node.connection().calls().is_empty());
        assert_eq!(h.session.queue().await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_player_is_idempotent_and_reapplies_volume() {
        let h = harness();
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.set_volume(40).await.unwrap();
        h.session.create_player(ChannelId::new(100)).await.unwrap();
        assert_eq!(h.node.connects.lock().len(), 1);

        h.session.destroy_player().await.unwrap();
        assert!(!h.session.is_connected());
        assert_eq!(h.node.connection().calls(), vec!["volume 40", "disconnect"]);

        h.session.create_player(CHANNEL).await.unwrap();
        assert_eq!(h.node.connects.lock().len(), 2);
        assert_eq!(h.node.connection().calls(), vec!["volume 40"]);
    }

    #[tokio::test]
    async fn test_default_volume_not_sent_on_connect() {
        let h = harness();
        h.session.create_player(CHANNEL).await.unwrap();
        assert!(h.node.connection().calls().is_empty());
    }

    #[tokio::test]
    async fn test_volume_is_clamped() {
        let h = harness();
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.set_volume(250).await.unwrap();
        assert_eq!(h.session.volume(), 100);
    }

    #[tokio::test]
    async fn test_pause_resume_toggle_playing() {
        let h = harness();
        h.session.enqueue(item("a")).await;
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();

        h.session.pause().await.unwrap();
        assert!(!h.session.is_playing());
        h.session.resume().await.unwrap();
        assert!(h.session.is_playing());
        assert_eq!(h.node.connection().calls(), vec!["play a", "pause", "resume"]);
    }

    #[tokio::test]
    async fn test_play_while_playing_does_nothing() {
        let h = harness();
        for name in ["a", "b"] {
            h.session.enqueue(item(name)).await;
        }
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();
        h.session.play().await.unwrap();

        assert_eq!(h.node.connection().calls(), vec!["play a"]);
        assert_eq!(titles(&h.session.queue().await), vec!["b"]);
    }

    #[tokio::test]
    async fn test_play_with_empty_queue_stays_idle() {
        let h = harness();
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();
        assert_eq!(h.session.now_playing(), None);
        assert!(!h.session.is_playing());
    }

    #[tokio::test]
    async fn test_skip_moves_to_next_track() {
        let h = harness_with(FakeNode {
            finish_on_stop: true,
            ..FakeNode::default()
        });
        for name in ["a", "b"] {
            h.session.enqueue(item(name)).await;
        }
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();
        h.session.skip().await.unwrap();

        let session = h.session.clone();
        settle(move || session.now_playing() == Some(item("b"))).await;
        assert_eq!(h.node.connection().calls(), vec!["play a", "stop", "play b"]);
    }

    #[tokio::test]
    async fn test_play_after_stop_advances_once() {
        let h = harness_delayed(
            FakeNode {
                finish_on_stop: true,
                ..FakeNode::default()
            },
            Duration::from_millis(100),
        );
        for name in ["a", "b", "c"] {
            h.session.enqueue(item(name)).await;
        }
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();

        // El fin de track del stop llega mientras ya suena b
        h.session.stop().await.unwrap();
        h.session.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(h.node.connection().calls(), vec!["play a", "stop", "play b"]);
        assert_eq!(h.session.now_playing(), Some(item("b")));
        assert!(h.session.is_playing());
        assert_eq!(titles(&h.session.queue().await), vec!["c"]);

        // El siguiente fin natural sigue avanzando
        h.node.connection().finish_track();
        let session = h.session.clone();
        settle(move || session.now_playing() == Some(item("c"))).await;
        assert_eq!(
            h.node.connection().calls(),
            vec!["play a", "stop", "play b", "play c"]
        );
    }

    #[tokio::test]
    async fn test_reconnect_after_drop_replays_cut_track() {
        let h = harness();
        for name in ["a", "b"] {
            h.session.enqueue(item(name)).await;
        }
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();

        h.node.connection().drop_connection();
        tokio::time::timeout(Duration::from_secs(2), async {
            while h.session.queue().await.len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("el track cortado no volvió a la cola");
        assert_eq!(h.session.now_playing(), None);
        assert!(!h.session.is_playing());
        assert_eq!(titles(&h.session.queue().await), vec!["a", "b"]);

        h.session.create_player(CHANNEL).await.unwrap();
        assert_eq!(h.node.connects.lock().len(), 2);
        h.session.play().await.unwrap();

        assert_eq!(h.node.connection().calls(), vec!["play a"]);
        assert_eq!(h.session.now_playing(), Some(item("a")));
        assert!(h.session.is_playing());
        assert_eq!(titles(&h.session.queue().await), vec!["b"]);
    }

    #[tokio::test]
    async fn test_immediate_reconnect_after_drop_replays_cut_track() {
        let h = harness();
        for name in ["a", "b"] {
            h.session.enqueue(item(name)).await;
        }
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();

        // Reconecta antes de que se procese el aviso de desconexión
        h.node.connection().drop_connection();
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.node.connection().calls(), vec!["play a"]);
        assert_eq!(h.session.now_playing(), Some(item("a")));
        assert_eq!(titles(&h.session.queue().await), vec!["b"]);
    }

    #[tokio::test]
    async fn test_stop_clears_now_playing() {
        let h = harness();
        h.session.enqueue(item("a")).await;
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();
        h.session.stop().await.unwrap();

        assert_eq!(h.session.now_playing(), None);
        assert!(!h.session.is_playing());
    }

    #[tokio::test]
    async fn test_restart_replays_current_track() {
        let h = harness_with(FakeNode {
            finish_on_stop: true,
            ..FakeNode::default()
        });
        for name in ["a", "b"] {
            h.session.enqueue(item(name)).await;
        }
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();
        h.session.restart().await.unwrap();

        let conn = h.node.connection();
        settle(move || conn.calls().len() == 3).await;
        assert_eq!(h.node.connection().calls(), vec!["play a", "stop", "play a"]);
        assert_eq!(h.session.now_playing(), Some(item("a")));
        assert_eq!(titles(&h.session.queue().await), vec!["b"]);
    }

    #[tokio::test]
    async fn test_restart_under_repeat_modes_keeps_queue_shape() {
        for mode in [RepeatMode::Single, RepeatMode::All] {
            let h = harness_with(FakeNode {
                finish_on_stop: true,
                ..FakeNode::default()
            });
            for name in ["a", "b"] {
                h.session.enqueue(item(name)).await;
            }
            h.session.set_repeat_mode(mode).await;
            h.session.create_player(CHANNEL).await.unwrap();
            h.session.play().await.unwrap();
            let before = titles(&h.session.queue().await);

            h.session.restart().await.unwrap();
            let conn = h.node.connection();
            settle(move || conn.calls().len() == 3).await;

            assert_eq!(h.session.now_playing(), Some(item("a")));
            assert_eq!(titles(&h.session.queue().await), before, "modo {:?}", mode);
        }
    }

    #[tokio::test]
    async fn test_restart_without_track_is_noop() {
        let h = harness();
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.restart().await.unwrap();
        assert!(h.node.connection().calls().is_empty());
    }

    #[tokio::test]
    async fn test_seek_targets_relative_to_position() {
        let h = harness_with(FakeNode {
            position: Duration::from_secs(30),
            ..FakeNode::default()
        });
        h.session.enqueue(item("a")).await;
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();

        h.session.seek(SeekTarget::Forward(Duration::from_secs(15))).await.unwrap();
        h.session.seek(SeekTarget::Back(Duration::from_secs(10))).await.unwrap();
        h.session.seek(SeekTarget::Absolute(Duration::from_secs(5))).await.unwrap();
        assert_eq!(
            h.node.connection().calls(),
            vec!["play a", "seek 45", "seek 20", "seek 5"]
        );
        assert_eq!(h.session.current_position().await, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_seek_saturates_at_both_ends() {
        let h = harness_with(FakeNode {
            position: Duration::from_secs(30),
            ..FakeNode::default()
        });
        h.session.enqueue(item("a")).await;
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();

        h.session.seek(SeekTarget::Back(Duration::from_secs(90))).await.unwrap();
        h.session.seek(SeekTarget::Forward(Duration::MAX)).await.unwrap();
        assert_eq!(
            h.node.connection().calls(),
            vec!["play a".to_string(), "seek 0".to_string(), format!("seek {}", u64::MAX)]
        );
    }

    #[tokio::test]
    async fn test_repeat_single_toggle_while_playing() {
        let h = harness();
        for name in ["a", "b"] {
            h.session.enqueue(item(name)).await;
        }
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();

        h.session.set_repeat_mode(RepeatMode::Single).await;
        h.session.set_repeat_mode(RepeatMode::Single).await;
        assert_eq!(titles(&h.session.queue().await), vec!["a", "b"]);

        h.session.set_repeat_mode(RepeatMode::None).await;
        assert_eq!(titles(&h.session.queue().await), vec!["b"]);
    }

    #[tokio::test]
    async fn test_repeat_single_replays_on_completion() {
        let h = harness();
        for name in ["a", "b"] {
            h.session.enqueue(item(name)).await;
        }
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();
        h.session.set_repeat_mode(RepeatMode::Single).await;

        h.node.connection().finish_track();
        let conn = h.node.connection();
        settle(move || conn.calls().len() == 2).await;
        assert_eq!(h.node.connection().calls(), vec!["play a", "play a"]);
    }

    #[tokio::test]
    async fn test_shuffle_is_idempotent_and_stop_keeps_order() {
        let h = harness();
        for i in 0..10 {
            h.session.enqueue(item(&format!("t{i}"))).await;
        }

        h.session.shuffle().await;
        assert!(h.session.is_shuffled());
        let shuffled = titles(&h.session.queue().await);

        h.session.shuffle().await;
        assert_eq!(titles(&h.session.queue().await), shuffled);

        h.session.stop_shuffle();
        assert!(!h.session.is_shuffled());
        h.session.enqueue(item("last")).await;
        let after = titles(&h.session.queue().await);
        assert_eq!(&after[..10], &shuffled[..]);
        assert_eq!(after[10], "last");
    }

    #[tokio::test]
    async fn test_failed_play_falls_back_to_idle() {
        let h = harness();
        for name in ["a", "b"] {
            h.session.enqueue(item(name)).await;
        }
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();

        let conn = h.node.connection();
        conn.fail_play.store(true, Ordering::SeqCst);
        conn.finish_track();

        let session = h.session.clone();
        settle(move || session.now_playing().is_none()).await;
        assert!(!h.session.is_playing());
        assert!(h.session.is_connected());

        // Una orden explícita propaga el error
        h.session.enqueue(item("c")).await;
        assert!(h.session.play().await.is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_restore_settings_and_queue() {
        let h = harness();
        h.session.enqueue(item_by("a", 3)).await;
        h.session.enqueue(item_by("b", 4)).await;
        h.session.set_repeat_mode(RepeatMode::All).await;
        h.session.create_player(CHANNEL).await.unwrap();
        h.session.set_volume(70).await.unwrap();
        h.session.destroy_player().await.unwrap();

        let ctx = SessionContext {
            node: h.node.clone(),
            store: h.store.clone(),
            members: Arc::new(AnyMember),
            rng: Arc::new(SecureRandom),
            advance_delay: Duration::ZERO,
        };
        let restored = Session::new(GUILD, ctx);
        restored.load().await.unwrap();

        assert_eq!(restored.repeat_mode(), RepeatMode::All);
        assert_eq!(restored.volume(), 70);
        assert!(!restored.is_shuffled());
        assert_eq!(restored.queue().await, vec![item_by("a", 3), item_by("b", 4)]);
    }

    #[tokio::test]
    async fn test_events_from_old_connection_are_ignored() {
        let h = harness();
        for name in ["a", "b"] {
            h.session.enqueue(item(name)).await;
        }
        h.session.create_player(CHANNEL).await.unwrap();
        let old = h.node.connection();
        h.session.destroy_player().await.unwrap();

        h.session.create_player(CHANNEL).await.unwrap();
        h.session.play().await.unwrap();
        old.finish_track();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.session.now_playing(), Some(item("a")));
        assert_eq!(titles(&h.session.queue().await), vec!["b"]);
    }

    #[tokio::test]
    async fn test_inactive_once_disconnected_and_empty() {
        let h = harness();
        assert!(h.session.is_inactive().await);

        h.session.enqueue(item("a")).await;
        assert!(!h.session.is_inactive().await);

        h.session.empty_queue().await;
        h.session.create_player(CHANNEL).await.unwrap();
        assert!(!h.session.is_inactive().await);

        h.session.destroy_player().await.unwrap();
        assert!(h.session.is_inactive().await);
    }
}

use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::shuffle::{self, RandomSource};
use super::track::TrackItem;

/// Política de repetición de la cola
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatMode {
    /// Cada track se reproduce una vez
    #[default]
    None,
    /// El primer track se repite indefinidamente
    Single,
    /// La cola entera se repite en bucle
    All,
}

/// Cola de reproducción de una guild.
///
/// Todas las mutaciones pasan por el mismo mutex asíncrono, incluido el
/// reinicio de un track, que lo mantiene tomado mientras detiene el reproductor.
pub struct MusicQueue {
    items: Mutex<VecDeque<TrackItem>>,
    rng: Arc<dyn RandomSource>,
}

impl MusicQueue {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            rng,
        }
    }

    /// Agrega un track a la cola según el modo actual
    pub async fn enqueue(&self, item: TrackItem, mode: RepeatMode, shuffled: bool) {
        let mut items = self.items.lock().await;

        if mode == RepeatMode::All && items.len() == 1 {
            // Suena antes de que el bucle vuelva al único track
            items.push_front(item);
        } else if !shuffled || items.is_empty() {
            items.push_back(item);
        } else {
            let index = self.rng.next_below(items.len() + 1);
            debug!("🔀 Insertando en posición aleatoria {}", index);
            items.insert(index, item);
        }
    }

    /// Obtiene el siguiente track según el modo de repetición
    pub async fn dequeue(&self, mode: RepeatMode) -> Option<TrackItem> {
        let mut items = self.items.lock().await;

        match mode {
            RepeatMode::None => items.pop_front(),
            RepeatMode::Single => items.front().cloned(),
            RepeatMode::All => {
                let item = items.pop_front()?;
                items.push_back(item.clone());
                Some(item)
            }
        }
    }

    /// Elimina el track en la posición indicada
    pub async fn remove(&self, index: usize) -> Option<TrackItem> {
        let removed = self.items.lock().await.remove(index);
        if removed.is_some() {
            debug!("❌ Track eliminado en posición {}", index);
        }
        removed
    }

    /// Limpia la cola y devuelve cuántos tracks había
    pub async fn empty(&self) -> usize {
        let mut items = self.items.lock().await;
        let cleared = items.len();
        items.clear();
        info!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        cleared
    }

    /// Mezcla la cola con una permutación uniforme
    pub async fn reshuffle(&self) {
        let mut items = self.items.lock().await;
        shuffle::shuffle(items.make_contiguous(), self.rng.as_ref());
        info!("🔀 Cola mezclada ({} tracks)", items.len());
    }

    /// Ajusta la cabeza de la cola cuando cambia el modo con un track sonando
    pub async fn reconcile_repeat(&self, previous: RepeatMode, next: RepeatMode, now_playing: &TrackItem) {
        if previous == next {
            return;
        }

        let mut items = self.items.lock().await;
        if next == RepeatMode::Single {
            items.push_front(now_playing.clone());
        } else if previous == RepeatMode::Single && items.front() == Some(now_playing) {
            items.pop_front();
        }
    }

    /// Copia del contenido actual
    pub async fn snapshot(&self) -> Vec<TrackItem> {
        self.items.lock().await.iter().cloned().collect()
    }

    /// Reemplaza el contenido (carga desde almacenamiento)
    pub async fn replace(&self, new_items: Vec<TrackItem>) {
        let mut items = self.items.lock().await;
        items.clear();
        items.extend(new_items);
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// `None` si otra tarea tiene el mutex
    pub fn try_is_empty(&self) -> Option<bool> {
        self.items.try_lock().ok().map(|items| items.is_empty())
    }

    /// Toma el mutex de la cola; quien lo tenga excluye cualquier otra mutación
    pub(crate) async fn lock(&self) -> MutexGuard<'_, VecDeque<TrackItem>> {
        self.items.lock().await
    }
}

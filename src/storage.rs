use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::error::{MusicError, Result};

/// Almacenamiento clave-valor por entidad, campo a campo.
///
/// No hay transacciones entre campos: un corte a mitad de un guardado puede
/// dejar campos de distintas versiones.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_field(&self, entity: &str, field: &str) -> Result<Option<String>>;
    async fn set_field(&self, entity: &str, field: &str, value: String) -> Result<()>;
}

/// Almacén en memoria, sin persistencia entre procesos
#[derive(Debug, Default)]
pub struct MemoryStore {
    fields: DashMap<(String, String), String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_field(&self, entity: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .fields
            .get(&(entity.to_string(), field.to_string()))
            .map(|v| v.value().clone()))
    }

    async fn set_field(&self, entity: &str, field: &str, value: String) -> Result<()> {
        self.fields.insert((entity.to_string(), field.to_string()), value);
        Ok(())
    }
}

/// Manager de almacenamiento basado en archivos JSON, uno por guild
pub struct JsonStorage {
    data_dir: PathBuf,
    rooms_cache: Mutex<HashMap<String, Map<String, Value>>>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        let rooms_dir = data_dir.join("rooms");
        fs::create_dir_all(&rooms_dir).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let storage = Self {
            data_dir,
            rooms_cache: Mutex::new(HashMap::new()),
        };
        storage.load_all_rooms().await?;

        Ok(storage)
    }

    /// Entidades con estado guardado
    pub async fn list_rooms(&self) -> Vec<String> {
        self.rooms_cache.lock().await.keys().cloned().collect()
    }

    // Métodos privados

    async fn load_room(&self, entity: &str) -> Result<Map<String, Value>> {
        let content = fs::read_to_string(self.room_file_path(entity)).await?;
        match serde_json::from_str(&content)? {
            Value::Object(map) => Ok(map),
            other => Err(MusicError::Storage(format!(
                "se esperaba un objeto en el archivo de {}, se encontró {}",
                entity, other
            ))),
        }
    }

    async fn save_room(&self, entity: &str, fields: &Map<String, Value>) -> Result<()> {
        let path = self.room_file_path(entity);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(fields)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_all_rooms(&self) -> Result<()> {
        let mut files = fs::read_dir(self.data_dir.join("rooms")).await?;
        let mut cache = self.rooms_cache.lock().await;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let Some(entity) = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("guild_"))
            else {
                continue;
            };

            match self.load_room(entity).await {
                Ok(fields) => {
                    cache.insert(entity.to_string(), fields);
                }
                Err(e) => warn!("Error cargando estado para guild {}: {}", entity, e),
            }
        }

        if !cache.is_empty() {
            info!("📂 Cargados estados de {} guilds", cache.len());
        }
        Ok(())
    }

    fn room_file_path(&self, entity: &str) -> PathBuf {
        self.data_dir.join("rooms").join(format!("guild_{}.json", entity))
    }
}

#[async_trait]
impl StateStore for JsonStorage {
    async fn get_field(&self, entity: &str, field: &str) -> Result<Option<String>> {
        let cache = self.rooms_cache.lock().await;
        Ok(cache
            .get(entity)
            .and_then(|fields| fields.get(field))
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    async fn set_field(&self, entity: &str, field: &str, value: String) -> Result<()> {
        let mut cache = self.rooms_cache.lock().await;
        let fields = cache.entry(entity.to_string()).or_default();
        fields.insert(field.to_string(), Value::String(value));
        self.save_room(entity, fields).await?;
        debug!("💾 Campo {} guardado para guild {}", field, entity);
        Ok(())
    }
}

use serenity::model::id::UserId;
use thiserror::Error;

/// Errores de las sesiones de reproducción.
///
/// Un reproductor desconectado no es un error: las operaciones de control
/// simplemente no hacen nada en ese caso.
#[derive(Error, Debug)]
pub enum MusicError {
    /// Un miembro referenciado por la cola guardada ya no se puede resolver
    #[error("no se pudo resolver al miembro {user_id}: {reason}")]
    MemberResolution { user_id: UserId, reason: String },

    /// Fallo del reproductor externo
    #[error("error del reproductor: {0}")]
    Transport(String),

    /// Fallo del almacenamiento clave-valor
    #[error("error de almacenamiento: {0}")]
    Storage(String),

    #[error("estado guardado inválido: {0}")]
    Codec(#[from] serde_json::Error),

    /// Un campo guardado tiene JSON válido pero un valor imposible
    #[error("registro guardado inválido: {0}")]
    InvalidRecord(String),

    #[error("track codificado inválido: {0}")]
    TrackBlob(#[from] base64::DecodeError),

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MusicError>;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::time::Duration;

use crate::error::Result;

/// Referencia reproducible de un track, ya resuelta por el buscador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    url: String,
    title: String,
    artist: Option<String>,
    duration: Option<Duration>,
}

impl Track {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            artist: None,
            duration: None,
        }
    }

    // Getters
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    // Setters
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Codifica el track en su forma portable para el almacenamiento
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decodifica un track guardado con [`Track::encode`]
    pub fn decode(blob: &str) -> Result<Self> {
        let json = URL_SAFE_NO_PAD.decode(blob)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Miembro que pidió un track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: UserId,
    pub display_name: String,
}

impl Requester {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Elemento de la cola: un track y quién lo pidió.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackItem {
    track: Track,
    requester: Requester,
}

impl TrackItem {
    pub fn new(track: Track, requester: Requester) -> Self {
        Self { track, requester }
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }
}

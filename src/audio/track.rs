use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{sync::Arc, time::Duration};
use tracing::warn;

/// Pista tal y como la describe el nodo de audio.
///
/// `encoded` es el identificador opaco que el nodo necesita para reproducirla;
/// el resto es metadata de presentación. Nunca se modifica después de
/// cargarse, por eso la cola comparte `Arc<Track>` en lugar de copiarla.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub encoded: String,
    pub info: TrackInfo,
    /// Datos opacos que el nodo devuelve intactos en cada evento.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub title: String,
    pub author: String,
    /// Duración en milisegundos
    pub length: u64,
    #[serde(default)]
    pub is_stream: bool,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub source_name: String,
}

impl Track {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.info.length)
    }

    /// Copia de la pista con la metadata de la petición adjunta.
    pub fn with_metadata(&self, metadata: &RequestMetadata) -> Track {
        let mut track = self.clone();
        track.user_data = metadata.to_user_data();
        track
    }

    pub fn same_source(&self, other: &Track) -> bool {
        self.encoded == other.encoded
    }
}

/// Quién pidió una pista y cuándo.
///
/// Viaja serializada dentro de `Track::user_data`, de modo que cuando el nodo
/// anuncia que una pista empezó se puede recuperar el solicitante sin
/// consultar ninguna otra estructura.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub requested_at: DateTime<Utc>,
    pub author_id: UserId,
    /// Asignado por la sesión cada vez que la pista se entrega al reproductor.
    #[serde(default)]
    pub request_id: u64,
    /// `false` cuando el comando ya avisó de la reproducción.
    #[serde(default = "announce_by_default")]
    pub announce: bool,
}

fn announce_by_default() -> bool {
    true
}

impl RequestMetadata {
    pub fn new(author_id: UserId) -> Self {
        Self {
            requested_at: Utc::now(),
            author_id,
            request_id: 0,
            announce: true,
        }
    }

    pub fn to_user_data(&self) -> Option<serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("No se pudo serializar la metadata de la petición: {}", e);
                None
            }
        }
    }

    /// Recupera la metadata que viajó adjunta a la pista, si la hay.
    pub fn from_track(track: &Track) -> Option<Self> {
        let data = track.user_data.as_ref()?;
        serde_json::from_value(data.clone()).ok()
    }
}

/// Entrada de la cola: la pista compartida más su procedencia.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTrack {
    pub track: Arc<Track>,
    pub metadata: RequestMetadata,
}

impl QueuedTrack {
    pub fn new(track: Arc<Track>, metadata: RequestMetadata) -> Self {
        Self { track, metadata }
    }

    pub fn title(&self) -> &str {
        &self.track.info.title
    }
}

#[cfg(test)]
pub(crate) fn sample_track(title: &str) -> Track {
    Track {
        encoded: format!("enc-{}", title),
        info: TrackInfo {
            identifier: title.to_string(),
            title: title.to_string(),
            author: "Artista".to_string(),
            length: 180_000,
            is_stream: false,
            uri: Some(format!("https://deezer.com/track/{}", title)),
            artwork_url: Some(format!("https://cdn.example.com/{}.jpg", title)),
            source_name: "deezer".to_string(),
        },
        user_data: None,
    }
}

//! Mensajes del protocolo v4 del nodo, tal como viajan por el cable.

use serde::{Deserialize, Deserializer, Serialize};
use serenity::model::id::GuildId;

use crate::audio::{
    events::{PlayerEvent, PlayerState, TrackEndReason},
    track::Track,
};

/// Frame recibido por el websocket del nodo.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Incoming {
    #[serde(rename_all = "camelCase")]
    Ready { resumed: bool, session_id: String },
    #[serde(rename_all = "camelCase")]
    PlayerUpdate {
        #[serde(deserialize_with = "guild_from_str")]
        guild_id: GuildId,
        state: PlayerState,
    },
    Stats(Stats),
    Event(NodeEvent),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub players: u32,
    pub playing_players: u32,
    pub uptime: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    #[serde(rename_all = "camelCase")]
    TrackStartEvent {
        #[serde(deserialize_with = "guild_from_str")]
        guild_id: GuildId,
        track: Track,
    },
    #[serde(rename_all = "camelCase")]
    TrackEndEvent {
        #[serde(deserialize_with = "guild_from_str")]
        guild_id: GuildId,
        track: Track,
        reason: TrackEndReason,
    },
    #[serde(rename_all = "camelCase")]
    TrackExceptionEvent {
        #[serde(deserialize_with = "guild_from_str")]
        guild_id: GuildId,
        track: Track,
        exception: TrackException,
    },
    #[serde(rename_all = "camelCase")]
    TrackStuckEvent {
        #[serde(deserialize_with = "guild_from_str")]
        guild_id: GuildId,
        track: Track,
        threshold_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    WebSocketClosedEvent {
        #[serde(deserialize_with = "guild_from_str")]
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

#[derive(Debug, Deserialize)]
pub struct TrackException {
    pub message: Option<String>,
    pub severity: String,
    #[serde(default)]
    pub cause: String,
}

/// Respuesta de `/v4/loadtracks`.
#[derive(Debug, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(Track),
    Playlist(Playlist),
    Search(Vec<Track>),
    Empty {},
    Error(TrackException),
}

#[derive(Debug, Deserialize)]
pub struct Playlist {
    pub info: PlaylistInfo,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistInfo {
    pub name: String,
}

/// Cuerpo de `PATCH /v4/sessions/{session}/players/{guild}`.
#[derive(Debug, Default, Serialize)]
pub struct UpdatePlayer<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<UpdateTrack<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
}

/// `encoded: None` se serializa como `null`, que el nodo interpreta como
/// "detener la pista actual".
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTrack<'a> {
    pub encoded: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// Cuerpo de error que el nodo devuelve con los códigos 4xx/5xx.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

fn guild_from_str<'de, D>(deserializer: D) -> Result<GuildId, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let id: u64 = raw.parse().map_err(serde::de::Error::custom)?;
    if id == 0 {
        return Err(serde::de::Error::custom("guild id 0"));
    }
    Ok(GuildId::new(id))
}

impl From<NodeEvent> for PlayerEvent {
    fn from(event: NodeEvent) -> Self {
        match event {
            NodeEvent::TrackStartEvent { guild_id, track } => {
                PlayerEvent::TrackStart { guild_id, track }
            }
            NodeEvent::TrackEndEvent {
                guild_id,
                track,
                reason,
            } => PlayerEvent::TrackEnd {
                guild_id,
                track,
                reason,
            },
            NodeEvent::TrackExceptionEvent {
                guild_id,
                track,
                exception,
            } => PlayerEvent::TrackException {
                guild_id,
                track,
                message: exception.message,
                severity: exception.severity,
            },
            NodeEvent::TrackStuckEvent {
                guild_id,
                track,
                threshold_ms,
            } => PlayerEvent::TrackStuck {
                guild_id,
                track,
                threshold_ms,
            },
            NodeEvent::WebSocketClosedEvent {
                guild_id,
                code,
                reason,
                by_remote,
            } => PlayerEvent::WebSocketClosed {
                guild_id,
                code,
                reason,
                by_remote,
            },
        }
    }
}

pub fn decode_frame(text: &str) -> Result<Incoming, serde_json::Error> {
    serde_json::from_str(text)
}

use serde::Deserialize;
use serenity::model::id::GuildId;

use crate::audio::track::{RequestMetadata, Track};

/// Motivo con el que el nodo da por terminada una pista.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Solo un final natural o un fallo de carga deben avanzar la cola.
    /// En el resto de casos alguien ya decidió qué suena después.
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

/// Estado periódico del reproductor remoto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct PlayerState {
    /// Unix millis del momento en que el nodo tomó la muestra
    pub time: i64,
    /// Posición en milisegundos
    #[serde(default)]
    pub position: u64,
    pub connected: bool,
    /// Latencia al gateway de voz, -1 sin conexión
    pub ping: i64,
}

/// Evento de reproducción de un guild, ya decodificado.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    TrackStart {
        guild_id: GuildId,
        track: Track,
    },
    TrackEnd {
        guild_id: GuildId,
        track: Track,
        reason: TrackEndReason,
    },
    TrackException {
        guild_id: GuildId,
        track: Track,
        message: Option<String>,
        severity: String,
    },
    TrackStuck {
        guild_id: GuildId,
        track: Track,
        threshold_ms: u64,
    },
    WebSocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },
    PlayerUpdate {
        guild_id: GuildId,
        state: PlayerState,
    },
}

/// Lo que el nodo comunica al servicio de música.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Player(PlayerEvent),
    /// Sesión nueva sin reanudar: el nodo olvidó todos los reproductores.
    SessionLost,
}

impl PlayerEvent {
    /// Eventos que pueden poner a sonar una pista nuestra. Son los únicos
    /// que justifican crear la sesión de un guild que no tiene ninguna.
    pub fn may_create_session(&self) -> bool {
        match self {
            Self::TrackStart { track, .. } => RequestMetadata::from_track(track).is_some(),
            Self::TrackEnd { track, reason, .. } => {
                reason.may_start_next() && RequestMetadata::from_track(track).is_some()
            }
            _ => false,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::WebSocketClosed { guild_id, .. }
            | Self::PlayerUpdate { guild_id, .. } => *guild_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TrackStart { .. } => "TrackStart",
            Self::TrackEnd { .. } => "TrackEnd",
            Self::TrackException { .. } => "TrackException",
            Self::TrackStuck { .. } => "TrackStuck",
            Self::WebSocketClosed { .. } => "WebSocketClosed",
            Self::PlayerUpdate { .. } => "PlayerUpdate",
        }
    }
}

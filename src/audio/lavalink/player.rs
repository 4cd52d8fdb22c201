use async_trait::async_trait;
use parking_lot::RwLock;
use serenity::model::id::GuildId;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

use super::{
    model::{UpdatePlayer, UpdateTrack, VoiceState},
    rest::NodeRest,
};
use crate::audio::{
    events::PlayerState,
    player::{Player, PlayerError},
    track::{RequestMetadata, Track},
};

/// Último estado conocido del reproductor remoto.
#[derive(Debug, Clone)]
struct CachedPlayer {
    track: Option<Track>,
    paused: bool,
    volume: i32,
    position: Duration,
    sampled_at: Instant,
}

impl CachedPlayer {
    /// Posición estimada: la última muestra más lo transcurrido desde entonces.
    fn estimated_position(&self, now: Instant) -> Duration {
        let Some(track) = &self.track else {
            return Duration::ZERO;
        };
        if self.paused {
            return self.position;
        }

        let estimated = self.position + now.saturating_duration_since(self.sampled_at);
        if track.info.is_stream {
            estimated
        } else {
            estimated.min(track.duration())
        }
    }
}

/// Reproductor de un guild en el nodo Lavalink.
pub struct LavalinkPlayer {
    guild_id: GuildId,
    rest: Arc<NodeRest>,
    state: RwLock<CachedPlayer>,
}

impl LavalinkPlayer {
    pub fn new(guild_id: GuildId, rest: Arc<NodeRest>, volume: i32) -> Self {
        Self {
            guild_id,
            rest,
            state: RwLock::new(CachedPlayer {
                track: None,
                paused: false,
                volume,
                position: Duration::ZERO,
                sampled_at: Instant::now(),
            }),
        }
    }

    pub fn volume(&self) -> i32 {
        self.state.read().volume
    }

    /// Envía al nodo las credenciales de voz del guild.
    pub async fn update_voice(&self, voice: VoiceState) -> Result<(), PlayerError> {
        let volume = self.volume();
        self.rest
            .update_player(
                self.guild_id,
                &UpdatePlayer {
                    voice: Some(voice),
                    volume: Some(volume),
                    ..Default::default()
                },
            )
            .await
    }

    pub(super) fn apply_update(&self, update: PlayerState) {
        let mut state = self.state.write();
        state.position = Duration::from_millis(update.position);
        state.sampled_at = Instant::now();
    }

    pub(super) fn reset(&self) {
        let mut state = self.state.write();
        state.track = None;
        state.paused = false;
        state.position = Duration::ZERO;
    }

    #[cfg(test)]
    pub(super) fn track(&self) -> Option<Track> {
        self.state.read().track.clone()
    }

    pub(super) fn on_track_start(&self, track: &Track) {
        let mut state = self.state.write();
        state.track = Some(track.clone());
        state.position = Duration::ZERO;
        state.sampled_at = Instant::now();
    }

    pub(super) fn on_track_end(&self, track: &Track) {
        let mut state = self.state.write();
        let ended_current = state
            .track
            .as_ref()
            .is_some_and(|current| current.same_source(track) && current.user_data == track.user_data);
        if ended_current {
            state.track = None;
            state.position = Duration::ZERO;
        }
    }
}

#[async_trait]
impl Player for LavalinkPlayer {
    async fn play(&self, track: &Track, metadata: &RequestMetadata) -> Result<(), PlayerError> {
        let track = track.with_metadata(metadata);
        self.rest
            .update_player(
                self.guild_id,
                &UpdatePlayer {
                    track: Some(UpdateTrack {
                        encoded: Some(&track.encoded),
                        user_data: track.user_data.clone(),
                    }),
                    ..Default::default()
                },
            )
            .await?;

        debug!("▶️ Pista asignada en guild {}: {}", self.guild_id, track.info.title);
        let mut state = self.state.write();
        state.track = Some(track);
        state.position = Duration::ZERO;
        state.sampled_at = Instant::now();
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> Result<(), PlayerError> {
        self.rest
            .update_player(
                self.guild_id,
                &UpdatePlayer {
                    paused: Some(paused),
                    ..Default::default()
                },
            )
            .await?;

        let mut state = self.state.write();
        let now = Instant::now();
        let position = state.estimated_position(now);
        state.position = position;
        state.sampled_at = now;
        state.paused = paused;
        Ok(())
    }

    async fn set_volume(&self, volume: i32) -> Result<(), PlayerError> {
        self.rest
            .update_player(
                self.guild_id,
                &UpdatePlayer {
                    volume: Some(volume),
                    ..Default::default()
                },
            )
            .await?;

        self.state.write().volume = volume;
        Ok(())
    }

    async fn clear_track(&self) -> Result<(), PlayerError> {
        self.rest
            .update_player(
                self.guild_id,
                &UpdatePlayer {
                    track: Some(UpdateTrack {
                        encoded: None,
                        user_data: None,
                    }),
                    ..Default::default()
                },
            )
            .await?;

        let mut state = self.state.write();
        state.track = None;
        state.position = Duration::ZERO;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), PlayerError> {
        self.rest.destroy_player(self.guild_id).await?;
        let mut state = self.state.write();
        state.track = None;
        Ok(())
    }

    fn position(&self) -> Duration {
        self.state.read().estimated_position(Instant::now())
    }

    fn paused(&self) -> bool {
        self.state.read().paused
    }
}

use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audio::{
    announce::{Announcer, NowPlaying, FALLBACK_COLOUR},
    events::TrackEndReason,
    player::{Player, PlayerError},
    track::{QueuedTrack, RequestMetadata, Track},
};

/// Orden remota que falló, para mensajes y logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Resume,
    Stop,
    Volume,
    Destroy,
}

impl fmt::Display for PlayerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Volume => "volume",
            Self::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum MusicError {
    #[error("el reproductor falló al ejecutar `{command}`: {source}")]
    RemoteCommand {
        command: PlayerCommand,
        #[source]
        source: PlayerError,
    },

    #[error("la cola está llena (máximo {max} pistas)")]
    QueueFull { max: usize },

    #[error("la pista no trae los datos de la petición")]
    MissingMetadata,
}

impl MusicError {
    fn remote(command: PlayerCommand) -> impl FnOnce(PlayerError) -> MusicError {
        move |source| MusicError::RemoteCommand { command, source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// La pista se entregó al reproductor.
    Playing,
    /// Quedó en cola en esta posición (1 = la siguiente).
    Enqueued { position: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipOutcome {
    /// No había nada en cola: el reproductor quedó detenido.
    Stopped,
    Playing(Arc<Track>),
}

/// Si el anuncio de "reproduciendo" debe enviarse cuando la pista arranca.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartNotice {
    #[default]
    Announce,
    /// El comando ya respondió con la pista; solo se anuncia si espera en cola.
    SuppressIfImmediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Default)]
struct SessionState {
    queue: VecDeque<QueuedTrack>,
    current: Option<QueuedTrack>,
}

impl SessionState {
    /// La pista terminada es la que el reproductor tiene asignada ahora.
    fn is_current(&self, track: &Track) -> bool {
        let Some(current) = &self.current else {
            return false;
        };
        match RequestMetadata::from_track(track) {
            Some(metadata) if metadata.request_id != 0 => {
                current.metadata.request_id == metadata.request_id
            }
            _ => current.track.same_source(track),
        }
    }
}

/// Estado de reproducción de un guild: cola FIFO y pista actual.
///
/// Toda mutación toma el mismo mutex durante toda su sección crítica,
/// incluida la llamada remota que decide si una pista suena o espera. Dos
/// comandos concurrentes no pueden ver la sesión inactiva y reproducir a la
/// vez. El mutex no es reentrante: los helpers reciben el estado ya bloqueado.
pub struct MusicSession {
    guild_id: GuildId,
    text_channel: OnceLock<ChannelId>,
    player: Arc<dyn Player>,
    announcer: Arc<dyn Announcer>,
    state: Mutex<SessionState>,
    next_request_id: AtomicU64,
    max_queue_size: usize,
}

impl MusicSession {
    pub fn new(
        guild_id: GuildId,
        player: Arc<dyn Player>,
        announcer: Arc<dyn Announcer>,
        max_queue_size: usize,
    ) -> Self {
        Self {
            guild_id,
            text_channel: OnceLock::new(),
            player,
            announcer,
            state: Mutex::new(SessionState::default()),
            next_request_id: AtomicU64::new(0),
            max_queue_size,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Vincula el canal de anuncios. Solo cuenta el primero.
    pub fn bind_text_channel(&self, channel_id: ChannelId) -> ChannelId {
        *self.text_channel.get_or_init(|| channel_id)
    }

    pub fn text_channel(&self) -> Option<ChannelId> {
        self.text_channel.get().copied()
    }

    pub async fn play_or_enqueue(
        &self,
        track: Arc<Track>,
        metadata: RequestMetadata,
    ) -> Result<PlayOutcome, MusicError> {
        self.play_or_enqueue_with(track, metadata, StartNotice::Announce)
            .await
    }

    /// Reproduce si no suena nada, si no encola al final.
    pub async fn play_or_enqueue_with(
        &self,
        track: Arc<Track>,
        mut metadata: RequestMetadata,
        notice: StartNotice,
    ) -> Result<PlayOutcome, MusicError> {
        let mut state = self.state.lock().await;

        if state.current.is_some() {
            if self.max_queue_size > 0 && state.queue.len() >= self.max_queue_size {
                return Err(MusicError::QueueFull {
                    max: self.max_queue_size,
                });
            }

            metadata.announce = true;
            debug!("➕ Encolada en guild {}: {}", self.guild_id, track.info.title);
            state.queue.push_back(QueuedTrack::new(track, metadata));
            return Ok(PlayOutcome::Enqueued {
                position: state.queue.len(),
            });
        }

        metadata.announce = notice == StartNotice::Announce;
        self.start(&mut state, QueuedTrack::new(track, metadata)).await?;
        Ok(PlayOutcome::Playing)
    }

    /// Saca la cabeza de la cola sin reproducirla.
    pub async fn dequeue(&self) -> Option<QueuedTrack> {
        self.state.lock().await.queue.pop_front()
    }

    /// Salta a la siguiente pista; con la cola vacía equivale a `stop`.
    pub async fn skip(&self) -> Result<SkipOutcome, MusicError> {
        let mut state = self.state.lock().await;
        self.advance(&mut state).await
    }

    pub async fn pause(&self) -> Result<(), MusicError> {
        self.set_paused(true, PlayerCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), MusicError> {
        self.set_paused(false, PlayerCommand::Resume).await
    }

    async fn set_paused(&self, paused: bool, command: PlayerCommand) -> Result<(), MusicError> {
        let _state = self.state.lock().await;
        if self.player.paused() == paused {
            return Ok(());
        }
        self.player
            .set_paused(paused)
            .await
            .map_err(MusicError::remote(command))
    }

    /// Detiene la pista actual. La cola se conserva.
    pub async fn stop(&self) -> Result<(), MusicError> {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await
    }

    /// El rango válido lo decide el nodo.
    pub async fn volume(&self, percent: i32) -> Result<(), MusicError> {
        let _state = self.state.lock().await;
        self.player
            .set_volume(percent)
            .await
            .map_err(MusicError::remote(PlayerCommand::Volume))
    }

    /// Vacía la cola y devuelve cuántas pistas había.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.queue.len();
        state.queue.clear();
        removed
    }

    /// Posición dentro de la pista actual; `None` sin pista.
    pub async fn position(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        state.current.as_ref().map(|_| self.player.position())
    }

    /// Tiempo restante; `None` sin pista o si es una transmisión en vivo.
    pub async fn remaining(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        let current = state.current.as_ref()?;
        if current.track.info.is_stream {
            return None;
        }
        Some(current.track.duration().saturating_sub(self.player.position()))
    }

    pub async fn queue(&self) -> Vec<QueuedTrack> {
        self.state.lock().await.queue.iter().cloned().collect()
    }

    pub async fn current_track(&self) -> Option<QueuedTrack> {
        self.state.lock().await.current.clone()
    }

    pub async fn state(&self) -> PlaybackState {
        let state = self.state.lock().await;
        match state.current {
            None => PlaybackState::Idle,
            Some(_) if self.player.paused() => PlaybackState::Paused,
            Some(_) => PlaybackState::Playing,
        }
    }

    /// Vacía la sesión y elimina el reproductor remoto.
    pub async fn destroy(&self) -> Result<(), MusicError> {
        let mut state = self.state.lock().await;
        state.queue.clear();
        state.current = None;
        self.player
            .destroy()
            .await
            .map_err(MusicError::remote(PlayerCommand::Destroy))
    }

    /// El nodo empezó a reproducir una pista.
    ///
    /// Actualiza la pista actual y anuncia en el canal vinculado. Los fallos
    /// del anuncio se registran y no deshacen el cambio de estado.
    pub async fn handle_track_start(&self, track: Track) -> Result<(), MusicError> {
        let metadata = RequestMetadata::from_track(&track).ok_or(MusicError::MissingMetadata)?;

        {
            let mut state = self.state.lock().await;
            if let Some(current) = &state.current {
                if metadata.request_id < current.metadata.request_id {
                    debug!(
                        "Inicio atrasado ignorado en guild {}: {}",
                        self.guild_id, track.info.title
                    );
                    return Ok(());
                }
            }
            state.current = Some(QueuedTrack::new(Arc::new(track.clone()), metadata.clone()));
        }

        info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, track.info.title);

        if !metadata.announce {
            debug!("Anuncio omitido para {}", track.info.title);
            return Ok(());
        }
        let Some(channel_id) = self.text_channel() else {
            debug!("Guild {} sin canal de anuncios", self.guild_id);
            return Ok(());
        };

        self.announce(channel_id, track, &metadata).await;
        Ok(())
    }

    async fn announce(&self, channel_id: ChannelId, track: Track, metadata: &RequestMetadata) {
        let requester = match self.announcer.resolve_requester(metadata.author_id).await {
            Ok(requester) => Some(requester),
            Err(e) => {
                warn!("No se pudo obtener el solicitante {}: {:#}", metadata.author_id, e);
                None
            }
        };

        let colour = match track.info.artwork_url.as_deref() {
            Some(url) => match self.announcer.artwork_colour(url).await {
                Ok(colour) => colour,
                Err(e) => {
                    warn!("No se pudo calcular el color de {}: {:#}", url, e);
                    FALLBACK_COLOUR
                }
            },
            None => FALLBACK_COLOUR,
        };

        let now_playing = NowPlaying {
            track,
            requester,
            colour,
        };
        if let Err(e) = self.announcer.send_now_playing(channel_id, now_playing).await {
            warn!("No se pudo anunciar la pista en {}: {:#}", channel_id, e);
        }
    }

    /// El nodo terminó una pista.
    ///
    /// Solo un final natural o un fallo de carga avanzan la cola; si la pista
    /// fue reemplazada o detenida, quien la reemplazó ya decidió qué suena.
    pub async fn handle_track_end(
        &self,
        track: Track,
        reason: TrackEndReason,
    ) -> Result<(), MusicError> {
        let mut state = self.state.lock().await;

        if !state.is_current(&track) {
            debug!(
                "Fin de una pista que ya no es la actual en guild {}: {} ({:?})",
                self.guild_id, track.info.title, reason
            );
            return Ok(());
        }

        state.current = None;
        if !reason.may_start_next() {
            return Ok(());
        }

        let Some(next) = state.queue.front().cloned() else {
            info!("⏹️ Cola terminada en guild {}", self.guild_id);
            return Ok(());
        };

        let result = self.start(&mut state, next).await;
        // Una pista que el nodo rechaza no vuelve a intentarse.
        state.queue.pop_front();
        result
    }

    /// La pista se atascó: se salta para que la cola siga.
    pub async fn handle_track_stuck(&self, track: Track, threshold: Duration) -> Result<(), MusicError> {
        warn!(
            "⚠️ Pista atascada más de {:?} en guild {}: {}",
            threshold, self.guild_id, track.info.title
        );

        let mut state = self.state.lock().await;
        if !state.is_current(&track) {
            return Ok(());
        }
        self.advance(&mut state).await.map(drop)
    }

    /// El nodo perdió el reproductor: ya no suena nada ni llegará su fin.
    /// La cola se conserva, como con `stop`.
    pub async fn handle_node_reset(&self) {
        let mut state = self.state.lock().await;
        if let Some(lost) = state.current.take() {
            warn!(
                "🔄 El nodo perdió la pista de guild {}: {}",
                self.guild_id,
                lost.title()
            );
        }
    }

    pub fn handle_track_exception(&self, track: &Track, message: Option<&str>, severity: &str) {
        warn!(
            "❌ Error reproduciendo {} en guild {} ({}): {}",
            track.info.title,
            self.guild_id,
            severity,
            message.unwrap_or("sin detalle")
        );
    }

    /// Entrega una pista al reproductor y solo entonces la marca como actual.
    ///
    /// Si el reproductor falla, `current` queda como estaba.
    async fn start(&self, state: &mut SessionState, mut entry: QueuedTrack) -> Result<(), MusicError> {
        entry.metadata.request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;

        self.player
            .play(&entry.track, &entry.metadata)
            .await
            .map_err(MusicError::remote(PlayerCommand::Play))?;

        debug!(
            "▶️ Guild {} reproduce {} (petición {})",
            self.guild_id,
            entry.title(),
            entry.metadata.request_id
        );
        state.current = Some(entry);
        Ok(())
    }

    async fn advance(&self, state: &mut SessionState) -> Result<SkipOutcome, MusicError> {
        let Some(next) = state.queue.front().cloned() else {
            self.stop_locked(state).await?;
            return Ok(SkipOutcome::Stopped);
        };

        let track = Arc::clone(&next.track);
        self.start(state, next).await?;
        state.queue.pop_front();
        Ok(SkipOutcome::Playing(track))
    }

    async fn stop_locked(&self, state: &mut SessionState) -> Result<(), MusicError> {
        self.player
            .clear_track()
            .await
            .map_err(MusicError::remote(PlayerCommand::Stop))?;
        state.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        announce::{MockAnnouncer, Requester},
        player::{FakePlayer, MockPlayer},
        track::sample_track,
    };
    use pretty_assertions::assert_eq;
    use serenity::model::{id::UserId, Colour};

    fn track(title: &str) -> Arc<Track> {
        Arc::new(sample_track(title))
    }

    fn meta(user: u64) -> RequestMetadata {
        RequestMetadata::new(UserId::new(user))
    }

    fn silent() -> Arc<MockAnnouncer> {
        Arc::new(MockAnnouncer::new())
    }

    fn session_with(player: Arc<dyn Player>, announcer: Arc<dyn Announcer>) -> MusicSession {
        MusicSession::new(GuildId::new(1), player, announcer, 0)
    }

    fn fake_session() -> (Arc<FakePlayer>, MusicSession) {
        let player = Arc::new(FakePlayer::default());
        let session = session_with(player.clone(), silent());
        (player, session)
    }

    async fn titles(session: &MusicSession) -> Vec<String> {
        session
            .queue()
            .await
            .iter()
            .map(|entry| entry.title().to_string())
            .collect()
    }

    async fn current_title(session: &MusicSession) -> Option<String> {
        session
            .current_track()
            .await
            .map(|entry| entry.title().to_string())
    }

    #[tokio::test]
    async fn scenario_a_first_track_plays_and_second_waits() {
        let (player, session) = fake_session();

        let outcome = session.play_or_enqueue(track("a"), meta(1)).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Playing);
        assert_eq!(current_title(&session).await.as_deref(), Some("a"));

        let outcome = session.play_or_enqueue(track("b"), meta(2)).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Enqueued { position: 1 });
        assert_eq!(titles(&session).await, vec!["b"]);
        assert_eq!(player.calls(), vec!["play:a"]);
    }

    #[tokio::test]
    async fn scenario_b_skip_moves_to_the_head_of_the_queue() {
        let (player, session) = fake_session();
        for title in ["a", "b", "c"] {
            session.play_or_enqueue(track(title), meta(1)).await.unwrap();
        }

        let outcome = session.skip().await.unwrap();
        assert_eq!(outcome, SkipOutcome::Playing(track("b")));
        assert_eq!(current_title(&session).await.as_deref(), Some("b"));
        assert_eq!(titles(&session).await, vec!["c"]);
        assert_eq!(player.calls(), vec!["play:a", "play:b"]);
    }

    #[tokio::test]
    async fn scenario_c_end_with_empty_queue_goes_idle() {
        let (player, session) = fake_session();
        session.play_or_enqueue(track("a"), meta(1)).await.unwrap();

        session
            .handle_track_end(player.assigned(), TrackEndReason::Finished)
            .await
            .unwrap();

        assert_eq!(session.current_track().await, None);
        assert_eq!(session.state().await, PlaybackState::Idle);
        assert_eq!(player.calls(), vec!["play:a"]);
    }

    #[tokio::test]
    async fn scenario_d_end_plays_the_next_track() {
        let (player, session) = fake_session();
        session.play_or_enqueue(track("a"), meta(1)).await.unwrap();
        session.play_or_enqueue(track("b"), meta(1)).await.unwrap();

        session
            .handle_track_end(player.assigned(), TrackEndReason::Finished)
            .await
            .unwrap();

        assert_eq!(player.calls(), vec!["play:a", "play:b"]);
        assert_eq!(current_title(&session).await.as_deref(), Some("b"));
        assert!(session.queue().await.is_empty());
    }

    #[tokio::test]
    async fn queue_is_fifo() {
        let (_player, session) = fake_session();
        session.play_or_enqueue(track("now"), meta(1)).await.unwrap();

        let expected: Vec<String> = (0..8).map(|i| format!("t{}", i)).collect();
        for title in &expected {
            session.play_or_enqueue(track(title), meta(1)).await.unwrap();
        }

        let mut dequeued = Vec::new();
        while let Some(entry) = session.dequeue().await {
            dequeued.push(entry.title().to_string());
        }
        assert_eq!(dequeued, expected);
        assert!(session.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn failed_play_leaves_no_phantom_current_track() {
        let mut player = MockPlayer::new();
        player
            .expect_play()
            .times(1)
            .returning(|_, _| Err(PlayerError::NotConnected));
        let session = session_with(Arc::new(player), silent());

        let err = session.play_or_enqueue(track("a"), meta(1)).await.unwrap_err();
        assert!(matches!(
            err,
            MusicError::RemoteCommand {
                command: PlayerCommand::Play,
                ..
            }
        ));
        assert_eq!(session.current_track().await, None);
        assert_eq!(session.state().await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn after_a_failed_play_the_next_request_plays_instead_of_queueing() {
        let (player, session) = fake_session();
        player.set_failing(true);
        assert!(session.play_or_enqueue(track("a"), meta(1)).await.is_err());

        player.set_failing(false);
        let outcome = session.play_or_enqueue(track("b"), meta(1)).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Playing);
    }

    #[tokio::test]
    async fn skip_on_empty_queue_is_stop() {
        let (skipped_player, skipped) = fake_session();
        skipped.play_or_enqueue(track("a"), meta(1)).await.unwrap();
        assert_eq!(skipped.skip().await.unwrap(), SkipOutcome::Stopped);

        let (stopped_player, stopped) = fake_session();
        stopped.play_or_enqueue(track("a"), meta(1)).await.unwrap();
        stopped.stop().await.unwrap();

        assert_eq!(skipped.current_track().await, stopped.current_track().await);
        assert_eq!(skipped.current_track().await, None);
        assert_eq!(skipped_player.calls(), stopped_player.calls());
        assert_eq!(skipped_player.track(), None);
    }

    #[tokio::test]
    async fn node_reset_frees_the_player_and_keeps_the_queue() {
        let (player, session) = fake_session();
        for title in ["a", "b"] {
            session.play_or_enqueue(track(title), meta(1)).await.unwrap();
        }

        session.handle_node_reset().await;
        assert_eq!(current_title(&session).await, None);
        assert_eq!(titles(&session).await, vec!["b"]);
        assert_eq!(session.state().await, PlaybackState::Idle);

        let outcome = session.play_or_enqueue(track("c"), meta(1)).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Playing);
        assert_eq!(player.calls(), vec!["play:a", "play:c"]);
    }

    #[tokio::test]
    async fn failed_skip_keeps_the_queue_and_current_track() {
        let (player, session) = fake_session();
        for title in ["a", "b"] {
            session.play_or_enqueue(track(title), meta(1)).await.unwrap();
        }

        player.set_failing(true);
        assert!(session.skip().await.is_err());

        assert_eq!(current_title(&session).await.as_deref(), Some("a"));
        assert_eq!(titles(&session).await, vec!["b"]);
    }

    #[tokio::test]
    async fn stop_preserves_the_queue() {
        let (player, session) = fake_session();
        for title in ["a", "b", "c"] {
            session.play_or_enqueue(track(title), meta(1)).await.unwrap();
        }

        session.stop().await.unwrap();

        assert_eq!(session.current_track().await, None);
        assert_eq!(titles(&session).await, vec!["b", "c"]);
        assert_eq!(player.calls().last().map(String::as_str), Some("clear"));
    }

    #[tokio::test]
    async fn pause_and_resume_are_idempotent() {
        let (player, session) = fake_session();
        session.play_or_enqueue(track("a"), meta(1)).await.unwrap();

        session.pause().await.unwrap();
        session.pause().await.unwrap();
        assert_eq!(session.state().await, PlaybackState::Paused);

        session.resume().await.unwrap();
        session.resume().await.unwrap();
        assert_eq!(session.state().await, PlaybackState::Playing);

        assert_eq!(player.calls(), vec!["play:a", "paused:true", "paused:false"]);
    }

    #[tokio::test]
    async fn resume_while_playing_makes_no_remote_call() {
        let mut player = MockPlayer::new();
        player.expect_paused().return_const(false);
        player.expect_set_paused().never();
        let session = session_with(Arc::new(player), silent());

        session.resume().await.unwrap();
    }

    #[tokio::test]
    async fn volume_is_passed_through_unclamped() {
        let (player, session) = fake_session();
        session.volume(1500).await.unwrap();
        session.volume(-5).await.unwrap();
        assert_eq!(player.calls(), vec!["volume:1500", "volume:-5"]);
    }

    #[tokio::test]
    async fn position_and_remaining_need_a_current_track() {
        let (player, session) = fake_session();
        assert_eq!(session.position().await, None);
        assert_eq!(session.remaining().await, None);

        session.play_or_enqueue(track("a"), meta(1)).await.unwrap();
        player.set_position(Duration::from_secs(60));
        assert_eq!(session.position().await, Some(Duration::from_secs(60)));
        assert_eq!(session.remaining().await, Some(Duration::from_secs(120)));

        player.set_position(Duration::from_secs(500));
        assert_eq!(session.remaining().await, Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn streams_have_no_remaining_time() {
        let (_player, session) = fake_session();
        let mut live = sample_track("radio");
        live.info.is_stream = true;
        session.play_or_enqueue(Arc::new(live), meta(1)).await.unwrap();

        assert_eq!(session.remaining().await, None);
        assert!(session.position().await.is_some());
    }

    #[tokio::test]
    async fn replaced_end_does_not_advance_twice() {
        let (player, session) = fake_session();
        for title in ["a", "b", "c"] {
            session.play_or_enqueue(track(title), meta(1)).await.unwrap();
        }
        let first = player.assigned();

        session.skip().await.unwrap();
        session
            .handle_track_end(first.clone(), TrackEndReason::Replaced)
            .await
            .unwrap();
        // Un "finished" tardío de la pista ya reemplazada tampoco avanza.
        session
            .handle_track_end(first, TrackEndReason::Finished)
            .await
            .unwrap();

        assert_eq!(current_title(&session).await.as_deref(), Some("b"));
        assert_eq!(titles(&session).await, vec!["c"]);
        assert_eq!(player.calls(), vec!["play:a", "play:b"]);
    }

    #[tokio::test]
    async fn stopped_end_clears_current_without_advancing() {
        let (player, session) = fake_session();
        session.play_or_enqueue(track("a"), meta(1)).await.unwrap();
        session.play_or_enqueue(track("b"), meta(1)).await.unwrap();

        session
            .handle_track_end(player.assigned(), TrackEndReason::Stopped)
            .await
            .unwrap();

        assert_eq!(session.current_track().await, None);
        assert_eq!(titles(&session).await, vec!["b"]);
    }

    #[tokio::test]
    async fn failed_advance_drops_the_rejected_track() {
        let (player, session) = fake_session();
        for title in ["a", "b", "c"] {
            session.play_or_enqueue(track(title), meta(1)).await.unwrap();
        }
        let first = player.assigned();

        player.set_failing(true);
        let result = session.handle_track_end(first, TrackEndReason::Finished).await;

        assert!(result.is_err());
        assert_eq!(session.current_track().await, None);
        assert_eq!(titles(&session).await, vec!["c"]);
    }

    #[tokio::test]
    async fn stuck_tracks_are_skipped() {
        let (player, session) = fake_session();
        session.play_or_enqueue(track("a"), meta(1)).await.unwrap();
        session.play_or_enqueue(track("b"), meta(1)).await.unwrap();

        session
            .handle_track_stuck(player.assigned(), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(current_title(&session).await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn clear_and_destroy_empty_the_session() {
        let (player, session) = fake_session();
        for title in ["a", "b", "c"] {
            session.play_or_enqueue(track(title), meta(1)).await.unwrap();
        }

        assert_eq!(session.clear().await, 2);
        assert!(session.queue().await.is_empty());
        assert!(session.current_track().await.is_some());

        session.destroy().await.unwrap();
        assert_eq!(session.current_track().await, None);
        assert_eq!(player.calls().last().map(String::as_str), Some("destroy"));
    }

    #[tokio::test]
    async fn full_queue_rejects_new_tracks() {
        let player = Arc::new(FakePlayer::default());
        let session = MusicSession::new(GuildId::new(1), player, silent(), 1);
        session.play_or_enqueue(track("a"), meta(1)).await.unwrap();
        session.play_or_enqueue(track("b"), meta(1)).await.unwrap();

        let err = session.play_or_enqueue(track("c"), meta(1)).await.unwrap_err();
        assert!(matches!(err, MusicError::QueueFull { max: 1 }));
    }

    #[tokio::test]
    async fn first_text_channel_binding_sticks() {
        let (_player, session) = fake_session();
        assert_eq!(session.text_channel(), None);
        assert_eq!(session.bind_text_channel(ChannelId::new(10)), ChannelId::new(10));
        assert_eq!(session.bind_text_channel(ChannelId::new(20)), ChannelId::new(10));
        assert_eq!(session.text_channel(), Some(ChannelId::new(10)));
    }

    #[tokio::test]
    async fn track_start_recovers_the_requester_and_announces() {
        let player = Arc::new(FakePlayer::default());
        let mut announcer = MockAnnouncer::new();
        announcer
            .expect_resolve_requester()
            .withf(|user| *user == UserId::new(77))
            .times(1)
            .returning(|_| {
                Ok(Requester {
                    name: "neo".to_string(),
                    avatar_url: "https://cdn/avatar.png".to_string(),
                })
            });
        announcer
            .expect_artwork_colour()
            .times(1)
            .returning(|_| Ok(Colour::from_rgb(1, 2, 3)));
        announcer
            .expect_send_now_playing()
            .withf(|channel, now_playing| {
                *channel == ChannelId::new(5)
                    && now_playing.colour == Colour::from_rgb(1, 2, 3)
                    && now_playing.requester.as_ref().map(|r| r.name.as_str()) == Some("neo")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let session = session_with(player.clone(), Arc::new(announcer));
        session.bind_text_channel(ChannelId::new(5));
        session.play_or_enqueue(track("a"), meta(77)).await.unwrap();

        let started = player.assigned();
        let recovered = RequestMetadata::from_track(&started).unwrap();
        assert_eq!(recovered.author_id, UserId::new(77));

        session.handle_track_start(started).await.unwrap();
        assert_eq!(
            session.current_track().await.map(|entry| entry.metadata.author_id),
            Some(UserId::new(77))
        );
    }

    #[tokio::test]
    async fn announcement_failures_degrade_instead_of_failing() {
        let player = Arc::new(FakePlayer::default());
        let mut announcer = MockAnnouncer::new();
        announcer
            .expect_resolve_requester()
            .returning(|_| Err(anyhow::anyhow!("usuario desconocido")));
        announcer
            .expect_artwork_colour()
            .returning(|_| Err(anyhow::anyhow!("404")));
        announcer
            .expect_send_now_playing()
            .withf(|_, now_playing| {
                now_playing.requester.is_none() && now_playing.colour == FALLBACK_COLOUR
            })
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("sin permisos")));

        let session = session_with(player.clone(), Arc::new(announcer));
        session.bind_text_channel(ChannelId::new(5));
        session.play_or_enqueue(track("a"), meta(1)).await.unwrap();

        session.handle_track_start(player.assigned()).await.unwrap();
        assert_eq!(current_title(&session).await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn immediate_plays_can_suppress_the_announcement() {
        let player = Arc::new(FakePlayer::default());
        let mut announcer = MockAnnouncer::new();
        announcer.expect_send_now_playing().never();
        let session = session_with(player.clone(), Arc::new(announcer));
        session.bind_text_channel(ChannelId::new(5));

        session
            .play_or_enqueue_with(track("a"), meta(1), StartNotice::SuppressIfImmediate)
            .await
            .unwrap();
        session.handle_track_start(player.assigned()).await.unwrap();
    }

    #[tokio::test]
    async fn enqueued_tracks_always_announce() {
        let (_player, session) = fake_session();
        session.play_or_enqueue(track("a"), meta(1)).await.unwrap();
        session
            .play_or_enqueue_with(track("b"), meta(1), StartNotice::SuppressIfImmediate)
            .await
            .unwrap();

        let queued = session.queue().await;
        assert!(queued[0].metadata.announce);
    }

    #[tokio::test]
    async fn tracks_without_metadata_are_rejected_without_touching_state() {
        let (_player, session) = fake_session();
        let err = session.handle_track_start(sample_track("foreign")).await.unwrap_err();
        assert!(matches!(err, MusicError::MissingMetadata));
        assert_eq!(session.current_track().await, None);
    }

    #[tokio::test]
    async fn late_start_events_do_not_rewind_the_current_track() {
        let (player, session) = fake_session();
        for title in ["a", "b"] {
            session.play_or_enqueue(track(title), meta(1)).await.unwrap();
        }
        let first = player.assigned();
        session.skip().await.unwrap();

        let mut quiet = RequestMetadata::from_track(&first).unwrap();
        quiet.announce = false;
        session.handle_track_start(first.with_metadata(&quiet)).await.unwrap();

        assert_eq!(current_title(&session).await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn concurrent_requests_on_an_idle_session_play_once() {
        let (player, session) = fake_session();
        let session = Arc::new(session);

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    session
                        .play_or_enqueue(track(&format!("t{}", i)), meta(1))
                        .await
                })
            })
            .collect();

        let mut playing = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == PlayOutcome::Playing {
                playing += 1;
            }
        }

        assert_eq!(playing, 1);
        assert_eq!(player.calls().len(), 1);
        assert_eq!(session.queue().await.len(), 9);
    }
}

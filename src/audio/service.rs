use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::Songbird;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::audio::{
    announce::Announcer,
    events::{NodeEvent, PlayerEvent},
    lavalink::{model::LoadResult, model::VoiceState, LavalinkNode},
    player::Player,
    session::MusicSession,
    track::Track,
};

/// Crea el reproductor remoto de un guild.
pub type PlayerFactory = Arc<dyn Fn(GuildId) -> Arc<dyn Player> + Send + Sync>;

/// Ajustes de sesión que vienen de la configuración.
#[derive(Debug, Clone)]
pub struct MusicSettings {
    pub max_queue_size: usize,
    pub search_prefix: String,
}

/// Pistas resueltas para una búsqueda.
#[derive(Debug, Clone, Default)]
pub struct LoadedTracks {
    pub tracks: Vec<Track>,
    /// Nombre de la playlist si la búsqueda era una.
    pub playlist: Option<String>,
}

struct SessionEntry {
    session: Arc<MusicSession>,
    events: UnboundedSender<NodeEvent>,
    worker: JoinHandle<()>,
}

/// Registro de sesiones por guild y enrutador de eventos del nodo.
///
/// Cada sesión tiene una tarea propia que consume sus eventos de uno en uno,
/// en el orden en que el nodo los emitió. Un guild lento no frena a los demás.
pub struct MusicService {
    sessions: DashMap<GuildId, SessionEntry>,
    players: PlayerFactory,
    announcer: Arc<dyn Announcer>,
    settings: MusicSettings,
    node: Option<Arc<LavalinkNode>>,
}

impl MusicService {
    pub fn new(players: PlayerFactory, announcer: Arc<dyn Announcer>, settings: MusicSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            players,
            announcer,
            settings,
            node: None,
        }
    }

    /// Servicio respaldado por un nodo Lavalink.
    pub fn with_node(node: Arc<LavalinkNode>, announcer: Arc<dyn Announcer>, settings: MusicSettings) -> Self {
        let factory_node = Arc::clone(&node);
        let players: PlayerFactory =
            Arc::new(move |guild_id| factory_node.player(guild_id) as Arc<dyn Player>);

        Self {
            node: Some(node),
            ..Self::new(players, announcer, settings)
        }
    }

    /// Sesión del guild, creada si no existe. El primer canal vinculado se
    /// conserva durante toda la vida de la sesión.
    pub fn session(&self, guild_id: GuildId, text_channel: ChannelId) -> Arc<MusicSession> {
        let session = self.entry(guild_id);
        session.bind_text_channel(text_channel);
        session
    }

    pub fn get_session(&self, guild_id: GuildId) -> Option<Arc<MusicSession>> {
        self.sessions
            .get(&guild_id)
            .map(|entry| Arc::clone(&entry.session))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn entry(&self, guild_id: GuildId) -> Arc<MusicSession> {
        let entry = self.sessions.entry(guild_id).or_insert_with(|| {
            debug!("🆕 Sesión de música creada para guild {}", guild_id);
            let session = Arc::new(MusicSession::new(
                guild_id,
                (self.players)(guild_id),
                Arc::clone(&self.announcer),
                self.settings.max_queue_size,
            ));
            let (events, receiver) = unbounded_channel();
            let worker = tokio::spawn(run_worker(Arc::clone(&session), receiver));
            SessionEntry {
                session,
                events,
                worker,
            }
        });
        Arc::clone(&entry.session)
    }

    /// Entrega un evento a la sesión de su guild.
    ///
    /// Un inicio o un final natural de una pista nuestra crean la sesión si no
    /// existe: no se pierden por llegar antes que el comando que los provocó.
    /// El resto de eventos de un guild sin sesión se descarta, de modo que los
    /// restos de un reproductor destruido no resucitan la sesión eliminada.
    pub fn dispatch(&self, event: PlayerEvent) {
        let guild_id = event.guild_id();

        if let PlayerEvent::PlayerUpdate { state, .. } = &event {
            trace!(
                "Guild {} en {}ms (ping {}ms, voz conectada: {}, muestra {})",
                guild_id,
                state.position,
                state.ping,
                state.connected,
                state.time
            );
        }

        if !self.sessions.contains_key(&guild_id) {
            if !event.may_create_session() {
                debug!("Evento {} descartado: guild {} sin sesión", event.name(), guild_id);
                return;
            }
            self.entry(guild_id);
        }

        self.send(guild_id, NodeEvent::Player(event));
    }

    /// El nodo abrió una sesión nueva: ninguna pista sigue sonando.
    pub fn reset_sessions(&self) {
        if self.sessions.is_empty() {
            return;
        }
        warn!("🔄 Sesión de Lavalink perdida, {} sesiones reiniciadas", self.sessions.len());
        for entry in self.sessions.iter() {
            if entry.events.send(NodeEvent::SessionLost).is_err() {
                error!("❌ El worker de la sesión {} ya no existe", entry.key());
            }
        }
    }

    fn send(&self, guild_id: GuildId, event: NodeEvent) {
        let Some(entry) = self.sessions.get(&guild_id) else {
            return;
        };
        if entry.events.send(event).is_err() {
            error!("❌ El worker de la sesión {} ya no existe", guild_id);
        }
    }

    /// Consume el canal de eventos del nodo hasta que se cierre.
    pub async fn run_router(self: Arc<Self>, mut events: UnboundedReceiver<NodeEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                NodeEvent::Player(event) => self.dispatch(event),
                NodeEvent::SessionLost => self.reset_sessions(),
            }
        }
        info!("🛑 Enrutador de eventos de música detenido");
    }

    /// Elimina la sesión del guild y su reproductor remoto.
    pub async fn remove_session(&self, guild_id: GuildId) -> bool {
        let Some((_, entry)) = self.sessions.remove(&guild_id) else {
            return false;
        };

        entry.worker.abort();
        if let Err(e) = entry.session.destroy().await {
            warn!("No se pudo destruir el reproductor de guild {}: {}", guild_id, e);
        }
        if let Some(node) = &self.node {
            node.forget_player(guild_id);
        }

        info!("👋 Sesión de música de guild {} eliminada", guild_id);
        true
    }

    /// Une el bot al canal de voz y pasa las credenciales al nodo.
    pub async fn join(&self, songbird: &Songbird, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        let Some(node) = &self.node else {
            bail!("No hay nodo de audio configurado");
        };

        let (connection, _call) = songbird
            .join_gateway(guild_id, channel_id)
            .await
            .context("Error al unirse al canal de voz")?;

        node.update_voice(
            guild_id,
            VoiceState {
                token: connection.token,
                endpoint: connection.endpoint,
                session_id: connection.session_id,
            },
        )
        .await
        .context("Error al enviar el estado de voz al nodo")?;

        info!("🔊 Conectado a voz en guild {} (canal {})", guild_id, channel_id);
        Ok(())
    }

    /// Sale del canal de voz y elimina la sesión.
    pub async fn leave(&self, songbird: &Songbird, guild_id: GuildId) -> Result<()> {
        if songbird.get(guild_id).is_some() {
            songbird
                .remove(guild_id)
                .await
                .context("Error al salir del canal de voz")?;
        }
        self.remove_session(guild_id).await;
        Ok(())
    }

    /// Resuelve una URL o búsqueda. De una búsqueda solo se toma el primer
    /// resultado; de una playlist, todas sus pistas.
    pub async fn load_tracks(&self, query: &str) -> Result<LoadedTracks> {
        let Some(node) = &self.node else {
            bail!("No hay nodo de audio configurado");
        };

        let identifier = search_identifier(query, &self.settings.search_prefix);
        debug!("🔍 Cargando {}", identifier);

        let loaded = match node.load_tracks(&identifier).await? {
            LoadResult::Track(track) => LoadedTracks {
                tracks: vec![track],
                playlist: None,
            },
            LoadResult::Playlist(playlist) => LoadedTracks {
                tracks: playlist.tracks,
                playlist: Some(playlist.info.name),
            },
            LoadResult::Search(results) => LoadedTracks {
                tracks: results.into_iter().take(1).collect(),
                playlist: None,
            },
            LoadResult::Empty {} | LoadResult::Error(_) => LoadedTracks::default(),
        };

        Ok(loaded)
    }

    pub fn node_connected(&self) -> bool {
        self.node.as_ref().is_some_and(|node| node.is_connected())
    }

    /// Detiene todos los workers y el nodo.
    pub fn shutdown(&self) {
        for entry in self.sessions.iter() {
            entry.worker.abort();
        }
        if let Some(node) = &self.node {
            node.shutdown();
        }
    }
}

/// Las URLs http(s) se cargan tal cual; el resto se busca con el prefijo.
pub fn search_identifier(query: &str, prefix: &str) -> String {
    let query = query.trim();
    match Url::parse(query) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => query.to_string(),
        _ => format!("{}{}", prefix, query),
    }
}

async fn run_worker(session: Arc<MusicSession>, mut events: UnboundedReceiver<NodeEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            NodeEvent::Player(event) => handle_event(&session, event).await,
            NodeEvent::SessionLost => session.handle_node_reset().await,
        }
    }
    debug!("Worker de guild {} terminado", session.guild_id());
}

async fn handle_event(session: &MusicSession, event: PlayerEvent) {
    let guild_id = session.guild_id();
    trace!("Evento {} para guild {}", event.name(), guild_id);

    match event {
        PlayerEvent::TrackStart { track, .. } => {
            if let Err(e) = session.handle_track_start(track).await {
                warn!("Error procesando inicio de pista en guild {}: {}", guild_id, e);
            }
        }
        PlayerEvent::TrackEnd { track, reason, .. } => {
            if let Err(e) = session.handle_track_end(track, reason).await {
                error!("❌ Error avanzando la cola en guild {}: {}", guild_id, e);
            }
        }
        PlayerEvent::TrackException {
            track,
            message,
            severity,
            ..
        } => session.handle_track_exception(&track, message.as_deref(), &severity),
        PlayerEvent::TrackStuck {
            track,
            threshold_ms,
            ..
        } => {
            let threshold = Duration::from_millis(threshold_ms);
            if let Err(e) = session.handle_track_stuck(track, threshold).await {
                error!("❌ Error saltando pista atascada en guild {}: {}", guild_id, e);
            }
        }
        PlayerEvent::WebSocketClosed {
            code,
            reason,
            by_remote,
            ..
        } => warn!(
            "🔌 Voz cerrada en guild {} (código {}, remoto: {}): {}",
            guild_id, code, by_remote, reason
        ),
        PlayerEvent::PlayerUpdate { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        announce::MockAnnouncer,
        events::TrackEndReason,
        player::FakePlayer,
        session::PlayOutcome,
        track::{sample_track, RequestMetadata},
    };
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    struct Harness {
        service: MusicService,
        players: Arc<DashMap<GuildId, Arc<FakePlayer>>>,
    }

    impl Harness {
        fn new() -> Self {
            let players: Arc<DashMap<GuildId, Arc<FakePlayer>>> = Arc::new(DashMap::new());
            let registry = Arc::clone(&players);
            let factory: PlayerFactory = Arc::new(move |guild_id| {
                let player = Arc::new(FakePlayer::default());
                registry.insert(guild_id, Arc::clone(&player));
                player as Arc<dyn Player>
            });

            let mut announcer = MockAnnouncer::new();
            announcer.expect_send_now_playing().never();
            let service = MusicService::new(
                factory,
                Arc::new(announcer),
                MusicSettings {
                    max_queue_size: 0,
                    search_prefix: "dzsearch:".to_string(),
                },
            );

            Self { service, players }
        }

        fn player(&self, guild_id: GuildId) -> Arc<FakePlayer> {
            Arc::clone(self.players.get(&guild_id).unwrap().value())
        }
    }

    fn requested(title: &str, request_id: u64) -> Track {
        let metadata = RequestMetadata {
            request_id,
            ..RequestMetadata::new(UserId::new(1))
        };
        sample_track(title).with_metadata(&metadata)
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("la condición no se cumplió a tiempo");
    }

    #[tokio::test]
    async fn sessions_are_created_once_and_keep_their_first_channel() {
        let harness = Harness::new();
        let guild = GuildId::new(10);

        let first = harness.service.session(guild, ChannelId::new(1));
        let second = harness.service.session(guild, ChannelId::new(2));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.text_channel(), Some(ChannelId::new(1)));
        assert_eq!(harness.service.session_count(), 1);
    }

    #[tokio::test]
    async fn get_session_never_creates() {
        let harness = Harness::new();
        assert!(harness.service.get_session(GuildId::new(10)).is_none());
        assert_eq!(harness.service.session_count(), 0);
    }

    #[tokio::test]
    async fn events_for_unknown_guilds_create_a_session() {
        let harness = Harness::new();
        let guild = GuildId::new(11);

        harness.service.dispatch(PlayerEvent::TrackEnd {
            guild_id: guild,
            track: requested("a", 1),
            reason: TrackEndReason::Finished,
        });

        let session = harness.service.get_session(guild).expect("sesión creada");
        assert_eq!(session.text_channel(), None);
    }

    #[tokio::test]
    async fn late_events_do_not_bring_back_a_removed_session() {
        let harness = Harness::new();
        let guild = GuildId::new(15);
        let session = harness.service.session(guild, ChannelId::new(1));
        session
            .play_or_enqueue(Arc::new(sample_track("a")), RequestMetadata::new(UserId::new(1)))
            .await
            .unwrap();
        assert!(harness.service.remove_session(guild).await);

        harness.service.dispatch(PlayerEvent::WebSocketClosed {
            guild_id: guild,
            code: 4014,
            reason: "Disconnected.".to_string(),
            by_remote: true,
        });
        harness.service.dispatch(PlayerEvent::TrackEnd {
            guild_id: guild,
            track: requested("a", 1),
            reason: TrackEndReason::Cleanup,
        });
        harness.service.dispatch(PlayerEvent::TrackStuck {
            guild_id: guild,
            track: requested("a", 1),
            threshold_ms: 10_000,
        });

        assert_eq!(harness.service.session_count(), 0);
    }

    #[tokio::test]
    async fn foreign_tracks_do_not_create_sessions() {
        let harness = Harness::new();
        harness.service.dispatch(PlayerEvent::TrackStart {
            guild_id: GuildId::new(16),
            track: sample_track("ajena"),
        });
        assert_eq!(harness.service.session_count(), 0);
    }

    #[tokio::test]
    async fn lost_node_session_frees_every_player() {
        let harness = Harness::new();
        let guild = GuildId::new(17);
        let session = harness.service.session(guild, ChannelId::new(1));
        for title in ["a", "b"] {
            session
                .play_or_enqueue(Arc::new(sample_track(title)), RequestMetadata::new(UserId::new(1)))
                .await
                .unwrap();
        }

        harness.service.reset_sessions();
        wait_until(|| {
            let session = Arc::clone(&session);
            async move { session.current_track().await.is_none() }
        })
        .await;

        assert_eq!(session.queue().await.len(), 1);
        let outcome = session
            .play_or_enqueue(Arc::new(sample_track("c")), RequestMetadata::new(UserId::new(1)))
            .await
            .unwrap();
        assert_eq!(outcome, PlayOutcome::Playing);
        assert_eq!(harness.service.session_count(), 1);
    }

    #[tokio::test]
    async fn position_updates_do_not_create_sessions() {
        let harness = Harness::new();
        harness.service.dispatch(PlayerEvent::PlayerUpdate {
            guild_id: GuildId::new(12),
            state: Default::default(),
        });
        assert_eq!(harness.service.session_count(), 0);
    }

    #[tokio::test]
    async fn events_are_handled_in_emission_order() {
        let harness = Harness::new();
        let guild = GuildId::new(13);
        let session = harness.service.session(guild, ChannelId::new(1));
        for title in ["a", "b", "c"] {
            session
                .play_or_enqueue(Arc::new(sample_track(title)), RequestMetadata::new(UserId::new(1)))
                .await
                .unwrap();
        }

        // Las peticiones 1, 2 y 3 son a, b y c. El fin de b solo cuenta si
        // se procesa después del fin de a.
        harness.service.dispatch(PlayerEvent::TrackEnd {
            guild_id: guild,
            track: requested("a", 1),
            reason: TrackEndReason::Finished,
        });
        harness.service.dispatch(PlayerEvent::TrackEnd {
            guild_id: guild,
            track: requested("b", 2),
            reason: TrackEndReason::Finished,
        });

        wait_until(|| {
            let session = Arc::clone(&session);
            async move { session.queue().await.is_empty() }
        })
        .await;

        let current = session.current_track().await.map(|entry| entry.title().to_string());
        assert_eq!(current.as_deref(), Some("c"));
        assert_eq!(harness.player(guild).calls(), vec!["play:a", "play:b", "play:c"]);
    }

    #[tokio::test]
    async fn removing_a_session_destroys_its_player() {
        let harness = Harness::new();
        let guild = GuildId::new(14);
        harness.service.session(guild, ChannelId::new(1));

        assert!(harness.service.remove_session(guild).await);
        assert!(harness.service.get_session(guild).is_none());
        assert_eq!(harness.player(guild).calls(), vec!["destroy"]);

        assert!(!harness.service.remove_session(guild).await);
    }

    #[tokio::test]
    async fn loading_without_a_node_fails() {
        let harness = Harness::new();
        assert!(harness.service.load_tracks("daft punk").await.is_err());
        assert!(!harness.service.node_connected());
    }

    #[test]
    fn plain_queries_get_the_search_prefix() {
        assert_eq!(search_identifier("daft punk", "dzsearch:"), "dzsearch:daft punk");
        assert_eq!(search_identifier("  one more time ", "dzsearch:"), "dzsearch:one more time");
        assert_eq!(
            search_identifier("https://www.deezer.com/track/3135556", "dzsearch:"),
            "https://www.deezer.com/track/3135556"
        );
        assert_eq!(search_identifier("ytsearch:foo", "dzsearch:"), "dzsearch:ytsearch:foo");
    }
}

//! # Lavalink node
//!
//! Conexión con un nodo Lavalink v4.
//!
//! - [`rest`] habla con la API HTTP: actualizar o destruir reproductores y
//!   cargar pistas.
//! - [`player`] implementa [`Player`](crate::audio::player::Player) sobre esa
//!   API, con una caché local de posición, pausa y pista.
//! - [`model`] contiene los mensajes tal como viajan por el cable.
//!
//! El websocket lo lee una única tarea. Los eventos se reenvían en el orden en
//! que el nodo los emite por un canal sin límite; quien los consuma decide cómo
//! repartirlos.

pub mod model;
pub mod player;
pub mod rest;

use dashmap::DashMap;
use futures::StreamExt;
use serenity::model::id::{GuildId, UserId};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{net::TcpStream, sync::mpsc::UnboundedSender};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{
    events::{NodeEvent, PlayerEvent},
    player::PlayerError,
};
use model::{decode_frame, Incoming, LoadResult, VoiceState};
use player::LavalinkPlayer;
use rest::NodeRest;

type NodeStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLIENT_NAME: &str = concat!("neo-bot/", env!("CARGO_PKG_VERSION"));
const RESUME_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("error de websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("handshake con el nodo fallido: {0}")]
    Handshake(String),

    #[error("el nodo cerró la conexión")]
    Closed,

    #[error("no se pudo cargar la pista: {0}")]
    LoadFailed(String),

    #[error(transparent)]
    Player(#[from] PlayerError),
}

/// Datos de conexión a un nodo.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub secure: bool,
    pub user_id: UserId,
    pub reconnect_attempts: u32,
    pub default_volume: i32,
}

impl NodeConfig {
    pub fn rest_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/v4/websocket", scheme, self.host, self.port)
    }
}

/// Un nodo Lavalink: API REST, websocket de eventos y reproductores por guild.
pub struct LavalinkNode {
    config: NodeConfig,
    rest: Arc<NodeRest>,
    players: DashMap<GuildId, Arc<LavalinkPlayer>>,
    shutdown: CancellationToken,
}

impl LavalinkNode {
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let rest = NodeRest::new(config.rest_base(), config.password.clone())?;
        Ok(Self {
            config,
            rest: Arc::new(rest),
            players: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Abre el websocket, espera `ready` y deja una tarea leyendo eventos.
    ///
    /// La tarea se lanza aunque la primera conexión falle: entonces empieza
    /// por los reintentos, y un nodo que arranque después del bot se recoge
    /// igual. El error solo informa de ese primer intento.
    pub async fn connect(self: &Arc<Self>, events: UnboundedSender<NodeEvent>) -> Result<(), NodeError> {
        let first = self.open(&events).await;
        let node = Arc::clone(self);

        match first {
            Ok(stream) => {
                tokio::spawn(async move { node.run(Some(stream), events).await });
                Ok(())
            }
            Err(e) => {
                tokio::spawn(async move { node.run(None, events).await });
                Err(e)
            }
        }
    }

    async fn open(&self, events: &UnboundedSender<NodeEvent>) -> Result<NodeStream, NodeError> {
        let mut request = self.config.websocket_url().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("authorization", header_value(&self.config.password)?);
        headers.insert("user-id", header_value(&self.config.user_id.to_string())?);
        headers.insert("client-name", HeaderValue::from_static(CLIENT_NAME));
        if let Some(session) = self.rest.session_id() {
            headers.insert("session-id", header_value(&session)?);
        }

        info!("🔗 Conectando a Lavalink en {}", self.config.websocket_url());
        let (mut stream, _) = connect_async(request).await?;

        // El primer frame útil siempre es `ready`.
        while let Some(message) = stream.next().await {
            let Message::Text(text) = message? else {
                continue;
            };
            match decode_frame(text.as_str()) {
                Ok(Incoming::Ready { session_id, resumed }) => {
                    self.on_ready(session_id, resumed, events);
                    if let Err(e) = self.rest.enable_resuming(RESUME_TIMEOUT).await {
                        warn!("No se pudo activar la reanudación de sesión: {}", e);
                    }
                    return Ok(stream);
                }
                Ok(other) => debug!("Frame previo a ready ignorado: {:?}", other),
                Err(e) => warn!("Frame de Lavalink no reconocido: {}", e),
            }
        }

        Err(NodeError::Handshake("el nodo cerró antes de enviar ready".to_string()))
    }

    /// Registra la sesión del nodo. Sin reanudar, el nodo olvidó los
    /// reproductores anteriores y las sesiones de música deben saberlo.
    fn on_ready(&self, session_id: String, resumed: bool, events: &UnboundedSender<NodeEvent>) {
        info!("✅ Lavalink listo (sesión {}, reanudada: {})", session_id, resumed);
        self.rest.set_session_id(Some(session_id));
        if resumed {
            return;
        }

        for player in self.players.iter() {
            player.reset();
        }
        if events.send(NodeEvent::SessionLost).is_err() {
            warn!("Nadie escucha los eventos de Lavalink");
        }
    }

    async fn run(self: Arc<Self>, stream: Option<NodeStream>, events: UnboundedSender<NodeEvent>) {
        let mut stream = match stream {
            Some(stream) => stream,
            None => match self.reconnect(&events).await {
                Some(stream) => stream,
                None => return,
            },
        };

        loop {
            match self.read_events(&mut stream, &events).await {
                Ok(()) => {
                    info!("🛑 Lector de Lavalink detenido");
                    return;
                }
                Err(e) => warn!("⚠️ Conexión con Lavalink perdida: {}", e),
            }

            match self.reconnect(&events).await {
                Some(next) => stream = next,
                None => return,
            }
        }
    }

    async fn reconnect(&self, events: &UnboundedSender<NodeEvent>) -> Option<NodeStream> {
        let attempts = self.config.reconnect_attempts.max(1);
        for attempt in 1..=attempts {
            let backoff = Duration::from_secs(2u64.pow(attempt.min(5)));
            warn!("🔄 Reintentando Lavalink ({}/{}) en {:?}", attempt, attempts, backoff);

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(backoff) => {}
            }

            match self.open(events).await {
                Ok(stream) => return Some(stream),
                Err(e) => warn!("Reconexión fallida: {}", e),
            }
        }

        error!("❌ Lavalink inalcanzable tras {} intentos, la música queda deshabilitada", attempts);
        self.rest.set_session_id(None);
        None
    }

    /// Lee hasta que el nodo cierra (error) o se pide apagar (`Ok`).
    async fn read_events(
        &self,
        stream: &mut NodeStream,
        events: &UnboundedSender<NodeEvent>,
    ) -> Result<(), NodeError> {
        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                message = stream.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = self.handle_frame(text.as_str()) {
                        if events.send(NodeEvent::Player(event)).is_err() {
                            warn!("Nadie escucha los eventos de Lavalink");
                            return Ok(());
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Close de Lavalink: {:?}", frame);
                    return Err(NodeError::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(NodeError::Closed),
            }
        }
    }

    /// Actualiza la caché de reproductores y traduce el frame a evento.
    fn handle_frame(&self, text: &str) -> Option<PlayerEvent> {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame de Lavalink no reconocido: {}", e);
                return None;
            }
        };

        match frame {
            Incoming::Ready { session_id, .. } => {
                self.rest.set_session_id(Some(session_id));
                None
            }
            Incoming::Stats(stats) => {
                debug!(
                    "📊 Lavalink: {} reproductores ({} activos), uptime {}ms",
                    stats.players, stats.playing_players, stats.uptime
                );
                None
            }
            Incoming::PlayerUpdate { guild_id, state } => {
                if let Some(player) = self.players.get(&guild_id) {
                    player.apply_update(state);
                }
                Some(PlayerEvent::PlayerUpdate { guild_id, state })
            }
            Incoming::Event(event) => {
                let event = PlayerEvent::from(event);
                if let Some(player) = self.players.get(&event.guild_id()) {
                    match &event {
                        PlayerEvent::TrackStart { track, .. } => player.on_track_start(track),
                        PlayerEvent::TrackEnd { track, .. } => player.on_track_end(track),
                        _ => {}
                    }
                }
                Some(event)
            }
        }
    }

    /// Reproductor del guild, creado si no existe.
    pub fn player(&self, guild_id: GuildId) -> Arc<LavalinkPlayer> {
        self.players
            .entry(guild_id)
            .or_insert_with(|| {
                Arc::new(LavalinkPlayer::new(
                    guild_id,
                    Arc::clone(&self.rest),
                    self.config.default_volume,
                ))
            })
            .clone()
    }

    pub fn forget_player(&self, guild_id: GuildId) {
        self.players.remove(&guild_id);
    }

    pub async fn update_voice(&self, guild_id: GuildId, voice: VoiceState) -> Result<(), NodeError> {
        self.player(guild_id).update_voice(voice).await?;
        Ok(())
    }

    /// Resuelve una búsqueda o URL a pistas reproducibles.
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, NodeError> {
        match self.rest.load_tracks(identifier).await? {
            LoadResult::Error(exception) => Err(NodeError::LoadFailed(
                exception.message.unwrap_or(exception.cause),
            )),
            result => Ok(result),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.rest.session_id().is_some()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn header_value(value: &str) -> Result<HeaderValue, NodeError> {
    HeaderValue::from_str(value).map_err(|e| NodeError::Handshake(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::player::Player;
    use crate::audio::track::sample_track;

    fn node() -> LavalinkNode {
        LavalinkNode::new(NodeConfig {
            host: "localhost".to_string(),
            port: 2333,
            password: "youshallnotpass".to_string(),
            secure: false,
            user_id: UserId::new(1),
            reconnect_attempts: 3,
            default_volume: 100,
        })
        .unwrap()
    }

    #[test]
    fn urls_follow_the_secure_flag() {
        let mut config = node().config.clone();
        assert_eq!(config.rest_base(), "http://localhost:2333");
        assert_eq!(config.websocket_url(), "ws://localhost:2333/v4/websocket");

        config.secure = true;
        assert_eq!(config.rest_base(), "https://localhost:2333");
        assert_eq!(config.websocket_url(), "wss://localhost:2333/v4/websocket");
    }

    #[test]
    fn players_are_created_once_per_guild() {
        let node = node();
        let a = node.player(GuildId::new(5));
        let b = node.player(GuildId::new(5));
        assert!(Arc::ptr_eq(&a, &b));

        node.forget_player(GuildId::new(5));
        let c = node.player(GuildId::new(5));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn frames_update_the_player_cache() {
        let node = node();
        let player = node.player(GuildId::new(9));
        let track = sample_track("x");

        let start = serde_json::json!({
            "op": "event",
            "type": "TrackStartEvent",
            "guildId": "9",
            "track": track,
        });
        let event = node.handle_frame(&start.to_string()).unwrap();
        assert_eq!(event.name(), "TrackStart");
        assert_eq!(player.track().map(|t| t.encoded), Some(track.encoded.clone()));

        let end = serde_json::json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "9",
            "track": track,
            "reason": "finished",
        });
        node.handle_frame(&end.to_string()).unwrap();
        assert!(player.track().is_none());
    }

    #[test]
    fn a_fresh_session_resets_players_and_notifies() {
        let node = node();
        let player = node.player(GuildId::new(4));
        node.handle_frame(
            &serde_json::json!({
                "op": "event",
                "type": "TrackStartEvent",
                "guildId": "4",
                "track": sample_track("x"),
            })
            .to_string(),
        );
        assert!(player.track().is_some());

        let (events, mut received) = tokio::sync::mpsc::unbounded_channel();
        node.on_ready("s2".to_string(), false, &events);

        assert!(player.track().is_none());
        assert_eq!(received.try_recv().ok(), Some(NodeEvent::SessionLost));
        assert!(node.is_connected());
    }

    #[test]
    fn a_resumed_session_keeps_players() {
        let node = node();
        let player = node.player(GuildId::new(4));
        node.handle_frame(
            &serde_json::json!({
                "op": "event",
                "type": "TrackStartEvent",
                "guildId": "4",
                "track": sample_track("x"),
            })
            .to_string(),
        );

        let (events, mut received) = tokio::sync::mpsc::unbounded_channel();
        node.on_ready("s1".to_string(), true, &events);

        assert!(player.track().is_some());
        assert!(received.try_recv().is_err());
    }

    #[test]
    fn stats_and_garbage_produce_no_events() {
        let node = node();
        assert!(node
            .handle_frame(r#"{"op":"stats","players":0,"playingPlayers":0,"uptime":1}"#)
            .is_none());
        assert!(node.handle_frame("not json").is_none());
    }

    #[tokio::test]
    async fn player_requests_fail_without_a_session() {
        let node = node();
        let err = node.player(GuildId::new(3)).set_paused(true).await.unwrap_err();
        assert!(matches!(err, PlayerError::NotConnected));
        assert!(!node.is_connected());
    }
}

//! # Audio Module
//!
//! Motor de sesiones de música de Neo Bot.
//!
//! El audio no se decodifica aquí: lo reproduce un nodo Lavalink externo. Este
//! módulo decide *qué* suena en cada guild y mantiene esa decisión coherente
//! con lo que el nodo informa de forma asíncrona.
//!
//! ## Architecture
//!
//! ### [`session`] - Music Session
//! - Máquina de estados por guild: `Idle`, `Playing`, `Paused`
//! - Cola FIFO y pista actual detrás de un único mutex asíncrono
//! - Reconciliación con los eventos de inicio y fin de pista
//!
//! ### [`service`] - Music Service
//! - Registro guild → sesión con creación perezosa
//! - Un worker por guild que procesa eventos en el orden del nodo
//! - Conexión de voz y búsqueda de pistas
//!
//! ### [`lavalink`] - Lavalink Node
//! - API REST v4 y websocket de eventos con reconexión
//! - Implementación de [`player::Player`] por guild
//!
//! ### [`announce`] - Now Playing
//! - Anuncio de la pista en el canal vinculado
//! - Color dominante de la carátula, con gris neutro de respaldo
//!
//! ## Request provenance
//!
//! Cada pista entregada al nodo lleva una [`track::RequestMetadata`] serializada
//! en sus datos opacos: quién la pidió, cuándo y un identificador de petición
//! creciente. Cuando el nodo anuncia un inicio o un fin, ese identificador dice
//! si el evento corresponde a la pista actual o a una ya reemplazada.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let session = music.session(guild_id, text_channel_id);
//! let metadata = RequestMetadata::new(user_id);
//!
//! match session.play_or_enqueue(Arc::new(track), metadata).await? {
//!     PlayOutcome::Playing => println!("sonando"),
//!     PlayOutcome::Enqueued { position } => println!("en cola: #{}", position),
//! }
//!
//! session.pause().await?;
//! session.skip().await?;
//! ```

pub mod announce;
pub mod events;
pub mod lavalink;
pub mod player;
pub mod service;
pub mod session;
pub mod track;

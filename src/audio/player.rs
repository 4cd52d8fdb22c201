use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::audio::track::{RequestMetadata, Track};

/// Fallos del reproductor remoto de un guild.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("el nodo de audio no tiene una sesión activa")]
    NotConnected,

    #[error("el nodo rechazó la petición ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("error de transporte con el nodo: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("no se pudo codificar la petición: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Reproductor remoto de un guild.
///
/// Las operaciones asíncronas hablan con el nodo; las lecturas síncronas
/// devuelven el último estado conocido, sin ir a la red.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Player: Send + Sync {
    /// Asigna una pista al reproductor, reemplazando la actual.
    ///
    /// La metadata es obligatoria: toda pista entregada al nodo viaja con su
    /// procedencia adjunta.
    async fn play(&self, track: &Track, metadata: &RequestMetadata) -> Result<(), PlayerError>;

    async fn set_paused(&self, paused: bool) -> Result<(), PlayerError>;

    /// Volumen en porcentaje. El nodo decide qué rango acepta.
    async fn set_volume(&self, volume: i32) -> Result<(), PlayerError>;

    /// Deja el reproductor sin pista asignada.
    async fn clear_track(&self) -> Result<(), PlayerError>;

    /// Elimina el reproductor del nodo.
    async fn destroy(&self) -> Result<(), PlayerError>;

    fn position(&self) -> Duration;

    fn paused(&self) -> bool;
}

/// Reproductor en memoria que registra las órdenes recibidas.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FakePlayer {
    calls: parking_lot::Mutex<Vec<String>>,
    track: parking_lot::Mutex<Option<Track>>,
    paused: std::sync::atomic::AtomicBool,
    failing: std::sync::atomic::AtomicBool,
    position: parking_lot::Mutex<Duration>,
}

#[cfg(test)]
impl FakePlayer {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn track(&self) -> Option<Track> {
        self.track.lock().clone()
    }

    pub(crate) fn set_position(&self, position: Duration) {
        *self.position.lock() = position;
    }

    /// La pista tal y como el nodo la devolvería en sus eventos.
    pub(crate) fn assigned(&self) -> Track {
        self.track.lock().clone().expect("no hay pista asignada")
    }

    fn record(&self, call: String) -> Result<(), PlayerError> {
        self.calls.lock().push(call);
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            Err(PlayerError::NotConnected)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Player for FakePlayer {
    async fn play(&self, track: &Track, metadata: &RequestMetadata) -> Result<(), PlayerError> {
        self.record(format!("play:{}", track.info.title))?;
        *self.track.lock() = Some(track.with_metadata(metadata));
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> Result<(), PlayerError> {
        self.record(format!("paused:{}", paused))?;
        self.paused.store(paused, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn set_volume(&self, volume: i32) -> Result<(), PlayerError> {
        self.record(format!("volume:{}", volume))
    }

    async fn clear_track(&self) -> Result<(), PlayerError> {
        self.record("clear".to_string())?;
        *self.track.lock() = None;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), PlayerError> {
        self.record("destroy".to_string())
    }

    fn position(&self) -> Duration {
        *self.position.lock()
    }

    fn paused(&self) -> bool {
        self.paused.load(std::sync::atomic::Ordering::SeqCst)
    }
}

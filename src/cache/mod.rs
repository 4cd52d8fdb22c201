//! # Cache Module
//!
//! Cache en memoria para resultados caros de recalcular.
//!
//! Hoy guarda el color dominante de cada carátula: descargar y decodificar la
//! imagen en cada anuncio de "reproduciendo" es lento, y la misma carátula se
//! repite cada vez que suena una canción del mismo álbum.
//!
//! ## Configuración
//!
//! ```env
//! ARTWORK_CACHE_SIZE=500      # Máximo de carátulas recordadas
//! ```
//!
//! Las entradas caducan a las 24 horas; al llenarse se descarta la más antigua.

pub mod ttl_cache;

use serenity::model::Colour;
use std::time::Duration;
use tracing::info;
use ttl_cache::TtlCache;

const ARTWORK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// URL de carátula → color dominante.
#[derive(Debug, Clone)]
pub struct ArtworkCache {
    inner: TtlCache<String, Colour>,
}

impl ArtworkCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: TtlCache::new(capacity, Some(ARTWORK_TTL)),
        }
    }

    pub fn get(&self, url: &str) -> Option<Colour> {
        self.inner.get(&url.to_string())
    }

    pub fn insert(&self, url: &str, colour: Colour) {
        self.inner.insert(url.to_string(), colour);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Mantenimiento periódico: elimina carátulas caducadas.
    pub fn cleanup_old_entries(&self) {
        let removed = self.inner.cleanup_expired();
        if removed > 0 {
            info!("🧹 Cache de carátulas: {} entradas caducadas eliminadas", removed);
        }
    }
}

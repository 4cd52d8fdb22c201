use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::{imageops, RgbImage};
use serenity::{
    builder::CreateMessage,
    http::Http,
    model::{
        id::{ChannelId, UserId},
        Colour,
    },
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::debug;

use crate::{audio::track::Track, cache::ArtworkCache, ui::embeds};

/// Gris neutro usado cuando la carátula no aporta color.
pub const FALLBACK_COLOUR: Colour = Colour::from_rgb(43, 45, 49);

/// Candidatos considerados al elegir el color de una carátula
const DOMINANT_CANDIDATES: usize = 5;
/// Lado de la miniatura que se analiza
const SAMPLE_SIZE: u32 = 64;

/// Quién pidió la pista, tal como se muestra en el anuncio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub name: String,
    pub avatar_url: String,
}

/// Todo lo necesario para pintar el anuncio de "reproduciendo".
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub track: Track,
    pub requester: Option<Requester>,
    pub colour: Colour,
}

/// Efectos hacia Discord que la sesión necesita al empezar una pista.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn resolve_requester(&self, user_id: UserId) -> Result<Requester>;

    async fn artwork_colour(&self, artwork_url: &str) -> Result<Colour>;

    async fn send_now_playing(&self, channel_id: ChannelId, now_playing: NowPlaying) -> Result<()>;
}

/// Anunciador real: HTTP de Discord más descarga de carátulas.
pub struct DiscordAnnouncer {
    http: Arc<Http>,
    client: reqwest::Client,
    artwork: ArtworkCache,
}

impl DiscordAnnouncer {
    pub fn new(http: Arc<Http>, artwork: ArtworkCache) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Error al crear el cliente HTTP de carátulas")?;

        Ok(Self {
            http,
            client,
            artwork,
        })
    }

    pub fn artwork_cache(&self) -> &ArtworkCache {
        &self.artwork
    }
}

#[async_trait]
impl Announcer for DiscordAnnouncer {
    async fn resolve_requester(&self, user_id: UserId) -> Result<Requester> {
        let user = self
            .http
            .get_user(user_id)
            .await
            .with_context(|| format!("Error al obtener el usuario {}", user_id))?;

        Ok(Requester {
            name: user.name.clone(),
            avatar_url: user.face(),
        })
    }

    async fn artwork_colour(&self, artwork_url: &str) -> Result<Colour> {
        if let Some(colour) = self.artwork.get(artwork_url) {
            return Ok(colour);
        }

        let bytes = self
            .client
            .get(artwork_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let colour = tokio::task::spawn_blocking(move || -> Result<Colour> {
            let image = image::load_from_memory(&bytes)?.to_rgb8();
            dominant_colour(&image).ok_or_else(|| anyhow!("la carátula no tiene píxeles"))
        })
        .await??;

        debug!("🎨 Color de carátula {}: #{:06X}", artwork_url, colour.0);
        self.artwork.insert(artwork_url, colour);
        Ok(colour)
    }

    async fn send_now_playing(&self, channel_id: ChannelId, now_playing: NowPlaying) -> Result<()> {
        let embed = embeds::create_now_playing_embed(&now_playing);
        channel_id
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await
            .context("Error al enviar el anuncio de reproducción")?;
        Ok(())
    }
}

/// Color más llamativo entre los más frecuentes de la imagen.
///
/// Agrupa píxeles en cubos de 16 niveles por canal, toma los cinco cubos más
/// poblados y se queda con el de mayor saturación × brillo.
pub fn dominant_colour(image: &RgbImage) -> Option<Colour> {
    if image.width() == 0 || image.height() == 0 {
        return None;
    }

    let sample = if image.width() > SAMPLE_SIZE || image.height() > SAMPLE_SIZE {
        imageops::thumbnail(image, SAMPLE_SIZE, SAMPLE_SIZE)
    } else {
        image.clone()
    };

    let mut buckets: HashMap<[u8; 3], Bucket> = HashMap::new();
    for pixel in sample.pixels() {
        let [r, g, b] = pixel.0;
        buckets.entry([r >> 4, g >> 4, b >> 4]).or_default().add(r, g, b);
    }

    let mut ranked: Vec<Bucket> = buckets.into_values().collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(DOMINANT_CANDIDATES);

    ranked
        .into_iter()
        .map(|bucket| bucket.average())
        .max_by(|a, b| vividness(*a).total_cmp(&vividness(*b)))
        .map(|[r, g, b]| Colour::from_rgb(r, g, b))
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    count: u64,
    sum: [u64; 3],
}

impl Bucket {
    fn add(&mut self, r: u8, g: u8, b: u8) {
        self.count += 1;
        self.sum[0] += u64::from(r);
        self.sum[1] += u64::from(g);
        self.sum[2] += u64::from(b);
    }

    fn average(&self) -> [u8; 3] {
        let count = self.count.max(1);
        self.sum.map(|channel| (channel / count) as u8)
    }
}

/// Saturación × brillo en HSV.
fn vividness([r, g, b]: [u8; 3]) -> f64 {
    let max = f64::from(r.max(g).max(b)) / 255.0;
    let min = f64::from(r.min(g).min(b)) / 255.0;
    if max == 0.0 {
        return 0.0;
    }
    let saturation = (max - min) / max;
    saturation * max
}

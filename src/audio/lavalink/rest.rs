use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serenity::model::id::GuildId;
use std::time::Duration;
use tracing::debug;

use super::model::{ErrorBody, LoadResult, UpdatePlayer};
use crate::audio::player::PlayerError;

/// Cliente REST del nodo. La sesión se fija al recibir `ready` y se
/// reemplaza en cada reconexión.
pub struct NodeRest {
    http: Client,
    base: String,
    password: String,
    session_id: RwLock<Option<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionUpdate {
    resuming: bool,
    timeout: u64,
}

impl NodeRest {
    pub fn new(base: String, password: String) -> Result<Self, PlayerError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("neo-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base,
            password,
            session_id: RwLock::new(None),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn set_session_id(&self, session_id: Option<String>) {
        *self.session_id.write() = session_id;
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base, path))
            .header(reqwest::header::AUTHORIZATION, &self.password)
    }

    fn player_path(&self, guild_id: GuildId) -> Result<String, PlayerError> {
        let session = self.session_id().ok_or(PlayerError::NotConnected)?;
        Ok(format!("/v4/sessions/{}/players/{}", session, guild_id))
    }

    /// Actualiza (o crea) el reproductor del guild.
    pub async fn update_player(
        &self,
        guild_id: GuildId,
        body: &UpdatePlayer<'_>,
    ) -> Result<(), PlayerError> {
        let path = self.player_path(guild_id)?;
        debug!("🔧 PATCH {} para guild {}", path, guild_id);

        let response = self
            .request(Method::PATCH, &path)
            .query(&[("noReplace", "false")])
            .json(body)
            .send()
            .await?;

        check(response).await.map(drop)
    }

    pub async fn destroy_player(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let path = self.player_path(guild_id)?;
        let response = self.request(Method::DELETE, &path).send().await?;
        check(response).await.map(drop)
    }

    /// Permite recuperar los reproductores si el websocket se cae.
    pub async fn enable_resuming(&self, timeout: Duration) -> Result<(), PlayerError> {
        let session = self.session_id().ok_or(PlayerError::NotConnected)?;
        let response = self
            .request(Method::PATCH, &format!("/v4/sessions/{}", session))
            .json(&SessionUpdate {
                resuming: true,
                timeout: timeout.as_secs(),
            })
            .send()
            .await?;

        check(response).await.map(drop)
    }

    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, PlayerError> {
        let response = self
            .request(Method::GET, "/v4/loadtracks")
            .query(&[("identifier", identifier)])
            .send()
            .await?;

        let response = check(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn check(response: Response) -> Result<Response, PlayerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) if !body.message.is_empty() => body.message,
        _ => status.canonical_reason().unwrap_or("desconocido").to_string(),
    };

    Err(PlayerError::Rejected {
        status: status.as_u16(),
        message,
    })
}

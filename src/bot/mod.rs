//! # Bot Module
//!
//! Capa de Discord de Neo Bot.
//!
//! This module contains the Discord-facing logic, including:
//! - Command registration per guild, driven by the enabled modules
//! - Slash command handling (base, moderation and music)
//! - Voice co-location checks before touching a music session
//! - Session eviction when the bot leaves a voice channel
//!
//! ## Architecture
//!
//! The bot is built around the [`NeoBot`] struct which implements
//! Serenity's [`EventHandler`] trait. It holds:
//!
//! - The music engine through [`MusicService`]
//! - Per-guild feature toggles via [`ModuleManager`]
//! - The loaded [`Config`]
//!
//! Handlers receive `&NeoBot` directly. The only value stored in serenity's
//! `TypeMap` is the shard manager, which exists after the client is built.
//!
//! ## Example
//!
//! ```rust,ignore
//! let bot = NeoBot::new(config, music, modules);
//! let mut client = Client::builder(&token, intents)
//!     .event_handler(bot)
//!     .register_songbird()
//!     .await?;
//! ```

use anyhow::Result;
use serenity::{
    all::{ActivityData, Context, EventHandler, Guild, GuildId, Interaction, Ready, VoiceState},
    async_trait,
    gateway::ShardManager,
    http::Http,
    prelude::TypeMapKey,
};
use std::{sync::Arc, time::Instant};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;
pub mod moderation;
pub mod voice;

use crate::{audio::service::MusicService, cache::ArtworkCache, config::Config, modules::ModuleManager};

/// Clave del shard manager en el `TypeMap` del cliente
pub struct ShardManagerKey;

impl TypeMapKey for ShardManagerKey {
    type Value = Arc<ShardManager>;
}

/// Manejador de eventos de Discord para Neo Bot.
pub struct NeoBot {
    config: Arc<Config>,
    pub music: Arc<MusicService>,
    pub modules: Arc<ModuleManager>,
    pub started_at: Instant,
}

impl NeoBot {
    pub fn new(config: Arc<Config>, music: Arc<MusicService>, modules: Arc<ModuleManager>) -> Self {
        Self {
            config,
            music,
            modules,
            started_at: Instant::now(),
        }
    }

    /// Con `GUILD_ID` definido solo se gestionan los comandos de ese guild.
    fn manages_guild(&self, guild_id: GuildId) -> bool {
        self.config
            .guild_id
            .map_or(true, |id| id == guild_id.get())
    }

    /// Sobrescribe los comandos del guild con los de sus módulos activos.
    pub async fn sync_commands(&self, http: &Http, guild_id: GuildId) -> Result<()> {
        if !self.manages_guild(guild_id) {
            debug!("Guild {} fuera de GUILD_ID, comandos sin tocar", guild_id);
            return Ok(());
        }

        let modules = self.modules.enabled_modules(guild_id).await?;
        commands::sync_guild_commands(http, guild_id, &modules).await
    }
}

#[async_trait]
impl EventHandler for NeoBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::listening("/play")));

        for guild in &ready.guilds {
            if let Err(e) = self.sync_commands(&ctx.http, guild.id).await {
                error!("❌ Error registrando comandos en guild {}: {:?}", guild.id, e);
            }
        }
    }

    /// Los guilds nuevos reciben los comandos de los módulos globales.
    async fn guild_create(&self, ctx: Context, guild: Guild, is_new: Option<bool>) {
        if is_new != Some(true) {
            return;
        }

        info!("🏠 Añadido a guild {} ({})", guild.name, guild.id);
        if let Err(e) = self.sync_commands(&ctx.http, guild.id).await {
            error!("❌ Error registrando comandos en guild {}: {:?}", guild.id, e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            let name = command.data.name.clone();
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando /{}: {:?}", name, e);
            }
        }
    }

    /// Si el bot sale del canal de voz, la sesión del guild se elimina.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };

        info!("🔌 Bot desconectado en guild {}", guild_id);

        if let Some(manager) = songbird::get(&ctx).await {
            if manager.get(guild_id).is_some() {
                if let Err(e) = manager.remove(guild_id).await {
                    warn!("No se pudo cerrar la llamada de guild {}: {:?}", guild_id, e);
                }
            }
        }

        self.music.remove_session(guild_id).await;
    }
}

/// Limpieza periódica de la cache de carátulas.
pub async fn maintenance_tasks(artwork: ArtworkCache) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600)); // Cada hora

    loop {
        interval.tick().await;

        artwork.cleanup_old_entries();

        info!("🧹 Tareas de mantenimiento completadas");
    }
}

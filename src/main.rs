use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info};

mod audio;
mod bot;
mod cache;
mod config;
mod modules;
mod storage;
mod ui;

use crate::audio::announce::DiscordAnnouncer;
use crate::audio::lavalink::{LavalinkNode, NodeConfig};
use crate::audio::service::{MusicService, MusicSettings};
use crate::bot::{NeoBot, ShardManagerKey};
use crate::cache::ArtworkCache;
use crate::config::Config;
use crate::modules::ModuleManager;
use crate::storage::JsonStorage;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("neo_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🤖 Iniciando Neo Bot v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Inicializar almacenamiento JSON
    let storage = JsonStorage::new(config.guilds_dir()).await?;
    info!("{}", storage.get_storage_stats().await?);
    info!("💾 {} guilds con ajustes guardados", storage.list_guilds().len());
    let modules = Arc::new(ModuleManager::new(Arc::new(tokio::sync::Mutex::new(storage))));

    // El nodo necesita el ID del bot antes de conectar
    let http = Arc::new(Http::new(&config.discord_token));
    let user_id = http.get_current_user().await?.id;

    // Inicializar Lavalink
    info!("🎼 Inicializando Lavalink...");
    let node = Arc::new(LavalinkNode::new(NodeConfig {
        host: config.lavalink_host.clone(),
        port: config.lavalink_port,
        password: config.lavalink_password.clone(),
        secure: config.lavalink_secure,
        user_id,
        reconnect_attempts: config.lavalink_reconnect_attempts,
        default_volume: config.default_volume,
    })?);

    let (events_tx, events_rx) = unbounded_channel();
    match node.connect(events_tx).await {
        Ok(()) => info!("✅ Lavalink inicializado exitosamente"),
        Err(e) => error!("❌ Error al inicializar Lavalink: {}. Reintentando en segundo plano", e),
    }

    let announcer = DiscordAnnouncer::new(Arc::clone(&http), ArtworkCache::new(config.artwork_cache_size))?;
    tokio::spawn(bot::maintenance_tasks(announcer.artwork_cache().clone()));

    let music = Arc::new(MusicService::with_node(
        node,
        Arc::new(announcer),
        MusicSettings {
            max_queue_size: config.max_queue_size,
            search_prefix: config.search_prefix.clone(),
        },
    ));
    tokio::spawn(Arc::clone(&music).run_router(events_rx));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES;

    // Crear handler del bot
    let handler = NeoBot::new(Arc::clone(&config), Arc::clone(&music), modules);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    client
        .data
        .write()
        .await
        .insert::<ShardManagerKey>(Arc::clone(&client.shard_manager));

    // Manejar shutdown graceful
    let shard_manager = Arc::clone(&client.shard_manager);
    let shutdown_music = Arc::clone(&music);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown_music.shutdown();
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

use anyhow::{anyhow, Context as _, Result};
use serenity::{
    builder::{CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::{CommandDataOption, CommandDataOptionValue, CommandInteraction},
        guild::Role,
        id::{ChannelId, GuildId},
        user::User,
    },
    prelude::Context,
};
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, warn};

use super::{moderation, voice, NeoBot, ShardManagerKey};
use crate::{
    audio::{
        session::{MusicError, MusicSession, PlayOutcome, SkipOutcome, StartNotice},
        track::RequestMetadata,
    },
    modules::{Module, ModuleError},
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &NeoBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond_error(ctx, &command, "Este comando solo funciona en servidores").await;
    };

    let name = command.data.name.as_str();
    info!("📝 Comando /{} usado por {} en guild {}", name, command.user.name, guild_id);

    if !bot.modules.allows_command(guild_id, name).await? {
        let module = Module::of_command(name).map_or("desconocido", |module| module.name());
        return respond_error(
            ctx,
            &command,
            &format!("El módulo **{}** no está activo en este servidor", module),
        )
        .await;
    }

    let result = match name {
        // Base
        "ping" => handle_ping(ctx, &command, bot).await,
        "module" => handle_module(ctx, &command, bot, guild_id).await,
        "avatar" => handle_avatar(ctx, &command).await,
        "whois" => handle_whois(ctx, &command, guild_id).await,

        // Moderación
        "ban" => moderation::handle_ban(ctx, &command, guild_id).await,
        "kick" => moderation::handle_kick(ctx, &command, guild_id).await,
        "softban" => moderation::handle_softban(ctx, &command, guild_id).await,
        "purge" => moderation::handle_purge(ctx, &command, guild_id).await,

        // Música
        "play" => handle_play(ctx, &command, bot, guild_id).await,
        "pause" => handle_pause(ctx, &command, bot, guild_id).await,
        "resume" => handle_resume(ctx, &command, bot, guild_id).await,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await,
        "volume" => handle_volume(ctx, &command, bot, guild_id).await,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await,
        "nowplaying" => handle_nowplaying(ctx, &command, bot, guild_id).await,
        "clear" => handle_clear(ctx, &command, bot, guild_id).await,
        "leave" => handle_leave(ctx, &command, bot, guild_id).await,

        _ => respond_error(ctx, &command, "Comando no reconocido").await,
    };

    if let Err(e) = &result {
        report_error(ctx, &command, &e.to_string()).await;
    }

    result
}

// Comandos base

async fn handle_ping(ctx: &Context, command: &CommandInteraction, bot: &NeoBot) -> Result<()> {
    let started = Instant::now();
    defer(ctx, command, false).await?;
    let response = started.elapsed();

    let shard_manager = ctx.data.read().await.get::<ShardManagerKey>().cloned();
    let gateway = match shard_manager {
        Some(manager) => manager
            .runners
            .lock()
            .await
            .get(&ctx.shard_id)
            .and_then(|runner| runner.latency),
        None => None,
    };

    let embed = embeds::create_ping_embed(
        gateway,
        response,
        bot.started_at.elapsed(),
        bot.music.node_connected(),
        bot.music.session_count(),
    );
    edit_embed(ctx, command, embed).await
}

async fn handle_module(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<()> {
    let subcommand = command
        .data
        .options
        .first()
        .ok_or_else(|| anyhow!("Falta el subcomando"))?;
    let options = match &subcommand.value {
        CommandDataOptionValue::SubCommand(options) => options.as_slice(),
        _ => &[],
    };

    defer(ctx, command, true).await?;

    let embed = match subcommand.name.as_str() {
        "enable" | "disable" => {
            let id = option_str(options, "module").ok_or_else(|| anyhow!("Falta el módulo"))?;
            let enable = subcommand.name == "enable";
            let result = if enable {
                bot.modules.enable(guild_id, id).await
            } else {
                bot.modules.disable(guild_id, id).await
            };

            match result {
                Ok(changed) => {
                    if changed {
                        bot.sync_commands(&ctx.http, guild_id).await?;
                    }
                    module_toggle_embed(id, enable, changed)
                }
                Err(e) => match e.downcast_ref::<ModuleError>() {
                    Some(module_error) => embeds::create_error_embed("Módulo", &module_error.to_string()),
                    None => return Err(e),
                },
            }
        }
        _ => embeds::create_modules_embed(&bot.modules.enabled_modules(guild_id).await?),
    };

    edit_embed(ctx, command, embed).await
}

fn module_toggle_embed(id: &str, enable: bool, changed: bool) -> CreateEmbed {
    let name = Module::from_id(id).map_or(id, |module| module.name());
    match (enable, changed) {
        (true, true) => embeds::create_success_embed("Módulo activado", &format!("**{}** está activo", name)),
        (false, true) => {
            embeds::create_success_embed("Módulo desactivado", &format!("**{}** ya no está activo", name))
        }
        (true, false) => embeds::create_info_embed("Sin cambios", &format!("**{}** ya estaba activo", name)),
        (false, false) => embeds::create_info_embed("Sin cambios", &format!("**{}** no estaba activo", name)),
    }
}

async fn handle_avatar(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    let user = option_user(command, "user").unwrap_or_else(|_| command.user.clone());
    respond_embed(ctx, command, embeds::create_avatar_embed(&user), false).await
}

async fn handle_whois(ctx: &Context, command: &CommandInteraction, guild_id: GuildId) -> Result<()> {
    let user = option_user(command, "user")?;

    let member = match guild_id.member(ctx, user.id).await {
        Ok(member) => Some(member),
        Err(e) => {
            debug!("{} no es miembro de guild {}: {}", user.id, guild_id, e);
            None
        }
    };

    let roles: Vec<Role> = match (&member, guild_id.to_guild_cached(&ctx.cache)) {
        (Some(member), Some(guild)) => member
            .roles
            .iter()
            .filter_map(|role_id| guild.roles.get(role_id).cloned())
            .collect(),
        _ => Vec::new(),
    };

    let embed = embeds::create_whois_embed(&user, member.as_ref(), &roles);
    respond_embed(ctx, command, embed, false).await
}

// Comandos de música

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = option_str(&command.data.options, "query")
        .ok_or_else(|| anyhow!("Query no proporcionado"))?;

    // Verificar que el usuario esté en un canal de voz
    let (user_channel, bot_channel) = match voice::voice_channels(ctx, guild_id, command.user.id) {
        Ok(channels) => channels,
        Err(e) => return respond_error(ctx, command, &e.to_string()).await,
    };
    let voice_channel = match voice::check_same_channel(user_channel, bot_channel) {
        Ok(channel) => channel,
        Err(e) => return respond_error(ctx, command, &e.to_string()).await,
    };

    // Defer la respuesta ya que puede tomar tiempo
    defer(ctx, command, false).await?;

    if bot_channel.is_none() {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow!("Songbird no inicializado"))?;
        bot.music.join(&manager, guild_id, voice_channel).await?;
    }

    let loaded = bot.music.load_tracks(query).await?;
    let mut tracks = loaded.tracks.into_iter();
    let Some(first) = tracks.next() else {
        let embed = embeds::create_error_embed(
            "Sin resultados",
            &format!("No se encontró nada para `{}`", query),
        );
        return edit_embed(ctx, command, embed).await;
    };

    let session = bot.music.session(guild_id, command.channel_id);
    let first = Arc::new(first);
    let outcome = session
        .play_or_enqueue_with(
            Arc::clone(&first),
            RequestMetadata::new(command.user.id),
            StartNotice::SuppressIfImmediate,
        )
        .await?;

    let embed = match (loaded.playlist, outcome) {
        (Some(name), _) => {
            let added = 1 + enqueue_rest(&session, tracks, command).await?;
            embeds::create_playlist_added_embed(&name, added)
        }
        (None, PlayOutcome::Playing) => embeds::create_playing_embed(&first),
        (None, PlayOutcome::Enqueued { position }) => embeds::create_track_added_embed(&first, position),
    };

    edit_embed(ctx, command, embed).await
}

/// Encola el resto de una playlist hasta que se acaba o la cola se llena.
async fn enqueue_rest(
    session: &MusicSession,
    tracks: impl Iterator<Item = crate::audio::track::Track>,
    command: &CommandInteraction,
) -> Result<usize> {
    let mut added = 0;
    for track in tracks {
        match session
            .play_or_enqueue(Arc::new(track), RequestMetadata::new(command.user.id))
            .await
        {
            Ok(_) => added += 1,
            Err(MusicError::QueueFull { max }) => {
                warn!("Cola llena ({}) en guild {}, playlist recortada", max, session.guild_id());
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(added)
}

async fn handle_pause(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = playing_session(ctx, command, bot, guild_id).await? else {
        return Ok(());
    };

    session.pause().await?;
    respond_message(ctx, command, "⏸️ Reproducción pausada").await
}

async fn handle_resume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = playing_session(ctx, command, bot, guild_id).await? else {
        return Ok(());
    };

    session.resume().await?;
    respond_message(ctx, command, "▶️ Reproducción reanudada").await
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = voice_session(ctx, command, bot, guild_id).await? else {
        return Ok(());
    };

    let message = match session.skip().await? {
        SkipOutcome::Stopped => "⏹️ No quedan canciones en cola, reproducción detenida".to_string(),
        SkipOutcome::Playing(track) => format!("⏭️ Saltada. Ahora suena **{}**", track.info.title),
    };
    respond_message(ctx, command, &message).await
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = playing_session(ctx, command, bot, guild_id).await? else {
        return Ok(());
    };

    session.stop().await?;
    respond_message(ctx, command, "⏹️ Reproducción detenida").await
}

async fn handle_volume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<()> {
    let level = option_i64(&command.data.options, "level")
        .ok_or_else(|| anyhow!("Falta el nivel de volumen"))?;
    let Some(session) = voice_session(ctx, command, bot, guild_id).await? else {
        return Ok(());
    };

    let level = i32::try_from(level).context("Volumen fuera de rango")?;
    session.volume(level).await?;
    respond_message(ctx, command, &format!("🔊 Volumen ajustado a {}%", level)).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<()> {
    let page = option_i64(&command.data.options, "page").unwrap_or(1).max(1) as usize;

    let embed = match bot.music.get_session(guild_id) {
        Some(session) => {
            let current = session.current_track().await;
            let queue = session.queue().await;
            embeds::create_queue_embed(current.as_ref(), &queue, page)
        }
        None => embeds::create_queue_embed(None, &[], page),
    };

    respond_embed(ctx, command, embed, false).await
}

async fn handle_nowplaying(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<()> {
    let session = bot.music.get_session(guild_id);
    let current = match &session {
        Some(session) => session.current_track().await,
        None => None,
    };
    let (Some(session), Some(current)) = (session, current) else {
        return respond_error(ctx, command, "No hay nada reproduciéndose actualmente").await;
    };

    let embed = embeds::create_progress_embed(
        &current,
        session.position().await,
        session.remaining().await,
        session.state().await,
    );
    respond_embed(ctx, command, embed, false).await
}

async fn handle_clear(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = voice_session(ctx, command, bot, guild_id).await? else {
        return Ok(());
    };

    let removed = session.clear().await;
    respond_message(ctx, command, &format!("🗑️ Se quitaron {} canciones de la cola", removed)).await
}

async fn handle_leave(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<()> {
    if let Err(e) = voice::require_same_channel(ctx, guild_id, command.user.id) {
        return respond_error(ctx, command, &e.to_string()).await;
    }

    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow!("Songbird no inicializado"))?;
    bot.music.leave(&manager, guild_id).await?;

    respond_message(ctx, command, "👋 Desconectado del canal de voz").await
}

// Funciones auxiliares

/// Sesión del guild si el usuario comparte canal con el bot. Si no, responde
/// con el motivo y devuelve `None`.
async fn voice_session(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<Option<Arc<MusicSession>>> {
    if let Err(e) = voice::require_same_channel(ctx, guild_id, command.user.id) {
        respond_error(ctx, command, &e.to_string()).await?;
        return Ok(None);
    }

    match bot.music.get_session(guild_id) {
        Some(session) => Ok(Some(session)),
        None => {
            respond_error(ctx, command, "No hay nada reproduciéndose actualmente").await?;
            Ok(None)
        }
    }
}

/// Como [`voice_session`], pero además exige una pista sonando.
async fn playing_session(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NeoBot,
    guild_id: GuildId,
) -> Result<Option<Arc<MusicSession>>> {
    let Some(session) = voice_session(ctx, command, bot, guild_id).await? else {
        return Ok(None);
    };

    if session.current_track().await.is_none() {
        respond_error(ctx, command, "No hay nada reproduciéndose actualmente").await?;
        return Ok(None);
    }
    Ok(Some(session))
}

pub(super) fn option_str<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a str> {
    options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

pub(super) fn option_i64(options: &[CommandDataOption], name: &str) -> Option<i64> {
    options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

pub(super) fn option_channel(options: &[CommandDataOption], name: &str) -> Option<ChannelId> {
    options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_channel_id())
}

/// Usuario resuelto de una opción de tipo usuario
pub(super) fn option_user(command: &CommandInteraction, name: &str) -> Result<User> {
    let user_id = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_user_id())
        .ok_or_else(|| anyhow!("Falta la opción `{}`", name))?;

    command
        .data
        .resolved
        .users
        .get(&user_id)
        .cloned()
        .ok_or_else(|| anyhow!("Usuario {} no resuelto", user_id))
}

pub(super) async fn defer(ctx: &Context, command: &CommandInteraction, ephemeral: bool) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new().ephemeral(ephemeral)),
        )
        .await?;
    Ok(())
}

pub(super) async fn edit_embed(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

async fn respond_embed(
    ctx: &Context,
    command: &CommandInteraction,
    embed: CreateEmbed,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

async fn respond_message(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().content(content)),
        )
        .await?;
    Ok(())
}

async fn respond_error(ctx: &Context, command: &CommandInteraction, message: &str) -> Result<()> {
    respond_embed(ctx, command, embeds::create_error_embed("Error", message), true).await
}

/// Informa del error al usuario, haya respuesta previa o no.
async fn report_error(ctx: &Context, command: &CommandInteraction, message: &str) {
    if respond_error(ctx, command, message).await.is_ok() {
        return;
    }

    let embed = embeds::create_error_embed("Error", message);
    if let Err(e) = edit_embed(ctx, command, embed).await {
        warn!("No se pudo informar del error en /{}: {}", command.data.name, e);
    }
}

use anyhow::Result;
use serenity::{
    builder::GetMessages,
    model::{
        application::CommandInteraction,
        id::{GuildId, MessageId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use super::handlers::{defer, edit_embed, option_channel, option_i64, option_str, option_user};
use crate::ui::embeds;

const DEFAULT_REASON: &str = "Sin motivo.";
/// Días de mensajes que se borran al banear si no se indica otra cosa
const DEFAULT_DELETE_DAYS: u8 = 7;
/// Discord no borra en bloque mensajes con más de 14 días
const BULK_DELETE_MAX_AGE_SECS: i64 = 14 * 24 * 60 * 60;

pub async fn handle_ban(ctx: &Context, command: &CommandInteraction, guild_id: GuildId) -> Result<()> {
    let user = option_user(command, "user")?;
    let reason = option_str(&command.data.options, "reason").unwrap_or(DEFAULT_REASON);
    let days = option_i64(&command.data.options, "days")
        .map_or(DEFAULT_DELETE_DAYS, |days| days.clamp(0, 7) as u8);

    defer(ctx, command, true).await?;

    let embed = match guild_id.ban_with_reason(&ctx.http, user.id, days, reason).await {
        Ok(()) => {
            info!("🔨 {} baneado en guild {} por {}", user.tag(), guild_id, command.user.name);
            embeds::create_success_embed(
                "Usuario baneado",
                &format!("{} baneado por `{}`", user.tag(), reason),
            )
        }
        Err(e) => {
            warn!("No se pudo banear a {} en guild {}: {}", user.id, guild_id, e);
            embeds::create_error_embed("Error", "No se pudo banear al usuario.")
        }
    };

    edit_embed(ctx, command, embed).await
}

pub async fn handle_kick(ctx: &Context, command: &CommandInteraction, guild_id: GuildId) -> Result<()> {
    let user = option_user(command, "user")?;
    let reason = option_str(&command.data.options, "reason").unwrap_or(DEFAULT_REASON);

    defer(ctx, command, true).await?;

    let embed = match guild_id.kick_with_reason(&ctx.http, user.id, reason).await {
        Ok(()) => {
            info!("👢 {} expulsado de guild {} por {}", user.tag(), guild_id, command.user.name);
            embeds::create_success_embed(
                "Usuario expulsado",
                &format!("{} expulsado por `{}`", user.tag(), reason),
            )
        }
        Err(e) => {
            warn!("No se pudo expulsar a {} de guild {}: {}", user.id, guild_id, e);
            embeds::create_error_embed("Error", "No se pudo expulsar al usuario.")
        }
    };

    edit_embed(ctx, command, embed).await
}

/// Ban seguido de unban: el usuario puede volver, sus mensajes no.
pub async fn handle_softban(ctx: &Context, command: &CommandInteraction, guild_id: GuildId) -> Result<()> {
    let user = option_user(command, "user")?;
    let reason = option_str(&command.data.options, "reason").unwrap_or(DEFAULT_REASON);

    defer(ctx, command, true).await?;

    let result = async {
        guild_id
            .ban_with_reason(&ctx.http, user.id, DEFAULT_DELETE_DAYS, reason)
            .await?;
        guild_id.unban(&ctx.http, user.id).await
    }
    .await;

    let embed = match result {
        Ok(()) => {
            info!("🧹 {} softbaneado en guild {} por {}", user.tag(), guild_id, command.user.name);
            embeds::create_success_embed(
                "Usuario softbaneado",
                &format!("{} softbaneado por `{}`", user.tag(), reason),
            )
        }
        Err(e) => {
            warn!("No se pudo softbanear a {} en guild {}: {}", user.id, guild_id, e);
            embeds::create_error_embed("Error", "No se pudo softbanear al usuario.")
        }
    };

    edit_embed(ctx, command, embed).await
}

pub async fn handle_purge(ctx: &Context, command: &CommandInteraction, guild_id: GuildId) -> Result<()> {
    let amount = option_i64(&command.data.options, "amount")
        .unwrap_or(2)
        .clamp(2, 100) as u8;
    let author = option_user(command, "user").ok().map(|user| user.id);
    let channel_id = option_channel(&command.data.options, "channel").unwrap_or(command.channel_id);

    defer(ctx, command, true).await?;

    let messages = channel_id
        .messages(ctx, GetMessages::new().limit(amount))
        .await?;
    let ids = select_purgeable(
        messages
            .iter()
            .map(|message| (message.id, message.author.id, message.timestamp.unix_timestamp())),
        author,
        chrono::Utc::now().timestamp(),
    );

    let result = match ids.as_slice() {
        [] => Ok(()),
        [id] => channel_id.delete_message(&ctx.http, *id).await,
        _ => channel_id.delete_messages(&ctx.http, &ids).await,
    };

    let embed = match result {
        Ok(()) => {
            info!(
                "🗑️ {} mensajes borrados en canal {} de guild {}",
                ids.len(),
                channel_id,
                guild_id
            );
            embeds::create_success_embed(
                "Mensajes borrados",
                &format!("Se borraron **{}** mensajes.", ids.len()),
            )
        }
        Err(e) => {
            warn!("No se pudieron borrar mensajes en canal {}: {}", channel_id, e);
            embeds::create_error_embed(
                "Error",
                "No se pudieron borrar los mensajes. Revisa que el bot tenga permisos.",
            )
        }
    };

    edit_embed(ctx, command, embed).await
}

/// Mensajes que se pueden borrar: del autor pedido, si lo hay, y con menos
/// de 14 días.
fn select_purgeable(
    messages: impl IntoIterator<Item = (MessageId, UserId, i64)>,
    author: Option<UserId>,
    now: i64,
) -> Vec<MessageId> {
    messages
        .into_iter()
        .filter(|(_, message_author, _)| author.map_or(true, |author| author == *message_author))
        .filter(|(_, _, created)| now - created < BULK_DELETE_MAX_AGE_SECS)
        .map(|(id, _, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NOW: i64 = 1_700_000_000;
    const DAY: i64 = 24 * 60 * 60;

    fn message(id: u64, author: u64, age_days: i64) -> (MessageId, UserId, i64) {
        (MessageId::new(id), UserId::new(author), NOW - age_days * DAY)
    }

    #[test]
    fn recent_messages_are_purged() {
        let messages = vec![message(1, 10, 0), message(2, 11, 3), message(3, 10, 13)];
        assert_eq!(
            select_purgeable(messages, None, NOW),
            vec![MessageId::new(1), MessageId::new(2), MessageId::new(3)]
        );
    }

    #[test]
    fn messages_older_than_two_weeks_are_skipped() {
        let messages = vec![message(1, 10, 1), message(2, 10, 14), message(3, 10, 30)];
        assert_eq!(select_purgeable(messages, None, NOW), vec![MessageId::new(1)]);
    }

    #[test]
    fn author_filter_keeps_only_their_messages() {
        let messages = vec![message(1, 10, 0), message(2, 11, 0), message(3, 10, 0)];
        assert_eq!(
            select_purgeable(messages, Some(UserId::new(10)), NOW),
            vec![MessageId::new(1), MessageId::new(3)]
        );
    }
}

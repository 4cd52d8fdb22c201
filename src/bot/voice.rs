use serenity::{
    model::id::{ChannelId, GuildId, UserId},
    prelude::Context,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoiceCheckError {
    #[error("Debes estar en un canal de voz")]
    NotInVoice,

    #[error("Debes estar en el mismo canal de voz que el bot (<#{0}>)")]
    DifferentChannel(ChannelId),

    #[error("Servidor no encontrado en caché")]
    GuildNotCached,
}

/// Comprueba que el usuario comparte canal con el bot.
///
/// Si el bot no está conectado basta con que el usuario esté en un canal.
/// Devuelve el canal del usuario.
pub fn check_same_channel(
    user_channel: Option<ChannelId>,
    bot_channel: Option<ChannelId>,
) -> Result<ChannelId, VoiceCheckError> {
    let user_channel = user_channel.ok_or(VoiceCheckError::NotInVoice)?;
    match bot_channel {
        Some(bot_channel) if bot_channel != user_channel => {
            Err(VoiceCheckError::DifferentChannel(bot_channel))
        }
        _ => Ok(user_channel),
    }
}

/// Canales de voz actuales del usuario y del bot según la caché.
pub fn voice_channels(
    ctx: &Context,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<(Option<ChannelId>, Option<ChannelId>), VoiceCheckError> {
    let bot_id = ctx.cache.current_user().id;
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or(VoiceCheckError::GuildNotCached)?;

    let channel_of = |id: UserId| guild.voice_states.get(&id).and_then(|state| state.channel_id);
    Ok((channel_of(user_id), channel_of(bot_id)))
}

/// Canal del usuario, si comparte canal con el bot.
pub fn require_same_channel(
    ctx: &Context,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<ChannelId, VoiceCheckError> {
    let (user_channel, bot_channel) = voice_channels(ctx, guild_id, user_id)?;
    check_same_channel(user_channel, bot_channel)
}

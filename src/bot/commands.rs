use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    http::Http,
    model::{application::CommandOptionType, id::GuildId, Permissions},
};
use tracing::info;

use crate::modules::Module;

/// Sobrescribe los comandos del guild con los de sus módulos activos
pub async fn sync_guild_commands(http: &Http, guild_id: GuildId, modules: &[Module]) -> Result<()> {
    let commands = build_commands(modules);
    let count = commands.len();

    guild_id.set_commands(http, commands).await?;

    info!("📝 {} comandos sincronizados en guild {}", count, guild_id);
    Ok(())
}

/// Comandos de los módulos indicados, en orden
pub fn build_commands(modules: &[Module]) -> Vec<CreateCommand> {
    modules
        .iter()
        .flat_map(|module| module_commands(*module))
        .collect()
}

pub fn module_commands(module: Module) -> Vec<CreateCommand> {
    match module {
        Module::Base => vec![ping_command(), module_command(), avatar_command(), whois_command()],
        Module::Moderation => vec![ban_command(), kick_command(), softban_command(), purge_command()],
        Module::Music => vec![
            play_command(),
            pause_command(),
            resume_command(),
            skip_command(),
            stop_command(),
            volume_command(),
            queue_command(),
            nowplaying_command(),
            clear_command(),
            leave_command(),
        ],
    }
}

// Comandos base

fn ping_command() -> CreateCommand {
    CreateCommand::new("ping").description("Muestra la latencia del bot")
}

fn module_command() -> CreateCommand {
    let module_option = || {
        let mut option =
            CreateCommandOption::new(CommandOptionType::String, "module", "Módulo a cambiar")
                .required(true);
        for module in Module::ALL.into_iter().filter(|module| !module.is_global()) {
            option = option.add_string_choice(module.name(), module.id());
        }
        option
    };

    CreateCommand::new("module")
        .description("Gestiona los módulos del servidor")
        .default_member_permissions(Permissions::ADMINISTRATOR)
        .add_option(
            CreateCommandOption::new(CommandOptionType::SubCommand, "enable", "Activa un módulo")
                .add_sub_option(module_option()),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::SubCommand, "disable", "Desactiva un módulo")
                .add_sub_option(module_option()),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::SubCommand,
            "list",
            "Muestra los módulos y su estado",
        ))
}

fn avatar_command() -> CreateCommand {
    CreateCommand::new("avatar")
        .description("Muestra el avatar de un usuario")
        .add_option(CreateCommandOption::new(
            CommandOptionType::User,
            "user",
            "Usuario (por defecto, tú)",
        ))
}

fn whois_command() -> CreateCommand {
    CreateCommand::new("whois")
        .description("Muestra información de un miembro")
        .add_option(
            CreateCommandOption::new(CommandOptionType::User, "user", "Miembro a consultar")
                .required(true),
        )
}

// Comandos de moderación

fn target_option() -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::User, "user", "Usuario afectado").required(true)
}

fn reason_option() -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::String, "reason", "Motivo").max_length(512)
}

fn ban_command() -> CreateCommand {
    CreateCommand::new("ban")
        .description("Banea a un usuario")
        .default_member_permissions(Permissions::BAN_MEMBERS)
        .add_option(target_option())
        .add_option(reason_option())
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "days",
                "Días de mensajes a borrar (0-7)",
            )
            .min_int_value(0)
            .max_int_value(7),
        )
}

fn kick_command() -> CreateCommand {
    CreateCommand::new("kick")
        .description("Expulsa a un usuario")
        .default_member_permissions(Permissions::KICK_MEMBERS)
        .add_option(target_option())
        .add_option(reason_option())
}

fn softban_command() -> CreateCommand {
    CreateCommand::new("softban")
        .description("Banea y desbanea a un usuario para borrar sus mensajes")
        .default_member_permissions(Permissions::BAN_MEMBERS)
        .add_option(target_option())
        .add_option(reason_option())
}

fn purge_command() -> CreateCommand {
    CreateCommand::new("purge")
        .description("Borra mensajes recientes del canal")
        .default_member_permissions(Permissions::MANAGE_MESSAGES)
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "amount", "Mensajes a revisar")
                .min_int_value(2)
                .max_int_value(100)
                .required(true),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::User,
            "user",
            "Solo mensajes de este usuario",
        ))
        .add_option(
            CreateCommandOption::new(CommandOptionType::Channel, "channel", "Canal (por defecto, este)")
                .channel_types(vec![serenity::model::channel::ChannelType::Text]),
        )
}

// Comandos de música

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción o playlist")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción pausada")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la canción actual sin vaciar la cola")
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Ajusta el volumen de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "level", "Nivel de volumen (0-1000)")
                .min_int_value(0)
                .max_int_value(1000)
                .required(true),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Muestra la cola de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Número de página")
                .min_int_value(1),
        )
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra información de la canción actual")
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Vacía la cola de reproducción")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Desconecta el bot del canal de voz")
}

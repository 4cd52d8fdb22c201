use serenity::{
    all::{Colour, Member, Role, Timestamp, User},
    builder::{CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{announce::NowPlaying, session::PlaybackState, track::QueuedTrack, track::Track},
    modules::Module,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🤖 Neo Bot";

/// Canciones por página en `/queue`
pub const QUEUE_PAGE_SIZE: usize = 10;
/// Una página entera de la cola cabe en los 1024 caracteres de un campo
const QUEUE_TITLE_MAX: usize = 40;
const QUEUE_AUTHOR_MAX: usize = 25;

/// Longitud máxima del título en el anuncio
const NOW_PLAYING_TITLE_LEN: usize = 30;

/// Anuncio que se envía al canal cuando el nodo empieza una pista
pub fn create_now_playing_embed(now_playing: &NowPlaying) -> CreateEmbed {
    let info = &now_playing.track.info;
    let title = truncate(&info.title, NOW_PLAYING_TITLE_LEN);
    let title = match &info.uri {
        Some(uri) => format!("**[{}]({})**", title, uri),
        None => format!("**{}**", title),
    };

    let mut embed = CreateEmbed::default()
        .title("🎶 Reproduciendo")
        .description(format!("{}\npor {}", title, info.author))
        .color(now_playing.colour);

    if let Some(artwork) = &info.artwork_url {
        embed = embed.thumbnail(artwork);
    }

    if let Some(requester) = &now_playing.requester {
        embed = embed.footer(
            CreateEmbedFooter::new(format!("Pedido por {}", requester.name))
                .icon_url(&requester.avatar_url),
        );
    }

    embed
}

/// Respuesta de `/play` cuando la pista empieza en el acto
pub fn create_playing_embed(track: &Track) -> CreateEmbed {
    track_embed(track)
        .title("🎵 Reproduciendo Ahora")
        .color(colors::SUCCESS_GREEN)
}

/// Respuesta de `/play` cuando la pista queda en cola
pub fn create_track_added_embed(track: &Track, position: usize) -> CreateEmbed {
    track_embed(track)
        .title("✅ Canción Agregada")
        .color(colors::SUCCESS_GREEN)
        .field("📋 Posición", format!("#{}", position), true)
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente cuando llegue su turno",
        ))
}

/// Crea un embed para mostrar que una playlist fue agregada
pub fn create_playlist_added_embed(name: &str, track_count: usize) -> CreateEmbed {
    let description = if track_count == 1 {
        format!("Se agregó **1 canción** de **{}**", name)
    } else {
        format!("Se agregaron **{} canciones** de **{}**", track_count, name)
    };

    CreateEmbed::default()
        .title("📋 Playlist Agregada")
        .description(description)
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(
            "🎵 Usa /queue para ver todas las canciones",
        ))
        .timestamp(Timestamp::now())
}

/// Crea un embed para mostrar la cola de reproducción
///
/// `page` empieza en 1; las páginas fuera de rango se ajustan a la última.
pub fn create_queue_embed(
    current: Option<&QueuedTrack>,
    queue: &[QueuedTrack],
    page: usize,
) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if current.is_none() && queue.is_empty() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = current {
        embed = embed.field(
            "▶️ Reproduciendo",
            format!(
                "**{}** - {} • <@{}>",
                truncate(current.title(), 100),
                truncate(&current.track.info.author, 50),
                current.metadata.author_id
            ),
            false,
        );
    }

    let total_pages = total_pages(queue.len());
    let page = page.clamp(1, total_pages);

    if !queue.is_empty() {
        let start = (page - 1) * QUEUE_PAGE_SIZE;
        let mut description = String::new();

        for (i, item) in queue.iter().enumerate().skip(start).take(QUEUE_PAGE_SIZE) {
            description.push_str(&format!(
                "**{}**. {} - {} `[{}]`\n",
                i + 1,
                truncate(item.title(), QUEUE_TITLE_MAX),
                truncate(&item.track.info.author, QUEUE_AUTHOR_MAX),
                format_track_length(&item.track)
            ));
        }

        embed = embed.field("Próximas canciones", description, false);
    }

    let queued: Duration = queue
        .iter()
        .filter(|item| !item.track.info.is_stream)
        .map(|item| item.track.duration())
        .sum();
    embed = embed.field(
        "Información",
        format!(
            "**Total:** {} canciones • **Duración:** {}",
            queue.len(),
            format_duration(queued)
        ),
        false,
    );

    let footer = if total_pages > 1 {
        format!("Página {} de {} • Neo Bot", page, total_pages)
    } else {
        STANDARD_FOOTER.to_string()
    };

    embed
        .footer(CreateEmbedFooter::new(footer))
        .timestamp(Timestamp::now())
}

/// Estado de la pista actual con barra de progreso, para `/nowplaying`
pub fn create_progress_embed(
    current: &QueuedTrack,
    position: Option<Duration>,
    remaining: Option<Duration>,
    state: PlaybackState,
) -> CreateEmbed {
    let track = &current.track;
    let position = position.unwrap_or_default();
    let status = match state {
        PlaybackState::Paused => "⏸️ En pausa",
        _ => "▶️ Reproduciendo",
    };

    let progress = if track.info.is_stream {
        format!("🔴 En vivo • {}", format_duration(position))
    } else {
        format!(
            "{} `{} / {}`",
            progress_bar(position, track.duration(), 20),
            format_duration(position),
            format_duration(track.duration())
        )
    };

    let mut embed = track_embed(track)
        .title(format!("🎵 {}", status))
        .color(colors::MUSIC_PURPLE)
        .field("📊 Progreso", progress, false)
        .field("👤 Solicitado por", format!("<@{}>", current.metadata.author_id), true);

    if let Some(remaining) = remaining {
        embed = embed.field("⏳ Restante", format_duration(remaining), true);
    }

    embed
}

/// Latencias del bot y estado del nodo de audio para `/ping`
pub fn create_ping_embed(
    gateway: Option<Duration>,
    response: Duration,
    uptime: Duration,
    lavalink_connected: bool,
    sessions: usize,
) -> CreateEmbed {
    let gateway = gateway.map_or("N/A".to_string(), |latency| format!("{}ms", latency.as_millis()));

    CreateEmbed::default()
        .title("🏓 Pong!")
        .description("\u{200B}")
        .field("Latencia API", format!("```{}```", gateway), true)
        .field("Latencia Bot", format!("```{}ms```", response.as_millis()), true)
        .field("Uptime", format!("```{}```", format_duration(uptime)), true)
        .field(
            "Lavalink",
            if lavalink_connected { "🟢 Conectado" } else { "🔴 Desconectado" },
            true,
        )
        .field("Sesiones de música", format!("```{}```", sessions), true)
        .color(Colour::from_rgb(43, 45, 49))
}

/// Listado de módulos con su estado en el guild
pub fn create_modules_embed(enabled: &[Module]) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🧩 Módulos")
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(
            "Usa /module enable o /module disable para cambiarlos",
        ));

    for module in Module::ALL {
        let status = if module.is_global() {
            "🌐 Global"
        } else if enabled.contains(&module) {
            "✅ Activo"
        } else {
            "❌ Inactivo"
        };

        embed = embed.field(
            format!("{} (`{}`)", module.name(), module.id()),
            format!("{}\n{}", module.description(), status),
            false,
        );
    }

    embed
}

/// Avatar de un usuario a tamaño completo
pub fn create_avatar_embed(user: &User) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("🖼️ Avatar de {}", user.name))
        .image(user.face())
        .color(colors::INFO_BLUE)
}

/// Ficha de un miembro para `/whois`
///
/// El color es el del rol más alto que tenga uno asignado.
pub fn create_whois_embed(user: &User, member: Option<&Member>, roles: &[Role]) -> CreateEmbed {
    let mut roles: Vec<&Role> = roles.iter().collect();
    roles.sort_by(|a, b| b.position.cmp(&a.position));

    let colour = roles
        .iter()
        .map(|role| role.colour)
        .find(|colour| colour.0 != 0)
        .unwrap_or(colors::NEUTRAL_GRAY);

    let mut embed = CreateEmbed::default()
        .author(CreateEmbedAuthor::new(&user.name).icon_url(user.face()))
        .thumbnail(user.face())
        .color(colour)
        .field("🆔 ID", user.id.to_string(), true)
        .field("🤖 Bot", if user.bot { "Sí" } else { "No" }, true)
        .field(
            "📅 Cuenta creada",
            format!("<t:{}:R>", user.id.created_at().unix_timestamp()),
            true,
        );

    if let Some(member) = member {
        if let Some(nick) = &member.nick {
            embed = embed.field("🏷️ Apodo", nick, true);
        }
        if let Some(joined_at) = member.joined_at {
            embed = embed.field("📥 Se unió", format!("<t:{}:R>", joined_at.unix_timestamp()), true);
        }
    }

    let roles = if roles.is_empty() {
        "Ninguno".to_string()
    } else {
        roles
            .iter()
            .map(|role| format!("<@&{}>", role.id))
            .collect::<Vec<_>>()
            .join(" ")
    };

    embed.field("🎭 Roles", roles, false)
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
}

pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
}

/// Número de páginas de la cola, nunca menor que 1
pub fn total_pages(queue_len: usize) -> usize {
    queue_len.div_ceil(QUEUE_PAGE_SIZE).max(1)
}

/// Barra de progreso de `width` segmentos
pub fn progress_bar(position: Duration, length: Duration, width: usize) -> String {
    let filled = if length.is_zero() {
        0
    } else {
        let ratio = position.as_secs_f64() / length.as_secs_f64();
        ((ratio.clamp(0.0, 1.0) * width as f64).round() as usize).min(width)
    };

    format!("{}🔘{}", "▬".repeat(filled), "▬".repeat(width - filled))
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn format_track_length(track: &Track) -> String {
    if track.info.is_stream {
        "🔴 En vivo".to_string()
    } else {
        format_duration(track.duration())
    }
}

/// Corta el texto a `max` caracteres, terminando en `…` si se cortó
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

fn track_embed(track: &Track) -> CreateEmbed {
    let info = &track.info;
    let mut embed = CreateEmbed::default()
        .description(format!("**{}**", info.title))
        .field("🎤 Artista", &info.author, true)
        .field("⏱️ Duración", format_track_length(track), true)
        .timestamp(Timestamp::now());

    if let Some(uri) = &info.uri {
        embed = embed.url(uri);
    }
    if let Some(artwork) = &info.artwork_url {
        embed = embed.thumbnail(artwork);
    }

    embed
}

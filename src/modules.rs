//! # Feature Modules
//!
//! Grupos de comandos que cada guild activa o desactiva por separado.
//!
//! ## Architecture
//!
//! - [`Module`] enumera los módulos conocidos y los comandos que aporta cada uno
//! - [`ModuleManager`] guarda el conjunto activo por guild en memoria y lo
//!   persiste a través de [`JsonStorage`]
//! - Los módulos globales están siempre activos y no se pueden desactivar
//!
//! El conjunto de comandos de un guild es la unión de los módulos globales y los
//! activados por el guild; la capa de comandos lo sobrescribe entero en Discord
//! tras cada cambio.

use anyhow::Result;
use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{collections::BTreeSet, fmt, sync::Arc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::storage::JsonStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Module {
    Base,
    Moderation,
    Music,
}

impl Module {
    pub const ALL: [Module; 3] = [Module::Base, Module::Moderation, Module::Music];

    pub fn id(self) -> &'static str {
        match self {
            Module::Base => "base",
            Module::Moderation => "moderation",
            Module::Music => "music",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Module::Base => "🚀 Base",
            Module::Moderation => "🛡️ Moderación",
            Module::Music => "🎵 Música",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Module::Base => "Comandos esenciales del bot",
            Module::Moderation => "Herramientas para moderar el servidor",
            Module::Music => "Reproducción de música en canales de voz",
        }
    }

    /// Un módulo global está activo en todos los guilds.
    pub fn is_global(self) -> bool {
        matches!(self, Module::Base)
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|module| module.id() == id)
    }

    /// Nombres de los comandos slash que aporta el módulo
    pub fn commands(self) -> &'static [&'static str] {
        match self {
            Module::Base => &["ping", "module", "avatar", "whois"],
            Module::Moderation => &["ban", "kick", "softban", "purge"],
            Module::Music => &[
                "play",
                "pause",
                "resume",
                "skip",
                "stop",
                "volume",
                "queue",
                "nowplaying",
                "clear",
                "leave",
            ],
        }
    }

    /// Módulo al que pertenece un comando
    pub fn of_command(command: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|module| module.commands().contains(&command))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModuleError {
    #[error("el módulo `{0}` no existe")]
    Unknown(String),

    #[error("el módulo `{0}` es global y no se puede desactivar")]
    Global(Module),
}

/// Estado de los módulos por guild.
pub struct ModuleManager {
    storage: Arc<Mutex<JsonStorage>>,
    enabled: DashMap<GuildId, BTreeSet<Module>>,
}

impl ModuleManager {
    pub fn new(storage: Arc<Mutex<JsonStorage>>) -> Self {
        Self {
            storage,
            enabled: DashMap::new(),
        }
    }

    /// Carga los módulos guardados de un guild. Los IDs desconocidos se ignoran.
    pub async fn load_guild(&self, guild_id: GuildId) -> Result<BTreeSet<Module>> {
        if let Some(modules) = self.enabled.get(&guild_id) {
            return Ok(modules.clone());
        }

        let settings = self.storage.lock().await.get_or_create(guild_id).await?;
        let modules = settings
            .enabled_modules
            .iter()
            .filter_map(|id| Module::from_id(id))
            .filter(|module| !module.is_global())
            .collect::<BTreeSet<_>>();

        self.enabled.insert(guild_id, modules.clone());
        Ok(modules)
    }

    /// Activa un módulo. Devuelve `false` si ya estaba activo.
    pub async fn enable(&self, guild_id: GuildId, id: &str) -> Result<bool> {
        let module = Module::from_id(id).ok_or_else(|| ModuleError::Unknown(id.to_string()))?;
        if module.is_global() || self.is_enabled(guild_id, module).await? {
            return Ok(false);
        }

        self.storage
            .lock()
            .await
            .enable_module(guild_id, module.id())
            .await?;
        self.enabled.entry(guild_id).or_default().insert(module);

        info!("🧩 Módulo {} activado en guild {}", module, guild_id);
        Ok(true)
    }

    /// Desactiva un módulo. Devuelve `false` si no estaba activo.
    pub async fn disable(&self, guild_id: GuildId, id: &str) -> Result<bool> {
        let module = Module::from_id(id).ok_or_else(|| ModuleError::Unknown(id.to_string()))?;
        if module.is_global() {
            return Err(ModuleError::Global(module).into());
        }
        if !self.is_enabled(guild_id, module).await? {
            return Ok(false);
        }

        self.storage
            .lock()
            .await
            .disable_module(guild_id, module.id())
            .await?;
        if let Some(mut modules) = self.enabled.get_mut(&guild_id) {
            modules.remove(&module);
        }

        info!("🧩 Módulo {} desactivado en guild {}", module, guild_id);
        Ok(true)
    }

    pub async fn is_enabled(&self, guild_id: GuildId, module: Module) -> Result<bool> {
        if module.is_global() {
            return Ok(true);
        }
        Ok(self.load_guild(guild_id).await?.contains(&module))
    }

    /// Módulos activos del guild, globales incluidos
    pub async fn enabled_modules(&self, guild_id: GuildId) -> Result<Vec<Module>> {
        let local = self.load_guild(guild_id).await?;
        Ok(Module::ALL
            .into_iter()
            .filter(|module| module.is_global() || local.contains(module))
            .collect())
    }

    /// Nombres de todos los comandos que el guild debe tener registrados
    pub async fn commands_for(&self, guild_id: GuildId) -> Result<Vec<&'static str>> {
        Ok(self
            .enabled_modules(guild_id)
            .await?
            .into_iter()
            .flat_map(|module| module.commands().iter().copied())
            .collect())
    }

    /// Indica si un comando puede ejecutarse en el guild
    pub async fn allows_command(&self, guild_id: GuildId, command: &str) -> Result<bool> {
        match Module::of_command(command) {
            Some(module) => self.is_enabled(guild_id, module).await,
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn manager(dir: &TempDir) -> ModuleManager {
        let storage = JsonStorage::new(dir.path().join("guilds")).await.unwrap();
        ModuleManager::new(Arc::new(Mutex::new(storage)))
    }

    const GUILD: GuildId = GuildId::new(10);

    #[test]
    fn modules_are_found_by_id_and_command() {
        assert_eq!(Module::from_id("music"), Some(Module::Music));
        assert_eq!(Module::from_id("nope"), None);
        assert_eq!(Module::of_command("softban"), Some(Module::Moderation));
        assert_eq!(Module::of_command("ping"), Some(Module::Base));
        assert_eq!(Module::of_command("shuffle"), None);
    }

    #[test]
    fn no_command_belongs_to_two_modules() {
        let mut seen = std::collections::HashSet::new();
        for module in Module::ALL {
            for command in module.commands() {
                assert!(seen.insert(*command), "comando repetido: {}", command);
            }
        }
    }

    #[tokio::test]
    async fn only_global_modules_are_enabled_by_default() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;

        assert_eq!(manager.enabled_modules(GUILD).await.unwrap(), vec![Module::Base]);
        assert_eq!(
            manager.commands_for(GUILD).await.unwrap(),
            vec!["ping", "module", "avatar", "whois"]
        );
        assert!(!manager.allows_command(GUILD, "play").await.unwrap());
    }

    #[tokio::test]
    async fn enabling_adds_the_module_commands() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;

        assert!(manager.enable(GUILD, "music").await.unwrap());
        assert!(!manager.enable(GUILD, "music").await.unwrap());

        assert!(manager.is_enabled(GUILD, Module::Music).await.unwrap());
        assert!(manager.allows_command(GUILD, "play").await.unwrap());
        let commands = manager.commands_for(GUILD).await.unwrap();
        assert!(commands.contains(&"nowplaying"));
        assert!(!commands.contains(&"ban"));
    }

    #[tokio::test]
    async fn unknown_modules_are_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;

        let err = manager.enable(GUILD, "karaoke").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ModuleError>(),
            Some(&ModuleError::Unknown("karaoke".to_string()))
        );
        assert!(manager.disable(GUILD, "karaoke").await.is_err());
    }

    #[tokio::test]
    async fn global_modules_cannot_be_disabled() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;

        let err = manager.disable(GUILD, "base").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ModuleError>(),
            Some(&ModuleError::Global(Module::Base))
        );
        assert!(!manager.enable(GUILD, "base").await.unwrap());
        assert!(manager.is_enabled(GUILD, Module::Base).await.unwrap());
    }

    #[tokio::test]
    async fn disabling_removes_the_module() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;

        manager.enable(GUILD, "moderation").await.unwrap();
        assert!(manager.disable(GUILD, "moderation").await.unwrap());
        assert!(!manager.disable(GUILD, "moderation").await.unwrap());
        assert!(!manager.is_enabled(GUILD, Module::Moderation).await.unwrap());
    }

    #[tokio::test]
    async fn toggles_survive_a_restart() {
        let dir = TempDir::new().unwrap();
        {
            let manager = manager(&dir).await;
            manager.enable(GUILD, "music").await.unwrap();
            manager.enable(GUILD, "moderation").await.unwrap();
            manager.disable(GUILD, "music").await.unwrap();
        }

        let manager = manager(&dir).await;
        assert_eq!(
            manager.enabled_modules(GUILD).await.unwrap(),
            vec![Module::Base, Module::Moderation]
        );
    }

    #[tokio::test]
    async fn guilds_are_independent() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir).await;

        manager.enable(GuildId::new(1), "music").await.unwrap();
        assert!(!manager.is_enabled(GuildId::new(2), Module::Music).await.unwrap());
    }
}

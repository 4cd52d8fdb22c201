use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};

/// Ajustes de un guild almacenados en JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: GuildId,
    /// IDs de los módulos activos, en el orden en que se activaron
    #[serde(default)]
    pub enabled_modules: Vec<String>,
}

impl GuildSettings {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            enabled_modules: Vec::new(),
        }
    }
}

/// Almacenamiento de ajustes por guild: un `guild_<id>.json` por guild.
pub struct JsonStorage {
    guilds_dir: PathBuf,
    cache: HashMap<GuildId, GuildSettings>,
}

impl JsonStorage {
    pub async fn new(guilds_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&guilds_dir)
            .await
            .with_context(|| format!("No se pudo crear {}", guilds_dir.display()))?;

        info!("📁 Storage inicializado en: {}", guilds_dir.display());

        let mut storage = Self {
            guilds_dir,
            cache: HashMap::new(),
        };

        storage.load_all().await?;

        Ok(storage)
    }

    /// Obtiene los ajustes de un guild, creándolos si no existen
    pub async fn get_or_create(&mut self, guild_id: GuildId) -> Result<GuildSettings> {
        if let Some(settings) = self.cache.get(&guild_id) {
            return Ok(settings.clone());
        }

        let path = self.file_path(guild_id);
        let settings = if fs::try_exists(&path).await.unwrap_or(false) {
            self.load(guild_id).await?
        } else {
            let settings = GuildSettings::new(guild_id);
            self.save(&settings).await?;
            info!("📝 Ajustes por defecto creados para guild {}", guild_id);
            settings
        };

        self.cache.insert(guild_id, settings.clone());
        Ok(settings)
    }

    /// Añade un módulo a la lista del guild. Activarlo dos veces no duplica.
    pub async fn enable_module(&mut self, guild_id: GuildId, module_id: &str) -> Result<GuildSettings> {
        let mut settings = self.get_or_create(guild_id).await?;
        if settings.enabled_modules.iter().any(|id| id == module_id) {
            return Ok(settings);
        }

        settings.enabled_modules.push(module_id.to_string());
        self.update(settings).await
    }

    pub async fn disable_module(&mut self, guild_id: GuildId, module_id: &str) -> Result<GuildSettings> {
        let mut settings = self.get_or_create(guild_id).await?;
        let before = settings.enabled_modules.len();
        settings.enabled_modules.retain(|id| id != module_id);
        if settings.enabled_modules.len() == before {
            return Ok(settings);
        }

        self.update(settings).await
    }

    /// Guilds con ajustes guardados
    pub fn list_guilds(&self) -> Vec<GuildId> {
        self.cache.keys().copied().collect()
    }

    /// Obtiene estadísticas de almacenamiento
    pub async fn get_storage_stats(&self) -> Result<StorageStats> {
        let mut files = fs::read_dir(&self.guilds_dir).await?;
        let mut file_count = 0;
        let mut total_size = 0;

        while let Some(entry) = files.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                file_count += 1;
                if let Ok(metadata) = entry.metadata().await {
                    total_size += metadata.len();
                }
            }
        }

        Ok(StorageStats {
            guild_files: file_count,
            cached_guilds: self.cache.len(),
            total_size_bytes: total_size,
            guilds_dir: self.guilds_dir.clone(),
        })
    }

    // Métodos privados

    async fn update(&mut self, settings: GuildSettings) -> Result<GuildSettings> {
        self.save(&settings).await?;
        debug!("💾 Ajustes actualizados para guild {}", settings.guild_id);
        self.cache.insert(settings.guild_id, settings.clone());
        Ok(settings)
    }

    async fn load(&self, guild_id: GuildId) -> Result<GuildSettings> {
        let path = self.file_path(guild_id);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("No se pudo leer {}", path.display()))?;
        let settings: GuildSettings = serde_json::from_str(&content)
            .with_context(|| format!("JSON inválido en {}", path.display()))?;
        Ok(settings)
    }

    async fn save(&self, settings: &GuildSettings) -> Result<()> {
        let path = self.file_path(settings.guild_id);
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&path, content)
            .await
            .with_context(|| format!("No se pudo escribir {}", path.display()))?;
        Ok(())
    }

    async fn load_all(&mut self) -> Result<()> {
        let mut files = fs::read_dir(&self.guilds_dir).await?;
        let mut loaded_count = 0;

        while let Some(entry) = files.next_entry().await? {
            let Some(guild_id) = guild_from_path(&entry.path()) else {
                continue;
            };

            match self.load(guild_id).await {
                Ok(settings) => {
                    self.cache.insert(guild_id, settings);
                    loaded_count += 1;
                }
                Err(e) => {
                    warn!("Error cargando ajustes para guild {}: {:#}", guild_id, e);
                }
            }
        }

        if loaded_count > 0 {
            info!("📂 Cargados ajustes de {} guilds", loaded_count);
        }

        Ok(())
    }

    fn file_path(&self, guild_id: GuildId) -> PathBuf {
        self.guilds_dir.join(format!("guild_{}.json", guild_id))
    }
}

fn guild_from_path(path: &std::path::Path) -> Option<GuildId> {
    if path.extension()? != "json" {
        return None;
    }
    let id: u64 = path.file_stem()?.to_str()?.strip_prefix("guild_")?.parse().ok()?;
    (id != 0).then(|| GuildId::new(id))
}

/// Estadísticas de almacenamiento
#[derive(Debug)]
pub struct StorageStats {
    pub guild_files: usize,
    pub cached_guilds: usize,
    pub total_size_bytes: u64,
    pub guilds_dir: PathBuf,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Storage: {} ({} archivos, {} en memoria, {:.2} KB)",
            self.guilds_dir.display(),
            self.guild_files,
            self.cached_guilds,
            self.total_size_bytes as f64 / 1024.0
        )
    }
}

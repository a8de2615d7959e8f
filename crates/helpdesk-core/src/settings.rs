use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    domain::GuildId,
    persist::{load_json, save_json},
    ports::SettingsStore,
    Result,
};

type GuildSettings = BTreeMap<String, BTreeMap<String, String>>;

/// File-backed settings: `{ "<guildId>": { "<name>": "<text>" } }`.
///
/// Loaded once at startup; every `set` rewrites the file.
pub struct JsonSettingsStore {
    path: PathBuf,
    data: RwLock<GuildSettings>,
}

impl JsonSettingsStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = load_json::<GuildSettings>(&path)?.unwrap_or_default();
        tracing::info!(
            "loaded settings for {} guild(s) from {}",
            data.len(),
            path.display()
        );
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn get(&self, guild: GuildId, name: &str) -> Result<Option<String>> {
        let data = self.data.read().await;
        Ok(data
            .get(&guild.to_string())
            .and_then(|g| g.get(name))
            .cloned())
    }

    async fn set(&self, guild: GuildId, name: &str, text: &str) -> Result<()> {
        let mut data = self.data.write().await;
        data.entry(guild.to_string())
            .or_default()
            .insert(name.to_string(), text.to_string());
        save_json(&self.path, &*data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::temp_dir;

    #[tokio::test]
    async fn unset_names_are_absent() {
        let dir = temp_dir("settings-empty");
        let store = JsonSettingsStore::load(dir.join("settings.json")).unwrap();
        assert_eq!(store.get(GuildId(1), "cps").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_survives_reload_and_is_scoped_per_guild() {
        let dir = temp_dir("settings-reload");
        let path = dir.join("settings.json");
        {
            let store = JsonSettingsStore::load(&path).unwrap();
            store.set(GuildId(1), "cps", "1 script = 5 DL").await.unwrap();
        }
        let store = JsonSettingsStore::load(&path).unwrap();
        assert_eq!(
            store.get(GuildId(1), "cps").await.unwrap().as_deref(),
            Some("1 script = 5 DL")
        );
        assert_eq!(store.get(GuildId(2), "cps").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reads_hand_written_file() {
        let dir = temp_dir("settings-file");
        let path = dir.join("settings.json");
        std::fs::write(&path, r#"{"77": {"help": "Read the FAQ first."}}"#).unwrap();
        let store = JsonSettingsStore::load(&path).unwrap();
        assert_eq!(
            store.get(GuildId(77), "help").await.unwrap().as_deref(),
            Some("Read the FAQ first.")
        );
    }
}

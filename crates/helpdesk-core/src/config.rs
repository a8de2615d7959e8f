use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::{ChannelId, GuildId, RoleId, UserId},
    errors::Error,
    Result,
};

/// Typed configuration for the helpdesk bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Platform
    pub discord_token: String,
    pub ticket_parent_channel: ChannelId,
    pub audit_channel: ChannelId,
    pub command_guild: Option<GuildId>,

    // Access
    pub operator_roles: Vec<RoleId>,
    pub operator_users: Vec<UserId>,

    // Storage
    pub data_dir: PathBuf,
    pub settings_file: PathBuf,

    // Lifecycle
    pub auto_close_grace: Duration,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let discord_token = env_str("DISCORD_TOKEN").unwrap_or_default();
        if discord_token.trim().is_empty() {
            return Err(Error::Config(
                "DISCORD_TOKEN environment variable is required".to_string(),
            ));
        }

        let ticket_parent_channel = env_u64("TICKET_PARENT_CHANNEL_ID")
            .map(ChannelId)
            .ok_or_else(|| {
                Error::Config("TICKET_PARENT_CHANNEL_ID environment variable is required".into())
            })?;
        let audit_channel = env_u64("AUDIT_CHANNEL_ID").map(ChannelId).ok_or_else(|| {
            Error::Config("AUDIT_CHANNEL_ID environment variable is required".into())
        })?;
        let command_guild = env_u64("GUILD_ID").map(GuildId);

        let operator_roles = parse_csv_u64(env_str("OPERATOR_ROLE_IDS"))
            .into_iter()
            .map(RoleId)
            .collect::<Vec<_>>();
        let operator_users = parse_csv_u64(env_str("OPERATOR_USER_IDS"))
            .into_iter()
            .map(UserId)
            .collect::<Vec<_>>();
        if operator_roles.is_empty() && operator_users.is_empty() {
            return Err(Error::Config(
                "OPERATOR_ROLE_IDS or OPERATOR_USER_IDS must name at least one operator"
                    .to_string(),
            ));
        }

        let data_dir = env_path("HELPDESK_DATA_DIR").unwrap_or_else(|| "helpdesk-data".into());
        fs::create_dir_all(data_dir.join("transcripts"))?;

        let settings_file =
            env_path("SETTINGS_FILE").unwrap_or_else(|| data_dir.join("settings.json"));

        let auto_close_grace =
            Duration::from_secs(env_u64("AUTO_CLOSE_GRACE_SECS").unwrap_or(60));

        let audit_log_path =
            env_path("AUDIT_LOG_PATH").unwrap_or_else(|| data_dir.join("audit.log"));
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(false);

        Ok(Self {
            discord_token,
            ticket_parent_channel,
            audit_channel,
            command_guild,
            operator_roles,
            operator_users,
            data_dir,
            settings_file,
            auto_close_grace,
            audit_log_path,
            audit_log_json,
        })
    }

    pub fn registry_file(&self) -> PathBuf {
        self.data_dir.join("tickets.json")
    }

    pub fn transcript_dir(&self) -> PathBuf {
        self.data_dir.join("transcripts")
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_u64(v: Option<String>) -> Vec<u64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<u64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_ids_skip_blanks_and_garbage() {
        let ids = parse_csv_u64(Some(" 1, ,2,abc, 3 ".to_string()));
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(parse_csv_u64(None).is_empty());
    }
}

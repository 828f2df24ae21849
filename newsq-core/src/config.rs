use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dirs::home_dir;
use serde::Deserialize;

use crate::backend::BackendCommand;
use crate::error::{NewsqError, Result};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STORE_FILE_NAME: &str = "store.sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub home: PathBuf,
    pub store_path: PathBuf,
    pub backend: BackendCommand,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    backend: BackendSection,
    store: StoreSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BackendSection {
    command: Option<String>,
    args: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StoreSection {
    path: Option<PathBuf>,
}

impl Config {
    pub fn from_env_or_home() -> Result<Self> {
        // Precedence:
        // 1) NEWSQ_HOME
        // 2) ~/.newsq
        let home = match env::var_os("NEWSQ_HOME").filter(|path| !path.is_empty()) {
            Some(path) => PathBuf::from(path),
            None => home_dir()
                .ok_or(NewsqError::HomeDirectoryNotFound)?
                .join(".newsq"),
        };

        let mut config = Self::load(home)?;

        // Precedence:
        // 1) NEWSQ_BACKEND_BIN
        // 2) [backend] command in config.toml
        // 3) newsq-backend
        if let Ok(bin) = env::var("NEWSQ_BACKEND_BIN")
            && !bin.is_empty()
        {
            config.backend.program = bin;
        }

        Ok(config)
    }

    /// Reads `<home>/config.toml` when present. Relative store paths resolve
    /// against `home`.
    pub fn load(home: impl Into<PathBuf>) -> Result<Self> {
        let home = home.into();
        let path = home.join(CONFIG_FILE_NAME);
        let file = if path.is_file() {
            let raw = fs::read_to_string(&path).map_err(|source| NewsqError::Io {
                path: path.clone(),
                source,
            })?;
            parse_config_file(&path, &raw)?
        } else {
            ConfigFile::default()
        };

        let store_path = match file.store.path {
            Some(store) if store.is_absolute() => store,
            Some(store) => home.join(store),
            None => home.join(STORE_FILE_NAME),
        };

        let mut backend = BackendCommand::default();
        if let Some(command) = file.backend.command.filter(|command| !command.is_empty()) {
            backend.program = command;
        }
        backend.args = file.backend.args;

        Ok(Self {
            home,
            store_path,
            backend,
        })
    }
}

fn parse_config_file(path: &Path, raw: &str) -> Result<ConfigFile> {
    toml::from_str::<ConfigFile>(raw).map_err(|err| NewsqError::InvalidConfig {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use crate::backend::DEFAULT_BACKEND_BIN;
    use crate::config::Config;

    #[test]
    fn defaults_without_config_file() {
        let temp = tempdir().expect("tempdir");
        let config = Config::load(temp.path()).expect("load");

        assert_eq!(config.store_path, temp.path().join("store.sqlite"));
        assert_eq!(config.backend.program, DEFAULT_BACKEND_BIN);
        assert!(config.backend.args.is_empty());
    }

    #[test]
    fn reads_backend_and_store_sections() {
        let temp = tempdir().expect("tempdir");
        fs::write(
            temp.path().join("config.toml"),
            r#"
[backend]
command = "curl"
args = ["-sN", "https://news.example/ask"]

[store]
path = "data/chats.sqlite"
"#,
        )
        .expect("write config");

        let config = Config::load(temp.path()).expect("load");
        assert_eq!(config.backend.program, "curl");
        assert_eq!(config.backend.args, vec!["-sN", "https://news.example/ask"]);
        assert_eq!(config.store_path, temp.path().join("data/chats.sqlite"));
    }

    #[test]
    fn rejects_malformed_config() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("config.toml"), "[backend]\nunknown = 1\n")
            .expect("write config");

        let err = Config::load(temp.path()).expect_err("must fail");
        assert!(format!("{err}").contains("invalid config"));
    }
}

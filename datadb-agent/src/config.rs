//! Configuration management for the datadb agent.
//!
//! Process-wide [`Settings`] come from environment variables and are read once at
//! startup. Backup profiles come from an INI file where every section is one profile.

use crate::utils::errors::{AgentError, Result};
use ini::{Ini, ParseOption, Properties};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const ENV_PREFIX: &str = "DATADB";

pub const ENV_HTTP_API: &str = "DATADB_HTTP_API";
pub const ENV_KEY_PATH: &str = "DATADB_KEYPATH";
pub const ENV_CONFIG_PATH: &str = "DATADB_CONF";
pub const ENV_HTTP_TIMEOUT: &str = "DATADB_HTTP_TIMEOUT";

const DEFAULT_API_URL: &str = "http://datadb.services.davepedu.com:4875/cgi-bin/";
const DEFAULT_KEY_PATH: &str = "/root/.ssh/datadb.key";
const DEFAULT_CONFIG_PATH: &str = "/etc/datadb.ini";
const DEFAULT_REMOTE_USER: &str = "nexus";
const DEFAULT_KEEP: u32 = 5;
const DEFAULT_SSH_PORT: u16 = 22;

/// Agent settings shared by every component.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the datadb HTTP API, always ending in `/`
    pub api_url: String,

    /// Private key used for the rsync ssh transport
    pub key_path: PathBuf,

    /// Profile definitions
    pub config_path: PathBuf,

    /// Account on the datadb host that rsync logs in as
    pub remote_user: String,

    /// Working directory for pre/post-exec hooks
    pub hook_workdir: PathBuf,

    pub connect_timeout: Duration,

    /// Timeout for the small coordination requests. Streaming transfers are unbounded.
    pub request_timeout: Option<Duration>,
}

/// Recognised `DATADB_*` variables, keyed without the prefix.
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    http_api: Option<String>,
    keypath: Option<String>,
    conf: Option<String>,
    http_timeout: Option<String>,
}

impl Settings {
    /// Build settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Build settings from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars: config::Map<String, String> = [ENV_HTTP_API, ENV_KEY_PATH, ENV_CONFIG_PATH, ENV_HTTP_TIMEOUT]
            .into_iter()
            .filter_map(|key| lookup(key).map(|value| (key.to_string(), value)))
            .collect();

        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn from_environment(env: config::Environment) -> Result<Self> {
        let raw: RawSettings = config::Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()?;

        let request_timeout = match raw.http_timeout {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    AgentError::Config(format!("{} must be a number of seconds, got '{}'", ENV_HTTP_TIMEOUT, raw))
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => Some(Duration::from_secs(60)),
        };

        Ok(Self {
            api_url: normalize_base_url(raw.http_api.as_deref().unwrap_or(DEFAULT_API_URL)),
            key_path: PathBuf::from(raw.keypath.as_deref().unwrap_or(DEFAULT_KEY_PATH)),
            config_path: PathBuf::from(raw.conf.as_deref().unwrap_or(DEFAULT_CONFIG_PATH)),
            remote_user: DEFAULT_REMOTE_USER.to_string(),
            hook_workdir: std::env::temp_dir(),
            connect_timeout: Duration::from_secs(30),
            request_timeout,
        })
    }

    /// Point the agent at a different API base URL
    pub fn with_api_url(mut self, url: &str) -> Self {
        self.api_url = normalize_base_url(url);
        self
    }
}

fn normalize_base_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// Transport selected by the profile URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// rsync over ssh
    Rsync,
    /// gzip tar streamed over HTTP
    Archive,
}

impl Scheme {
    /// Value of the `proto` parameter in datadb API calls
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Rsync => "rsync",
            Scheme::Archive => "archive",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `<scheme>://<host>[:port]/<backup name>` profile URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatadbUri {
    pub scheme: Scheme,
    pub host: String,
    pub port: Option<u16>,
    pub backup_name: String,
}

impl DatadbUri {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| AgentError::Config(format!("invalid uri '{}': {}", raw, e)))?;

        let scheme = match url.scheme() {
            "rsync" => Scheme::Rsync,
            "archive" => Scheme::Archive,
            other => {
                return Err(AgentError::Config(format!(
                    "unsupported scheme '{}' in uri '{}' (expected rsync or archive)",
                    other, raw
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AgentError::Config(format!("uri '{}' has no host", raw)))?
            .to_string();

        Ok(Self {
            scheme,
            host,
            port: url.port(),
            backup_name: url.path().trim_matches('/').to_string(),
        })
    }

    /// ssh port for the rsync transport
    pub fn ssh_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }
}

/// Shell commands run around restore and backup ("export") operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileHooks {
    pub restore_preexec: Option<String>,
    pub restore_postexec: Option<String>,
    pub export_preexec: Option<String>,
    pub export_postexec: Option<String>,
}

/// One backup task, i.e. one section of the profile file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub uri: DatadbUri,
    pub dir: PathBuf,

    /// Historical copies the server should retain
    pub keep: u32,

    /// Paths left out of backups
    pub excludes: Vec<String>,

    /// rsync only: the server keeps a single copy that is synced over
    pub inplace: bool,

    pub hooks: ProfileHooks,
}

/// A profile section as read from the INI file, before validation.
#[derive(Debug, Default, Clone)]
struct RawProfile {
    dir: Option<String>,
    uri: Option<String>,
    keep: Option<String>,
    exclude: Option<String>,
    inplace: Option<String>,
    restore_preexec: Option<String>,
    restore_postexec: Option<String>,
    export_preexec: Option<String>,
    export_postexec: Option<String>,
}

impl RawProfile {
    /// Overlay the recognised keys of a section. Key names are case-insensitive,
    /// unknown keys (such as the legacy `auth`) are skipped.
    fn apply(&mut self, section: &Properties) {
        for (key, value) in section.iter() {
            let slot = match key.to_ascii_lowercase().as_str() {
                "dir" => &mut self.dir,
                "uri" => &mut self.uri,
                "keep" => &mut self.keep,
                "exclude" => &mut self.exclude,
                "inplace" => &mut self.inplace,
                "restore_preexec" => &mut self.restore_preexec,
                "restore_postexec" => &mut self.restore_postexec,
                "export_preexec" => &mut self.export_preexec,
                "export_postexec" => &mut self.export_postexec,
                _ => continue,
            };
            *slot = Some(value.to_string());
        }
    }

    fn into_profile(self, name: &str) -> Result<Profile> {
        let required = |value: Option<String>, key: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AgentError::Config(format!("Required parameter {} missing for profile {}", key, name)))
        };

        let dir = required(self.dir, "dir")?;
        let uri = DatadbUri::parse(required(self.uri, "uri")?.trim())?;

        let keep = match non_empty(self.keep) {
            Some(raw) => raw
                .parse()
                .map_err(|_| AgentError::Config(format!("keep must be a number for profile {}, got '{}'", name, raw)))?,
            None => DEFAULT_KEEP,
        };

        let inplace = match non_empty(self.inplace) {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| AgentError::Config(format!("inplace must be a boolean for profile {}, got '{}'", name, raw)))?,
            None => false,
        };

        let excludes = self
            .exclude
            .map(|raw| {
                raw.split(',')
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Profile {
            name: name.to_string(),
            uri,
            dir: PathBuf::from(dir.trim()),
            keep,
            excludes,
            inplace,
            hooks: ProfileHooks {
                restore_preexec: non_empty(self.restore_preexec),
                restore_postexec: non_empty(self.restore_postexec),
                export_preexec: non_empty(self.export_preexec),
                export_postexec: non_empty(self.export_postexec),
            },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Section whose keys are defaults for every profile
const DEFAULT_SECTION: &str = "DEFAULT";

/// Load every profile from an INI file, keyed by section name.
///
/// Section names are kept exactly as written since they go out on the wire as the
/// backup name. Values are taken literally: no quote stripping, no backslash escapes.
pub fn load_profiles(path: &Path) -> Result<BTreeMap<String, Profile>> {
    let options = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
    };
    let ini = Ini::load_from_file_opt(path, options)?;

    let mut defaults = RawProfile::default();
    if let Some(section) = ini.section(Some(DEFAULT_SECTION)) {
        defaults.apply(section);
    }

    let mut profiles = BTreeMap::new();
    for (name, section) in ini.iter() {
        let name = match name {
            Some(name) if name != DEFAULT_SECTION => name,
            _ => continue,
        };
        if profiles.contains_key(name) {
            return Err(AgentError::Config(format!("Duplicate profile {} in {}", name, path.display())));
        }

        let mut raw = defaults.clone();
        raw.apply(section);
        profiles.insert(name.to_string(), raw.into_profile(name)?);
    }

    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_ini(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.api_url, DEFAULT_API_URL);
        assert_eq!(settings.key_path, PathBuf::from("/root/.ssh/datadb.key"));
        assert_eq!(settings.config_path, PathBuf::from("/etc/datadb.ini"));
        assert_eq!(settings.remote_user, "nexus");
        assert_eq!(settings.request_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_settings_env_overrides() {
        let settings = Settings::from_lookup(|key| match key {
            ENV_HTTP_API => Some("http://localhost:4875/cgi-bin".to_string()),
            ENV_KEY_PATH => Some("/tmp/key".to_string()),
            ENV_CONFIG_PATH => Some("/tmp/datadb.ini".to_string()),
            ENV_HTTP_TIMEOUT => Some("0".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(settings.api_url, "http://localhost:4875/cgi-bin/");
        assert_eq!(settings.key_path, PathBuf::from("/tmp/key"));
        assert_eq!(settings.config_path, PathBuf::from("/tmp/datadb.ini"));
        assert_eq!(settings.request_timeout, None);
    }

    #[test]
    fn test_settings_rejects_bad_timeout() {
        let result = Settings::from_lookup(|key| (key == ENV_HTTP_TIMEOUT).then(|| "soon".to_string()));
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_parse_uri() {
        let uri = DatadbUri::parse("rsync://datadb.local:2222/gyfd").unwrap();
        assert_eq!(uri.scheme, Scheme::Rsync);
        assert_eq!(uri.host, "datadb.local");
        assert_eq!(uri.ssh_port(), 2222);
        assert_eq!(uri.backup_name, "gyfd");

        let uri = DatadbUri::parse("archive://datadb.local/photos").unwrap();
        assert_eq!(uri.scheme, Scheme::Archive);
        assert_eq!(uri.ssh_port(), 22);
    }

    #[test]
    fn test_parse_uri_rejects_unknown_scheme() {
        assert!(matches!(DatadbUri::parse("ftp://host/x"), Err(AgentError::Config(_))));
        assert!(matches!(DatadbUri::parse("not a uri"), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_load_profiles_with_defaults() {
        let file = write_ini(
            "[gyfd]\n\
             uri=rsync://datadb.local/gyfd\n\
             dir=/data/gyfd\n\
             exclude=cache/,,logs/*.log, spaced \n\
             export_postexec=systemctl start gyfd\n\
             restore_preexec=\n",
        );

        let profiles = load_profiles(file.path()).unwrap();
        let profile = &profiles["gyfd"];

        assert_eq!(profile.name, "gyfd");
        assert_eq!(profile.dir, PathBuf::from("/data/gyfd"));
        assert_eq!(profile.keep, 5);
        assert!(!profile.inplace);
        assert_eq!(profile.excludes, vec!["cache/", "logs/*.log", " spaced"]);
        assert_eq!(profile.hooks.export_postexec.as_deref(), Some("systemctl start gyfd"));
        assert_eq!(profile.hooks.restore_preexec, None);
    }

    #[test]
    fn test_load_profiles_explicit_values() {
        let file = write_ini(
            "[media]\n\
             uri=rsync://datadb.local/media\n\
             dir=/srv/media\n\
             keep=2\n\
             inplace=yes\n\
             auth=admin\n\
             \n\
             [web]\n\
             uri=archive://datadb.local/web\n\
             dir=/srv/web\n\
             inplace=0\n",
        );

        let profiles = load_profiles(file.path()).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles["media"].keep, 2);
        assert!(profiles["media"].inplace);
        assert!(!profiles["web"].inplace);
        assert_eq!(profiles["web"].uri.scheme, Scheme::Archive);
    }

    #[test]
    fn test_load_profiles_requires_dir() {
        let file = write_ini("[broken]\nuri=archive://datadb.local/broken\n");

        let err = load_profiles(file.path()).unwrap_err();
        assert!(err.to_string().contains("Required parameter dir missing for profile broken"));
    }

    #[test]
    fn test_load_profiles_rejects_bad_keep() {
        let file = write_ini("[p]\nuri=archive://h/p\ndir=/p\nkeep=many\n");
        assert!(matches!(load_profiles(file.path()), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_load_profiles_missing_file() {
        let result = load_profiles(Path::new("/nonexistent/datadb.ini"));
        assert!(matches!(result, Err(AgentError::ProfileFile(_))));
    }

    #[test]
    fn test_load_profiles_keeps_section_case() {
        let file = write_ini("[Gyfd]\nuri=rsync://datadb.local/Gyfd\nDir=/data/gyfd\n");

        let profiles = load_profiles(file.path()).unwrap();
        assert_eq!(profiles.keys().collect::<Vec<_>>(), vec!["Gyfd"]);
        assert_eq!(profiles["Gyfd"].name, "Gyfd");
        assert_eq!(profiles["Gyfd"].dir, PathBuf::from("/data/gyfd"));
    }

    #[test]
    fn test_hook_lines_are_literal() {
        let hook = r#"printf 'a\tb\.c' "$HOME" ; echo done # tail"#;
        let file = write_ini(&format!(
            "[web]\nuri=archive://datadb.local/web\ndir=/srv/web\nexport_postexec={}\n",
            hook
        ));

        let profiles = load_profiles(file.path()).unwrap();
        assert_eq!(profiles["web"].hooks.export_postexec.as_deref(), Some(hook));
    }

    #[test]
    fn test_default_section_fills_profiles() {
        let file = write_ini(
            "[DEFAULT]\n\
             keep=9\n\
             uri=rsync://datadb.local/shared\n\
             \n\
             [a]\n\
             dir=/srv/a\n\
             \n\
             [b]\n\
             dir=/srv/b\n\
             keep=1\n",
        );

        let profiles = load_profiles(file.path()).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles["a"].keep, 9);
        assert_eq!(profiles["b"].keep, 1);
        assert_eq!(profiles["b"].uri.host, "datadb.local");
    }

    #[test]
    fn test_load_profiles_rejects_duplicate_sections() {
        let file = write_ini("[p]\nuri=archive://h/p\ndir=/p\n[p]\ndir=/q\n");
        assert!(matches!(load_profiles(file.path()), Err(AgentError::Config(_))));
    }
}

//! Configuration management for Mirrorcast

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{ConfigError, Result};
use crate::mirror::cursor::StartMode;
use crate::mirror::transform::DEFAULT_RICH_TEXT_CONTENT_TYPE;
use crate::types::Visibility;

/// Default signature link base for an account
pub const DEFAULT_SOURCE_URL: &str = "https://twitter.com/{{ source_username }}";

/// Signature link base used when Nitter is enabled
pub const NITTER_SOURCE_URL: &str = "{{ nitter_base_url }}/{{ source_username }}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Global fallbacks applied to every account that does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub visibility: Visibility,
    pub signature: bool,
    pub media_upload: bool,
    pub rich_text: bool,
    pub update_profile: bool,
    pub include_replies: bool,
    pub include_retweets: bool,
    pub nitter_base_url: String,
    /// Lookback used when the destination has no history on a later run
    pub fallback_lookback: String,
    pub request_timeout: String,
    pub user_agent: String,
    pub twitter_api_base: String,
    pub twitter_v1_base: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            visibility: Visibility::Unlisted,
            signature: true,
            media_upload: true,
            rich_text: false,
            update_profile: true,
            include_replies: false,
            include_retweets: false,
            nitter_base_url: "https://nitter.net".to_string(),
            fallback_lookback: "2days".to_string(),
            request_timeout: "30s".to_string(),
            user_agent: format!("mirrorcast/{}", env!("CARGO_PKG_VERSION")),
            twitter_api_base: "https://api.twitter.com/2".to_string(),
            twitter_v1_base: "https://api.twitter.com/1.1".to_string(),
        }
    }
}

/// One `[[accounts]]` entry. Every `Option` means "use the default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    pub source_username: String,
    /// Defaults to `source_username`; only used by the bio template
    pub destination_username: Option<String>,
    pub destination_base_url: Option<String>,

    pub source_token_file: Option<String>,
    pub source_token_env: Option<String>,
    pub destination_token_file: Option<String>,
    pub destination_token_env: Option<String>,

    pub visibility: Option<Visibility>,
    pub signature: Option<bool>,
    pub media_upload: Option<bool>,
    /// Forces every mirrored post's sensitivity flag
    pub sensitive: Option<bool>,
    pub rich_text: Option<bool>,
    /// Content type sent with rich-text posts (default text/markdown)
    pub content_type: Option<String>,
    pub max_posts: Option<i64>,
    /// "earliest", "continue" or YYYY-MM-DD
    pub first_run_start: Option<String>,

    pub update_profile: Option<bool>,
    pub display_name: Option<String>,
    pub bio_text: Option<String>,
    pub source_url: Option<String>,
    pub nitter: Option<bool>,

    pub include_replies: Option<bool>,
    pub include_retweets: Option<bool>,
}

/// Fully resolved settings for one account pair, immutable for a pass
#[derive(Debug)]
pub struct AccountSettings {
    pub name: String,
    pub source_username: String,
    pub destination_username: String,
    pub destination_base_url: Url,
    pub source_token: SecretString,
    pub destination_token: SecretString,

    pub visibility: Visibility,
    pub signature: bool,
    pub media_upload: bool,
    pub sensitive: Option<bool>,
    pub rich_text: bool,
    pub content_type: String,
    /// Validated at the start of each pass
    pub max_posts: Option<i64>,
    pub first_run_start: Option<StartMode>,

    pub update_profile: bool,
    pub display_name: Option<String>,
    pub bio_text: Option<String>,
    /// Unrendered template for the signature link base
    pub source_url_template: String,
    pub nitter_base_url: String,

    pub include_replies: bool,
    pub include_retweets: bool,

    pub fallback_lookback: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub twitter_api_base: Url,
    pub twitter_v1_base: Url,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Find an account entry by name
    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.name == name)
    }

    /// Merge defaults into every account and resolve credentials.
    ///
    /// When `selected` is non-empty only those accounts are resolved, in
    /// configuration order. Naming an unknown account is an error.
    pub fn resolve_accounts(&self, selected: &[String]) -> Result<Vec<AccountSettings>> {
        for name in selected {
            if self.account(name).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "account".to_string(),
                    reason: format!("no account named '{}' in configuration", name),
                }
                .into());
            }
        }

        self.accounts
            .iter()
            .filter(|a| selected.is_empty() || selected.contains(&a.name))
            .map(|a| self.resolve_account(a))
            .collect()
    }

    fn resolve_account(&self, account: &AccountConfig) -> Result<AccountSettings> {
        let defaults = &self.defaults;

        if account.name.trim().is_empty() {
            return Err(ConfigError::MissingField("accounts.name".to_string()).into());
        }
        if account.source_username.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "accounts.{}.source_username",
                account.name
            ))
            .into());
        }

        let destination_base_url = match &account.destination_base_url {
            Some(raw) => parse_url(&format!("accounts.{}.destination_base_url", account.name), raw)?,
            None => {
                return Err(ConfigError::MissingField(format!(
                    "accounts.{}.destination_base_url",
                    account.name
                ))
                .into())
            }
        };

        let source_token = load_token(
            &format!("accounts.{}.source_token", account.name),
            account.source_token_file.as_deref(),
            account.source_token_env.as_deref(),
        )?;
        let destination_token = load_token(
            &format!("accounts.{}.destination_token", account.name),
            account.destination_token_file.as_deref(),
            account.destination_token_env.as_deref(),
        )?;

        let first_run_start = match &account.first_run_start {
            Some(raw) => Some(StartMode::parse(raw).ok_or_else(|| ConfigError::InvalidValue {
                field: format!("accounts.{}.first_run_start", account.name),
                reason: format!(
                    "'{}' is not one of: earliest, continue, YYYY-MM-DD",
                    raw
                ),
            })?),
            None => None,
        };

        let nitter = account.nitter.unwrap_or(false);
        let source_url_template = match &account.source_url {
            Some(template) => template.clone(),
            None if nitter => NITTER_SOURCE_URL.to_string(),
            None => DEFAULT_SOURCE_URL.to_string(),
        };

        Ok(AccountSettings {
            name: account.name.clone(),
            source_username: account.source_username.clone(),
            destination_username: account
                .destination_username
                .clone()
                .unwrap_or_else(|| account.source_username.clone()),
            destination_base_url,
            source_token,
            destination_token,
            visibility: account.visibility.unwrap_or(defaults.visibility),
            signature: account.signature.unwrap_or(defaults.signature),
            media_upload: account.media_upload.unwrap_or(defaults.media_upload),
            sensitive: account.sensitive,
            rich_text: account.rich_text.unwrap_or(defaults.rich_text),
            content_type: account
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_RICH_TEXT_CONTENT_TYPE.to_string()),
            max_posts: account.max_posts,
            first_run_start,
            update_profile: account.update_profile.unwrap_or(defaults.update_profile),
            display_name: account.display_name.clone(),
            bio_text: account.bio_text.clone(),
            source_url_template,
            nitter_base_url: defaults.nitter_base_url.trim_end_matches('/').to_string(),
            include_replies: account.include_replies.unwrap_or(defaults.include_replies),
            include_retweets: account.include_retweets.unwrap_or(defaults.include_retweets),
            fallback_lookback: parse_duration("defaults.fallback_lookback", &defaults.fallback_lookback)?,
            request_timeout: parse_duration("defaults.request_timeout", &defaults.request_timeout)?,
            user_agent: defaults.user_agent.clone(),
            twitter_api_base: parse_url("defaults.twitter_api_base", &defaults.twitter_api_base)?,
            twitter_v1_base: parse_url("defaults.twitter_v1_base", &defaults.twitter_v1_base)?,
        })
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("'{}' is not a valid URL: {}", raw, e),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        }
        .into());
    }

    Ok(url)
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw).map_err(|e| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}': {}", raw, e),
        }
        .into()
    })
}

/// Read an access token from a file (preferred) or an environment variable
fn load_token(field: &str, file: Option<&str>, env: Option<&str>) -> Result<SecretString> {
    if let Some(file) = file {
        let path = shellexpand::tilde(file).to_string();
        let content = std::fs::read_to_string(&path).map_err(ConfigError::ReadError)?;
        let token = content.trim();
        if token.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                reason: format!("token file {} is empty", path),
            }
            .into());
        }
        return Ok(SecretString::from(token.to_string()));
    }

    if let Some(var) = env {
        return match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(SecretString::from(value.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidValue {
                field: field.to_string(),
                reason: format!("environment variable {} is not set", var),
            }
            .into()),
        };
    }

    Err(ConfigError::MissingField(format!("{}_file or {}_env", field, field)).into())
}

/// Resolve the configuration file path following XDG Base Directory conventions
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("MIRRORCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("mirrorcast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MirrorError;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn token_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    fn minimal_config(source_token: &Path, destination_token: &Path, extra: &str) -> String {
        format!(
            r#"
[database]
path = "/tmp/mirror.db"

[[accounts]]
name = "alice"
source_username = "alice"
destination_base_url = "https://pleroma.example"
source_token_file = "{}"
destination_token_file = "{}"
{}
"#,
            source_token.display(),
            destination_token.display(),
            extra
        )
    }

    #[test]
    fn test_defaults_applied_when_account_is_silent() {
        let source = token_file("  twitter-token\n");
        let destination = token_file("fedi-token");
        let config = Config::parse(&minimal_config(source.path(), destination.path(), "")).unwrap();

        let accounts = config.resolve_accounts(&[]).unwrap();
        assert_eq!(accounts.len(), 1);

        let alice = &accounts[0];
        assert_eq!(alice.source_token.expose_secret(), "twitter-token");
        assert_eq!(alice.destination_token.expose_secret(), "fedi-token");
        assert_eq!(alice.visibility, Visibility::Unlisted);
        assert!(alice.signature);
        assert!(alice.media_upload);
        assert!(alice.update_profile);
        assert!(!alice.rich_text);
        assert!(!alice.include_replies);
        assert_eq!(alice.sensitive, None);
        assert_eq!(alice.max_posts, None);
        assert_eq!(alice.first_run_start, None);
        assert_eq!(alice.fallback_lookback, Duration::from_secs(2 * 24 * 3600));
        assert_eq!(alice.source_url_template, DEFAULT_SOURCE_URL);
        assert_eq!(alice.destination_base_url.as_str(), "https://pleroma.example/");
    }

    #[test]
    fn test_account_overrides_win() {
        let source = token_file("a");
        let destination = token_file("b");
        let extra = r#"
visibility = "public"
sensitive = true
rich_text = true
max_posts = 50
first_run_start = "2023-04-01"
nitter = true
include_retweets = true
"#;
        let config = Config::parse(&minimal_config(source.path(), destination.path(), extra)).unwrap();
        let alice = config.resolve_accounts(&[]).unwrap().remove(0);

        assert_eq!(alice.visibility, Visibility::Public);
        assert_eq!(alice.sensitive, Some(true));
        assert!(alice.rich_text);
        assert_eq!(alice.max_posts, Some(50));
        assert!(matches!(alice.first_run_start, Some(StartMode::Explicit(_))));
        assert_eq!(alice.source_url_template, NITTER_SOURCE_URL);
        assert!(alice.include_retweets);
    }

    #[test]
    fn test_invalid_visibility_lists_allowed_values() {
        let source = token_file("a");
        let destination = token_file("b");
        let result = Config::parse(&minimal_config(
            source.path(),
            destination.path(),
            r#"visibility = "followers""#,
        ));

        let message = result.unwrap_err().to_string();
        assert!(message.contains("public"));
        assert!(message.contains("direct"));
    }

    #[test]
    fn test_missing_destination_url_is_missing_field() {
        let source = token_file("a");
        let destination = token_file("b");
        let toml = minimal_config(source.path(), destination.path(), "")
            .replace("destination_base_url = \"https://pleroma.example\"\n", "");
        let config = Config::parse(&toml).unwrap();

        match config.resolve_accounts(&[]) {
            Err(MirrorError::Config(ConfigError::MissingField(field))) => {
                assert!(field.contains("destination_base_url"));
            }
            other => panic!("Expected MissingField, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_malformed_destination_url_is_invalid_value() {
        let source = token_file("a");
        let destination = token_file("b");
        let toml = minimal_config(source.path(), destination.path(), "")
            .replace("https://pleroma.example", "pleroma example");
        let config = Config::parse(&toml).unwrap();

        let error = config.resolve_accounts(&[]).unwrap_err();
        assert_eq!(error.exit_code(), 2);
        assert!(error.to_string().contains("destination_base_url"));
    }

    #[test]
    fn test_empty_token_file_is_rejected() {
        let source = token_file("   \n");
        let destination = token_file("b");
        let config = Config::parse(&minimal_config(source.path(), destination.path(), "")).unwrap();

        let error = config.resolve_accounts(&[]).unwrap_err();
        assert!(error.to_string().contains("is empty"));
    }

    #[test]
    fn test_invalid_first_run_start_is_rejected() {
        let source = token_file("a");
        let destination = token_file("b");
        let config = Config::parse(&minimal_config(
            source.path(),
            destination.path(),
            r#"first_run_start = "yesterday""#,
        ))
        .unwrap();

        let error = config.resolve_accounts(&[]).unwrap_err();
        assert!(error.to_string().contains("first_run_start"));
    }

    #[test]
    fn test_unknown_selected_account_is_rejected() {
        let source = token_file("a");
        let destination = token_file("b");
        let config = Config::parse(&minimal_config(source.path(), destination.path(), "")).unwrap();

        assert!(config.resolve_accounts(&["bob".to_string()]).is_err());
        assert_eq!(config.resolve_accounts(&["alice".to_string()]).unwrap().len(), 1);
    }

    #[test]
    #[serial]
    fn test_token_from_environment() {
        let source = token_file("a");
        std::env::set_var("MIRRORCAST_TEST_DEST_TOKEN", " env-token ");
        let toml = format!(
            r#"
[database]
path = "/tmp/mirror.db"

[[accounts]]
name = "alice"
source_username = "alice"
destination_base_url = "https://pleroma.example"
source_token_file = "{}"
destination_token_env = "MIRRORCAST_TEST_DEST_TOKEN"
"#,
            source.path().display()
        );
        let config = Config::parse(&toml).unwrap();
        let alice = config.resolve_accounts(&[]).unwrap().remove(0);
        assert_eq!(alice.destination_token.expose_secret(), "env-token");

        std::env::remove_var("MIRRORCAST_TEST_DEST_TOKEN");
        assert!(config.resolve_accounts(&[]).is_err());
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_from_env() {
        std::env::set_var("MIRRORCAST_CONFIG", "/etc/mirrorcast/test.toml");
        let path = resolve_config_path().unwrap();
        assert_eq!(path, PathBuf::from("/etc/mirrorcast/test.toml"));
        std::env::remove_var("MIRRORCAST_CONFIG");
    }

    #[test]
    fn test_load_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[database]\npath = \"~/mirror.db\"\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.database.path, "~/mirror.db");
        assert!(config.accounts.is_empty());
        assert!(config.defaults.signature);
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let result = Config::load_from_path(Path::new("/nonexistent/mirrorcast.toml"));
        assert!(matches!(
            result,
            Err(MirrorError::Config(ConfigError::ReadError(_)))
        ));
    }
}

use crate::pipeline::{to_addresses, DEFAULT_AUTH_PIPELINE, DEFAULT_DISCONNECT_PIPELINE};
use crate::utils::crypto::generate_secret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SocialSettings {
    pub application: ApplicationSettings,
    pub pipeline: PipelineSettings,
    pub http: HttpSettings,
    pub access: AccessSettings,
    pub logging: LoggingSettings,
    pub providers: Vec<ProviderSettings>,
    /// Free-form global settings, looked up by their uppercased key
    pub settings: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub redirect_base_url: String,
    pub login_redirect_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub authentication: Vec<String>,
    pub disconnect: Vec<String>,
    /// Key material for sealing partial pipeline tokens
    pub partial_pipeline_secret: String,
    /// Seconds a halted pipeline may wait before it can no longer be resumed
    pub partial_pipeline_max_age: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HttpSettings {
    /// Outbound request timeout in seconds
    pub requests_timeout: Option<u64>,
    /// Legacy name for `requests_timeout`
    pub urlopen_timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AccessSettings {
    pub whitelisted_emails: Option<Vec<String>>,
    pub whitelisted_domains: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    pub enabled: bool,

    // Direct values (can be overridden by environment variables)
    pub key: Option<String>,
    pub secret: Option<String>,

    // Environment variable names for overrides
    pub key_env: Option<String>,
    pub secret_env: Option<String>,

    pub scope: Option<Vec<String>>,
    pub auth_extra_arguments: Option<HashMap<String, String>>,
    pub request_token_extra_arguments: Option<HashMap<String, String>>,
    pub extra_data: Option<Vec<String>>,
    pub whitelisted_emails: Option<Vec<String>>,
    pub whitelisted_domains: Option<Vec<String>>,

    /// Free-form provider settings, namespaced with the provider name
    pub settings: HashMap<String, Value>,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            redirect_base_url: "http://localhost:8080".to_string(),
            login_redirect_url: "/".to_string(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            authentication: to_addresses(DEFAULT_AUTH_PIPELINE),
            disconnect: to_addresses(DEFAULT_DISCONNECT_PIPELINE),
            partial_pipeline_secret: String::new(),
            partial_pipeline_max_age: 3600,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            key: None,
            secret: None,
            key_env: None,
            secret_env: None,
            scope: None,
            auth_extra_arguments: None,
            request_token_extra_arguments: None,
            extra_data: None,
            whitelisted_emails: None,
            whitelisted_domains: None,
            settings: HashMap::new(),
        }
    }
}

/// Namespaced setting key: joined with `_`, uppercased, `-` replaced by `_`
///
/// `setting_name(&["github", "key"])` is `GITHUB_KEY`.
#[must_use]
pub fn setting_name(names: &[&str]) -> String {
    names.join("_").to_uppercase().replace('-', "_")
}

impl SocialSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Environment initialization fails
    /// - Settings file cannot be read or parsed
    /// - TOML parsing fails
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_env_file();

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);
        Self::initialize_logging(&settings.logging)?;

        Ok(settings)
    }

    /// Install the global logger with the configured filter
    ///
    /// # Errors
    ///
    /// Returns an error if a logger is already installed
    fn initialize_logging(logging: &LoggingSettings) -> Result<(), Box<dyn std::error::Error>> {
        Self::logger_builder(logging).try_init()?;
        Ok(())
    }

    fn logger_builder(logging: &LoggingSettings) -> env_logger::Builder {
        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&logging.level);
        builder
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `SOCIALRS_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();

        let default_config_path = std::path::PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_file(&default_config_path)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var("SOCIALRS_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                settings = Self::from_file(&secrets_path)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                println!(
                    "ℹ SOCIALRS_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse a single settings file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML
    pub fn from_file(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let toml_content = fs::read_to_string(path)?;
        Ok(basic_toml::from_str(&toml_content)?)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_http_env_overrides(&mut settings.http);
        Self::apply_pipeline_env_overrides(&mut settings.pipeline);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(redirect_base_url) = std::env::var("REDIRECT_BASE_URL") {
            app_settings.redirect_base_url = redirect_base_url;
        }
        if let Ok(login_redirect_url) = std::env::var("LOGIN_REDIRECT_URL") {
            app_settings.login_redirect_url = login_redirect_url;
        }
    }

    fn apply_http_env_overrides(http_settings: &mut HttpSettings) {
        Self::apply_numeric_env_override("REQUESTS_TIMEOUT", &mut http_settings.requests_timeout);
        Self::apply_numeric_env_override("URLOPEN_TIMEOUT", &mut http_settings.urlopen_timeout);
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut Option<u64>) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = Some(value);
            }
        }
    }

    /// Apply environment overrides for pipeline settings
    pub fn apply_pipeline_env_overrides(pipeline_settings: &mut PipelineSettings) {
        let env_secret_set = std::env::var("PARTIAL_PIPELINE_SECRET").is_ok_and(|secret| {
            if secret.is_empty() {
                false
            } else {
                pipeline_settings.partial_pipeline_secret = secret;
                true
            }
        });

        if !env_secret_set && pipeline_settings.partial_pipeline_secret.is_empty() {
            pipeline_settings.partial_pipeline_secret = generate_secret(32);
            Self::warn_about_generated_secret();
        }

        if let Ok(value) = std::env::var("PARTIAL_PIPELINE_MAX_AGE") {
            if let Ok(max_age) = value.parse::<u64>() {
                pipeline_settings.partial_pipeline_max_age = max_age;
            }
        }
    }

    fn warn_about_generated_secret() {
        eprintln!("⚠️  WARNING: Using auto-generated partial pipeline secret");
        eprintln!("🔒 For production use, set the PARTIAL_PIPELINE_SECRET environment variable");
        eprintln!("   or configure pipeline.partial_pipeline_secret in Settings.toml");
        eprintln!("💡 Halted pipelines cannot resume across restarts with a generated secret");
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Get enabled providers
    #[must_use]
    pub fn get_enabled_providers(&self) -> Vec<&ProviderSettings> {
        self.providers.iter().filter(|p| p.enabled).collect()
    }

    /// Get provider by name
    #[must_use]
    pub fn get_provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Flatten into the key space used by setting lookups
    ///
    /// Global values keep their bare name (`REQUESTS_TIMEOUT`), provider
    /// values are prefixed with the provider name (`GITHUB_KEY`). Unset
    /// options produce no key so lookups fall back past them.
    #[must_use]
    pub fn to_setting_map(&self) -> HashMap<String, Value> {
        let mut map: HashMap<String, Value> = self
            .settings
            .iter()
            .map(|(key, value)| (setting_name(&[key.as_str()]), value.clone()))
            .collect();

        map.insert(
            "PIPELINE".to_string(),
            Value::from(self.pipeline.authentication.clone()),
        );
        map.insert(
            "DISCONNECT_PIPELINE".to_string(),
            Value::from(self.pipeline.disconnect.clone()),
        );
        map.insert(
            "LOGIN_REDIRECT_URL".to_string(),
            Value::from(self.application.login_redirect_url.clone()),
        );
        insert_some(&mut map, "REQUESTS_TIMEOUT", self.http.requests_timeout);
        insert_some(&mut map, "URLOPEN_TIMEOUT", self.http.urlopen_timeout);
        insert_some(&mut map, "WHITELISTED_EMAILS", self.access.whitelisted_emails.clone());
        insert_some(&mut map, "WHITELISTED_DOMAINS", self.access.whitelisted_domains.clone());

        for provider in self.get_enabled_providers() {
            provider.flatten_into(&mut map);
        }
        map
    }
}

fn insert_some<T: Into<Value>>(map: &mut HashMap<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value.into());
    }
}

impl ProviderSettings {
    /// Get the consumer key, from `key_env` first, then the direct value
    #[must_use]
    pub fn get_key(&self) -> Option<String> {
        if let Some(env_var) = &self.key_env {
            if let Ok(value) = std::env::var(env_var) {
                return Some(value);
            }
        }
        self.key.clone()
    }

    /// Get the consumer secret, from `secret_env` first, then the direct value
    #[must_use]
    pub fn get_secret(&self) -> Option<String> {
        if let Some(env_var) = &self.secret_env {
            if let Ok(value) = std::env::var(env_var) {
                return Some(value);
            }
        }
        self.secret.clone()
    }

    fn flatten_into(&self, map: &mut HashMap<String, Value>) {
        let name = |key: &str| setting_name(&[self.name.as_str(), key]);

        for (key, value) in &self.settings {
            map.insert(name(key), value.clone());
        }
        insert_some(map, &name("KEY"), self.get_key());
        insert_some(map, &name("SECRET"), self.get_secret());
        insert_some(map, &name("SCOPE"), self.scope.clone());
        insert_some(map, &name("EXTRA_DATA"), self.extra_data.clone());
        insert_some(map, &name("WHITELISTED_EMAILS"), self.whitelisted_emails.clone());
        insert_some(map, &name("WHITELISTED_DOMAINS"), self.whitelisted_domains.clone());
        insert_some(
            map,
            &name("AUTH_EXTRA_ARGUMENTS"),
            self.auth_extra_arguments.as_ref().map(string_map),
        );
        insert_some(
            map,
            &name("REQUEST_TOKEN_EXTRA_ARGUMENTS"),
            self.request_token_extra_arguments.as_ref().map(string_map),
        );
    }
}

fn string_map(values: &HashMap<String, String>) -> Value {
    Value::Object(
        values
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;
    use std::io::Write;

    fn clean_env_vars() {
        std::env::remove_var("PARTIAL_PIPELINE_SECRET");
        std::env::remove_var("PARTIAL_PIPELINE_MAX_AGE");
        std::env::remove_var("RUST_LOG");
        std::env::remove_var("REQUESTS_TIMEOUT");
        std::env::remove_var("URLOPEN_TIMEOUT");
        std::env::remove_var("SOCIALRS_SECRETS_DIR");
        std::env::remove_var("TEST_GITHUB_KEY");
    }

    const SAMPLE: &str = r#"
[application]
redirect_base_url = "https://app.example.com"

[pipeline]
authentication = ["social.details", "social.uid", "social.user"]
partial_pipeline_secret = "from-file"
partial_pipeline_max_age = 600

[access]
whitelisted_domains = ["example.com"]

[settings]
user_fields = ["username", "email"]

[[providers]]
name = "github"
key = "file-key"
key_env = "TEST_GITHUB_KEY"
secret = ""
scope = ["read:user", "user:email"]

[providers.auth_extra_arguments]
allow_signup = "false"

[providers.settings]
api_url = "https://api.github.com"
max_retries = 0

[[providers]]
name = "gitlab"
enabled = false
key = "disabled"
"#;

    #[test]
    fn test_setting_name() {
        assert_eq!(setting_name(&["github", "key"]), "GITHUB_KEY");
        assert_eq!(setting_name(&["google-oauth2", "scope"]), "GOOGLE_OAUTH2_SCOPE");
        assert_eq!(setting_name(&["pipeline"]), "PIPELINE");
    }

    #[test]
    fn test_defaults_use_builtin_pipelines() {
        let settings = SocialSettings::default();
        assert_eq!(settings.pipeline.authentication.len(), DEFAULT_AUTH_PIPELINE.len());
        assert_eq!(settings.pipeline.disconnect.len(), DEFAULT_DISCONNECT_PIPELINE.len());
        assert!(settings.providers.is_empty());
    }

    #[test]
    #[serial]
    fn test_parse_and_flatten() {
        clean_env_vars();
        let settings: SocialSettings = basic_toml::from_str(SAMPLE).unwrap();
        let map = settings.to_setting_map();

        assert_eq!(map["PIPELINE"], json!(["social.details", "social.uid", "social.user"]));
        assert_eq!(map["DISCONNECT_PIPELINE"].as_array().unwrap().len(), 3);
        assert_eq!(map["WHITELISTED_DOMAINS"], json!(["example.com"]));
        assert!(!map.contains_key("WHITELISTED_EMAILS"));
        assert_eq!(map["USER_FIELDS"], json!(["username", "email"]));

        assert_eq!(map["GITHUB_KEY"], json!("file-key"));
        // Empty values are still configured values
        assert_eq!(map["GITHUB_SECRET"], json!(""));
        assert_eq!(map["GITHUB_MAX_RETRIES"], json!(0));
        assert_eq!(map["GITHUB_API_URL"], json!("https://api.github.com"));
        assert_eq!(map["GITHUB_AUTH_EXTRA_ARGUMENTS"], json!({ "allow_signup": "false" }));
        assert!(!map.contains_key("GITLAB_KEY"));
    }

    #[test]
    #[serial]
    fn test_key_env_override() {
        clean_env_vars();
        let settings: SocialSettings = basic_toml::from_str(SAMPLE).unwrap();
        let github = settings.get_provider("github").unwrap();
        assert_eq!(github.get_key().as_deref(), Some("file-key"));

        std::env::set_var("TEST_GITHUB_KEY", "env-key");
        assert_eq!(github.get_key().as_deref(), Some("env-key"));

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_http_timeout_env_override() {
        clean_env_vars();
        let mut settings = SocialSettings::default();
        std::env::set_var("REQUESTS_TIMEOUT", "15");
        std::env::set_var("URLOPEN_TIMEOUT", "not-a-number");

        SocialSettings::apply_env_overrides(&mut settings);

        assert_eq!(settings.http.requests_timeout, Some(15));
        assert_eq!(settings.http.urlopen_timeout, None);
        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_partial_pipeline_secret_env_override() {
        clean_env_vars();
        let mut pipeline = PipelineSettings {
            partial_pipeline_secret: "from-file".to_string(),
            ..Default::default()
        };
        std::env::set_var("PARTIAL_PIPELINE_SECRET", "from-env");

        SocialSettings::apply_pipeline_env_overrides(&mut pipeline);
        assert_eq!(pipeline.partial_pipeline_secret, "from-env");
        assert_eq!(pipeline.partial_pipeline_max_age, 3600);

        std::env::set_var("PARTIAL_PIPELINE_MAX_AGE", "120");
        SocialSettings::apply_pipeline_env_overrides(&mut pipeline);
        assert_eq!(pipeline.partial_pipeline_max_age, 120);

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_logging_level_drives_logger_filter() {
        clean_env_vars();
        let mut logging = LoggingSettings::default();
        assert_eq!(
            SocialSettings::logger_builder(&logging).build().filter(),
            log::LevelFilter::Info
        );

        std::env::set_var("RUST_LOG", "warn");
        SocialSettings::apply_logging_env_overrides(&mut logging);
        assert_eq!(logging.level, "warn");
        assert_eq!(
            SocialSettings::logger_builder(&logging).build().filter(),
            log::LevelFilter::Warn
        );
        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_partial_pipeline_secret_auto_generation() {
        clean_env_vars();
        let mut first = PipelineSettings::default();
        let mut second = PipelineSettings::default();

        SocialSettings::apply_pipeline_env_overrides(&mut first);
        SocialSettings::apply_pipeline_env_overrides(&mut second);

        assert!(first.partial_pipeline_secret.len() > 40);
        assert_ne!(first.partial_pipeline_secret, second.partial_pipeline_secret);
        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_secrets_dir_file_is_parsed() {
        clean_env_vars();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Settings.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        std::env::set_var("SOCIALRS_SECRETS_DIR", dir.path());
        let settings = SocialSettings::load_base_settings().unwrap();

        assert_eq!(settings.application.redirect_base_url, "https://app.example.com");
        assert_eq!(settings.pipeline.partial_pipeline_secret, "from-file");
        assert_eq!(settings.pipeline.partial_pipeline_max_age, 600);
        assert_eq!(settings.get_enabled_providers().len(), 1);
        clean_env_vars();
    }
}

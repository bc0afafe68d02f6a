//! 配置文件
//!
//! 只映射已知字段，未知字段记录日志后忽略；缺失字段使用默认值。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use crate::core::{ConfigError, CopyrightMode, UploadPolicy, normalize_extension};

pub const DEFAULT_CONFIG_PATH: &str = "upload_config.toml";

/// 登录所需的 cookie，前两个必填
pub const COOKIE_NAMES: [&str; 4] = ["SESSDATA", "bili_jct", "DedeUserID", "DedeUserID__ckMd5"];
const REQUIRED_COOKIES: usize = 2;

const KNOWN_KEYS: &[&str] = &[
    "endpoint",
    "copyright_mode",
    "category_id",
    "tags",
    "description",
    "dynamic_text",
    "upload_line",
    "worker_concurrency",
    "upload_parallelism",
    "max_retries",
    "retry_delay_secs",
    "attempt_timeout_secs",
    "retry_validation_errors",
    "allowed_extensions",
    "min_file_size_bytes",
    "max_file_size_bytes",
    "credentials",
];

const CREDENTIAL_KEYS: &[&str] = &["cookies", "access_token"];

/// TOML 整数是 i64
const MAX_TOML_INTEGER: u64 = i64::MAX as u64;

/// 移除未知字段并返回带前缀的字段名
fn strip_unknown_keys(table: &mut toml::Table, known: &[&str], prefix: &str) -> Vec<String> {
    let unknown: Vec<String> = table
        .keys()
        .filter(|key| !known.contains(&key.as_str()))
        .cloned()
        .collect();

    unknown
        .into_iter()
        .map(|key| {
            table.remove(&key);
            format!("{}{}", prefix, key)
        })
        .collect()
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Credentials {
    pub cookies: BTreeMap<String, String>,
    pub access_token: String,
}

impl Credentials {
    pub fn has_cookies(&self) -> bool {
        COOKIE_NAMES[..REQUIRED_COOKIES]
            .iter()
            .all(|name| self.cookies.get(*name).is_some_and(|value| !value.is_empty()))
    }

    pub fn is_configured(&self) -> bool {
        self.has_cookies() || !self.access_token.trim().is_empty()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub copyright_mode: CopyrightMode,
    pub category_id: u32,
    pub tags: Vec<String>,
    pub description: String,
    pub dynamic_text: String,
    pub upload_line: String,
    pub worker_concurrency: usize,
    pub upload_parallelism: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub attempt_timeout_secs: u64,
    pub retry_validation_errors: bool,
    pub allowed_extensions: Vec<String>,
    pub min_file_size_bytes: u64,
    pub max_file_size_bytes: u64,
    // 表格类型放最后
    pub credentials: Credentials,
}

impl Default for Config {
    fn default() -> Self {
        let policy = UploadPolicy::default();

        Self {
            endpoint: "http://127.0.0.1:8080/api".to_string(),
            copyright_mode: policy.copyright,
            category_id: policy.category_id,
            tags: policy.tags,
            description: "Uploaded with conveyor".to_string(),
            dynamic_text: policy.dynamic_text,
            upload_line: policy.upload_line,
            worker_concurrency: policy.concurrency,
            upload_parallelism: policy.upload_parallelism,
            max_retries: policy.max_retries,
            retry_delay_secs: policy.retry_delay.as_secs(),
            attempt_timeout_secs: policy.attempt_timeout.as_secs(),
            retry_validation_errors: true,
            allowed_extensions: policy.allowed_extensions,
            min_file_size_bytes: policy.min_size,
            max_file_size_bytes: policy.max_size,
            credentials: Credentials::default(),
        }
    }
}

impl Config {
    /// 文件不存在时写入默认配置
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, creating default");
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)?;
        let config = Config::from_toml_str(&content)?;
        info!(path = %path.display(), "config loaded");

        Ok(config)
    }

    /// 读取失败时回退到默认配置
    pub fn load_or_default(path: &Path) -> Config {
        match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to load config, using defaults");
                Config::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Config, ConfigError> {
        let mut table: toml::Table = content.parse()?;

        let mut unknown = strip_unknown_keys(&mut table, KNOWN_KEYS, "");
        if let Some(toml::Value::Table(credentials)) = table.get_mut("credentials") {
            unknown.extend(strip_unknown_keys(credentials, CREDENTIAL_KEYS, "credentials."));
        }
        for key in unknown {
            warn!(key = %key, "ignoring unknown config key");
        }

        Ok(toml::Value::Table(table).try_into()?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        self.check_integer_range()?;
        Ok(toml::to_string_pretty(self)?)
    }

    /// 超过 i64 范围的值无法写入 TOML
    fn check_integer_range(&self) -> Result<(), ConfigError> {
        let fields = [
            ("retry_delay_secs", self.retry_delay_secs),
            ("attempt_timeout_secs", self.attempt_timeout_secs),
            ("min_file_size_bytes", self.min_file_size_bytes),
            ("max_file_size_bytes", self.max_file_size_bytes),
        ];

        for (name, value) in fields {
            if value > MAX_TOML_INTEGER {
                return Err(ConfigError::Invalid(format!(
                    "{} = {} is larger than the maximum {}",
                    name, value, MAX_TOML_INTEGER
                )));
            }
        }

        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml_string()?)?;
        info!(path = %path.display(), "config saved");

        Ok(())
    }

    /// 本次运行的策略快照
    pub fn policy(&self) -> UploadPolicy {
        let mut allowed_extensions: Vec<String> = Vec::new();
        for ext in self.allowed_extensions.iter().map(|ext| normalize_extension(ext)) {
            if !ext.is_empty() && !allowed_extensions.contains(&ext) {
                allowed_extensions.push(ext);
            }
        }

        UploadPolicy {
            copyright: self.copyright_mode,
            category_id: self.category_id,
            tags: self.tags.clone(),
            description: self.description.clone(),
            dynamic_text: self.dynamic_text.clone(),
            upload_line: self.upload_line.clone(),
            concurrency: self.worker_concurrency,
            upload_parallelism: self.upload_parallelism,
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            allowed_extensions,
            min_size: self.min_file_size_bytes,
            max_size: self.max_file_size_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.copyright_mode, CopyrightMode::Repost);
        assert_eq!(config.category_id, 171);
        assert_eq!(config.worker_concurrency, 1);
        assert_eq!(config.max_retries, 3);
        assert!(config.allowed_extensions.contains(&"mp4".to_string()));
        assert!(!config.credentials.is_configured());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.category_id = 17;
        config.tags = vec!["测试".to_string(), "automation".to_string()];
        config.description = "line one\nline \"two\"".to_string();
        config.copyright_mode = CopyrightMode::Original;
        config.worker_concurrency = 4;
        config.max_file_size_bytes = u32::MAX as u64 * 4;
        config.credentials.cookies.insert("SESSDATA".to_string(), "abc".to_string());
        config.credentials.cookies.insert("bili_jct".to_string(), "def".to_string());
        config.credentials.access_token = "token".to_string();

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_creates_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load(&path).unwrap();

        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = Config::from_toml_str(
            r#"
            category_id = 21
            threads = 9
            favourite_colour = "green"

            [credentials]
            access_token = "xyz"
            "#,
        )
        .unwrap();

        assert_eq!(config.category_id, 21);
        assert_eq!(config.credentials.access_token, "xyz");
        // 未出现的字段保持默认
        assert_eq!(config.max_retries, Config::default().max_retries);
        assert_eq!(config.worker_concurrency, Config::default().worker_concurrency);
    }

    #[test]
    fn test_unknown_credential_keys_are_ignored() {
        let mut table: toml::Table = r#"
            category_id = 21
            threads = 9

            [credentials]
            access_token = "x"
            acess_tokn = "typo"
            "#
        .parse()
        .unwrap();

        let unknown = strip_unknown_keys(&mut table, KNOWN_KEYS, "");
        assert_eq!(unknown, vec!["threads".to_string()]);

        let credentials = table.get_mut("credentials").and_then(|value| value.as_table_mut()).unwrap();
        let unknown = strip_unknown_keys(credentials, CREDENTIAL_KEYS, "credentials.");
        assert_eq!(unknown, vec!["credentials.acess_tokn".to_string()]);
        assert!(!credentials.contains_key("acess_tokn"));

        let config = Config::from_toml_str("[credentials]\naccess_token = \"x\"\nacess_tokn = \"typo\"\n").unwrap();
        assert_eq!(config.credentials.access_token, "x");
    }

    #[test]
    fn test_size_limit_at_integer_boundary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.max_file_size_bytes = i64::MAX as u64;
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);

        config.max_file_size_bytes = u64::MAX;
        assert!(matches!(config.save(&path), Err(ConfigError::Invalid(_))));
        // 保存失败不覆盖原文件
        assert_eq!(Config::load(&path).unwrap().max_file_size_bytes, i64::MAX as u64);
    }

    #[test]
    fn test_malformed_config_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "category_id = \"not a number\"").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        assert_eq!(Config::load_or_default(&path), Config::default());
    }

    #[test]
    fn test_policy_normalizes_extensions() {
        let config = Config {
            allowed_extensions: vec![".MP4".to_string(), "mp4".to_string(), " .mkv".to_string(), "".to_string()],
            retry_delay_secs: 2,
            ..Default::default()
        };

        let policy = config.policy();
        assert_eq!(policy.allowed_extensions, vec!["mp4".to_string(), "mkv".to_string()]);
        assert_eq!(policy.retry_delay, Duration::from_secs(2));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_credentials_need_both_cookies_or_token() {
        let mut credentials = Credentials::default();
        credentials.cookies.insert("SESSDATA".to_string(), "abc".to_string());
        assert!(!credentials.is_configured());

        credentials.cookies.insert("bili_jct".to_string(), "def".to_string());
        assert!(credentials.is_configured());

        let token_only = Credentials {
            access_token: "token".to_string(),
            ..Default::default()
        };
        assert!(token_only.is_configured());
    }
}

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::types::ModelKind;
use crate::http_client::ProxyConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TlsBackend {
    #[default]
    Rustls,
    NativeTls,
}

/// 默认模型选择策略
///
/// 按类型配置首选模型名；未配置或目录中不存在时回退到该类型的第一个模型
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultModelPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<String>,
}

impl DefaultModelPolicy {
    /// 获取某类型的首选模型名
    pub fn preferred(&self, kind: ModelKind) -> Option<&str> {
        match kind {
            ModelKind::Chat => self.chat.as_deref(),
            ModelKind::Completion => self.completion.as_deref(),
        }
    }

    /// 设置或清除某类型的首选模型
    pub fn set(&mut self, kind: ModelKind, name: Option<String>) {
        let slot = match kind {
            ModelKind::Chat => &mut self.chat,
            ModelKind::Completion => &mut self.completion,
        };
        *slot = name.filter(|n| !n.trim().is_empty());
    }
}

/// Playground 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// 生成服务 API 根地址（不含结尾斜杠）
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// 是否持久化历史记录（关闭时仅保存在内存中）
    #[serde(default = "default_history_enabled")]
    pub history_enabled: bool,

    /// 历史记录存储目录
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,

    /// 历史记录 blob 的键名
    #[serde(default = "default_history_key")]
    pub history_key: String,

    #[serde(default)]
    pub default_models: DefaultModelPolicy,

    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// HTTP 代理地址（可选）
    /// 支持格式: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    /// 代理认证用户名（可选）
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_username: Option<String>,

    /// 代理认证密码（可选）
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_password: Option<String>,

    #[serde(default)]
    pub tls_backend: TlsBackend,

    /// 配置文件路径（运行时元数据，不写入 JSON）
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_api_url() -> String {
    "http://127.0.0.1:3000/api".to_string()
}

fn default_history_enabled() -> bool {
    true
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("history")
}

fn default_history_key() -> String {
    "history".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            history_enabled: default_history_enabled(),
            history_dir: default_history_dir(),
            history_key: default_history_key(),
            default_models: DefaultModelPolicy::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            proxy_url: None,
            proxy_username: None,
            proxy_password: None,
            tls_backend: TlsBackend::default(),
            config_path: None,
        }
    }
}

impl Config {
    /// 获取默认配置文件路径
    pub fn default_config_path() -> &'static str {
        "config.json"
    }

    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            // 配置文件不存在，返回默认配置
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// 获取配置文件路径（如果有）
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 将当前配置写回原始配置文件
    pub fn save(&self) -> anyhow::Result<()> {
        let path = self
            .config_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("配置文件路径未知，无法保存配置"))?;

        let content = serde_json::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, content)
            .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
        Ok(())
    }

    /// 去掉结尾斜杠后的 API 根地址
    pub fn api_base(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// 组装代理配置（未配置代理地址时返回 None）
    pub fn proxy(&self) -> Option<ProxyConfig> {
        let url = self.proxy_url.as_ref()?;
        let mut proxy = ProxyConfig::new(url.clone());
        if let (Some(username), Some(password)) = (&self.proxy_username, &self.proxy_password) {
            proxy = proxy.with_auth(username.clone(), password.clone());
        }
        Some(proxy)
    }
}

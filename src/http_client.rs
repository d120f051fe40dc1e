//! HTTP Client 构建模块
//!
//! Input: 代理配置、连接超时、TLS 后端
//! Output: reqwest::Client
//! Pos: 生成端点与模型目录共用的 HTTP 客户端

use reqwest::{Client, Proxy};
use std::time::Duration;

use crate::model::config::TlsBackend;

/// 代理配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// 代理地址，支持 http://host:port、socks5://host:port
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// 构建 HTTP Client
///
/// # Arguments
/// * `proxy` - 可选的代理配置
/// * `connect_timeout_secs` - 连接超时（秒）。流式响应可能持续很久，因此不设置整体超时
/// * `tls_backend` - TLS 实现
///
/// # Returns
/// 配置好的 reqwest::Client
pub fn build_client(
    proxy: Option<&ProxyConfig>,
    connect_timeout_secs: u64,
    tls_backend: TlsBackend,
) -> anyhow::Result<Client> {
    let mut builder = Client::builder().connect_timeout(Duration::from_secs(connect_timeout_secs));

    match tls_backend {
        TlsBackend::Rustls => {
            builder = builder.use_rustls_tls();
        }
        TlsBackend::NativeTls => {
            #[cfg(feature = "native-tls")]
            {
                builder = builder.use_native_tls();
            }
            #[cfg(not(feature = "native-tls"))]
            {
                anyhow::bail!("tlsBackend=native-tls 需要启用 native-tls feature 编译");
            }
        }
    }

    if let Some(config) = proxy {
        let mut proxy = Proxy::all(&config.url)?;
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            proxy = proxy.basic_auth(username, password);
        }
        builder = builder.proxy(proxy);
        tracing::debug!("HTTP Client 使用代理: {}", config.url);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_without_proxy() {
        let client = build_client(None, 30, TlsBackend::Rustls);
        assert!(client.is_ok());
    }

    #[test]
    fn test_build_client_with_http_proxy() {
        let proxy = ProxyConfig::new("http://127.0.0.1:7890");
        let client = build_client(Some(&proxy), 30, TlsBackend::Rustls);
        assert!(client.is_ok());
    }

    #[test]
    fn test_build_client_with_socks5_proxy() {
        let proxy = ProxyConfig::new("socks5://127.0.0.1:1080");
        let client = build_client(Some(&proxy), 30, TlsBackend::Rustls);
        assert!(client.is_ok());
    }

    #[test]
    fn test_build_client_with_auth_proxy() {
        let proxy = ProxyConfig::new("http://127.0.0.1:7890").with_auth("user", "pass");
        let client = build_client(Some(&proxy), 30, TlsBackend::Rustls);
        assert!(client.is_ok());
    }

    #[cfg(not(feature = "native-tls"))]
    #[test]
    fn test_native_tls_requires_feature() {
        let client = build_client(None, 30, TlsBackend::NativeTls);
        assert!(client.is_err());
    }
}

//! 模型目录
//!
//! 启动时从 `/models` 拉取一次，之后只读。

use anyhow::Context;
use reqwest::Client;

use super::types::{Model, ModelKind};
use crate::model::config::DefaultModelPolicy;

#[derive(Debug, Clone, Default)]
pub struct ModelDirectory {
    models: Vec<Model>,
}

impl ModelDirectory {
    #[cfg(test)]
    pub fn new(models: Vec<Model>) -> Self {
        Self { models }
    }

    /// GET {base_url}/models
    pub async fn fetch(client: &Client, base_url: &str) -> anyhow::Result<Self> {
        let url = format!("{}/models", base_url.trim_end_matches('/'));
        let response = client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("请求模型目录失败: {}", url))?
            .error_for_status()
            .with_context(|| format!("模型目录返回错误状态: {}", url))?;

        let models: Vec<Model> = response
            .json()
            .await
            .with_context(|| format!("解析模型目录失败: {}", url))?;

        tracing::info!(count = models.len(), "已加载模型目录");
        Ok(Self { models })
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// 指定类型的模型（保持目录顺序）
    pub fn of_kind(&self, kind: ModelKind) -> impl Iterator<Item = &Model> {
        self.models.iter().filter(move |m| m.kind == kind)
    }

    /// 按名称和类型查找
    pub fn find(&self, name: &str, kind: ModelKind) -> Option<&Model> {
        self.of_kind(kind).find(|m| m.name == name)
    }

    /// 选择默认模型
    ///
    /// 优先使用策略中配置的模型名（必须存在且类型匹配），否则取该类型的第一个模型
    pub fn default_for(&self, kind: ModelKind, policy: &DefaultModelPolicy) -> Option<&Model> {
        if let Some(name) = policy.preferred(kind) {
            match self.find(name, kind) {
                Some(model) => return Some(model),
                None => {
                    tracing::debug!(model = %name, kind = %kind, "配置的默认模型不在目录中，回退到第一个可用模型");
                }
            }
        }
        self.of_kind(kind).next()
    }

    /// 解析用户指定的模型名；未指定时使用默认策略
    pub fn resolve(
        &self,
        name: Option<&str>,
        kind: ModelKind,
        policy: &DefaultModelPolicy,
    ) -> anyhow::Result<Model> {
        let model = match name {
            Some(name) => self
                .find(name, kind)
                .ok_or_else(|| anyhow::anyhow!("目录中没有 {} 类型的模型: {}", kind, name))?,
            None => self
                .default_for(kind, policy)
                .ok_or_else(|| anyhow::anyhow!("目录中没有可用的 {} 类型模型", kind))?,
        };
        Ok(model.clone())
    }
}

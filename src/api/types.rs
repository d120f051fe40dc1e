//! 生成服务 API 类型定义

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// 补全会话未设置 max_tokens 时的默认值
pub const DEFAULT_COMPLETION_MAX_TOKENS: u32 = 256;

// === 模型目录 ===

/// 模型类型（决定调用哪个端点）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ModelKind {
    #[serde(rename = "chat")]
    Chat,
    #[serde(rename = "completions", alias = "completion")]
    Completion,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Completion => "completions",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模型信息（来自 `/models` 目录，只读）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Model {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ModelKind,
    /// 是否支持 system prompt，未声明时视为支持
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<bool>,
    #[serde(default, alias = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
}

impl Model {
    #[cfg(test)]
    pub fn new(name: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            system_prompt: None,
            max_tokens: None,
            vendor: None,
        }
    }

    pub fn supports_system_prompt(&self) -> bool {
        self.system_prompt.unwrap_or(true)
    }
}

// === 对话消息 ===

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// === 采样参数 ===

/// 采样参数集
///
/// 数值字段为 `None` 表示“未设置”（由服务端决定），与 0 是不同的状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSet {
    pub model: Model,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub stop: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    /// 项目标签，空字符串归入默认分组
    #[serde(default)]
    pub project: String,
}

impl ParameterSet {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            temperature: None,
            max_tokens: None,
            top_p: None,
            stop: BTreeSet::new(),
            frequency_penalty: None,
            presence_penalty: None,
            project: String::new(),
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// 按模型类型补齐默认值，并按模型上限截断 max_tokens
    pub fn normalized(mut self) -> Self {
        if self.max_tokens.is_none() && self.model.kind == ModelKind::Completion {
            self.max_tokens = Some(DEFAULT_COMPLETION_MAX_TOKENS);
        }
        if let (Some(requested), Some(cap)) = (self.max_tokens, self.model.max_tokens) {
            if requested > cap {
                tracing::debug!(
                    model = %self.model.name,
                    requested,
                    cap,
                    "max_tokens 超过模型上限，已截断"
                );
                self.max_tokens = Some(cap);
            }
        }
        self
    }

    fn stop_sequences(&self) -> Option<Vec<String>> {
        if self.stop.is_empty() {
            None
        } else {
            Some(self.stop.iter().cloned().collect())
        }
    }
}

// === 请求体 ===

/// 两种端点共用的采样字段
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SamplingFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

impl From<&ParameterSet> for SamplingFields {
    fn from(params: &ParameterSet) -> Self {
        Self {
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stop: params.stop_sequences(),
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
        }
    }
}

/// POST /chat/completions 请求体
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatCompletionsRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub sampling: SamplingFields,
}

/// POST /completions 请求体
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionsRequest {
    pub model: String,
    pub prompt: String,
    #[serde(flatten)]
    pub sampling: SamplingFields,
}

/// 发往生成端点的请求
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationRequest {
    Chat(ChatCompletionsRequest),
    Completion(CompletionsRequest),
}

impl GenerationRequest {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Chat(_) => ModelKind::Chat,
            Self::Completion(_) => ModelKind::Completion,
        }
    }

    /// 相对 API 根地址的路径
    pub fn path(&self) -> &'static str {
        match self {
            Self::Chat(_) => "/chat/completions",
            Self::Completion(_) => "/completions",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Chat(req) => &req.model,
            Self::Completion(req) => &req.model,
        }
    }

    #[cfg(feature = "sensitive-logs")]
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Chat(req) => serde_json::to_value(req),
            Self::Completion(req) => serde_json::to_value(req),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_directory_format() {
        let json = r#"[
            {"name": "gpt-4", "type": "chat", "system_prompt": true, "vendor": "openai"},
            {"name": "gpt-3.5-turbo-instruct", "description": "", "type": "completions", "maxTokens": 4096}
        ]"#;

        let models: Vec<Model> = serde_json::from_str(json).unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].kind, ModelKind::Chat);
        assert_eq!(models[0].vendor.as_deref(), Some("openai"));
        assert_eq!(models[1].kind, ModelKind::Completion);
        assert_eq!(models[1].max_tokens, Some(4096));
        assert!(models[1].supports_system_prompt());
    }

    #[test]
    fn test_system_prompt_explicitly_disabled() {
        let json = r#"{"name": "base", "type": "chat", "system_prompt": false}"#;
        let model: Model = serde_json::from_str(json).unwrap();
        assert!(!model.supports_system_prompt());
    }

    /// 未设置的参数不出现在请求体中，空 stop 集合不发送
    #[test]
    fn test_unset_parameters_omitted() {
        let mut params = ParameterSet::new(Model::new("gpt-4", ModelKind::Chat));
        params.temperature = Some(0.0);

        let req = ChatCompletionsRequest {
            model: params.model.name.clone(),
            messages: vec![Message::user("Hi")],
            sampling: SamplingFields::from(&params),
        };
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["model"], "gpt-4");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["temperature"], 0.0);
        assert!(value.get("max_tokens").is_none());
        assert!(value.get("top_p").is_none());
        assert!(value.get("stop").is_none());
    }

    #[test]
    fn test_stop_sequences_serialized() {
        let mut params = ParameterSet::new(Model::new("davinci", ModelKind::Completion));
        params.stop.insert("\n".to_string());
        params.stop.insert("END".to_string());

        let req = CompletionsRequest {
            model: "davinci".to_string(),
            prompt: "Once".to_string(),
            sampling: SamplingFields::from(&params),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["prompt"], "Once");
        assert_eq!(value["stop"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_normalized_completion_defaults_max_tokens() {
        let params = ParameterSet::new(Model::new("davinci", ModelKind::Completion)).normalized();
        assert_eq!(params.max_tokens, Some(DEFAULT_COMPLETION_MAX_TOKENS));

        let params = ParameterSet::new(Model::new("gpt-4", ModelKind::Chat)).normalized();
        assert_eq!(params.max_tokens, None);
    }

    #[test]
    fn test_normalized_clamps_to_model_cap() {
        let mut model = Model::new("small", ModelKind::Chat);
        model.max_tokens = Some(1024);
        let mut params = ParameterSet::new(model);
        params.max_tokens = Some(4096);

        assert_eq!(params.normalized().max_tokens, Some(1024));
    }

    #[test]
    fn test_request_paths() {
        let params = ParameterSet::new(Model::new("gpt-4", ModelKind::Chat));
        let chat = GenerationRequest::Chat(ChatCompletionsRequest {
            model: "gpt-4".to_string(),
            messages: vec![],
            sampling: SamplingFields::from(&params),
        });
        assert_eq!(chat.path(), "/chat/completions");
        assert_eq!(chat.kind(), ModelKind::Chat);

        let completion = GenerationRequest::Completion(CompletionsRequest {
            model: "davinci".to_string(),
            prompt: "x".to_string(),
            sampling: SamplingFields::from(&params),
        });
        assert_eq!(completion.path(), "/completions");
        assert_eq!(completion.model(), "davinci");
    }
}

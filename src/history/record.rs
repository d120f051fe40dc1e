//! 历史记录数据模型

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::api::types::{Message, ModelKind, ParameterSet};
use crate::session::error::ValidationError;

/// 空项目在展示时使用的分组名（存储值仍为空字符串）
pub const DEFAULT_PROJECT_LABEL: &str = "General";

/// 项目展示名
pub fn project_label(project: &str) -> &str {
    if project.is_empty() {
        DEFAULT_PROJECT_LABEL
    } else {
        project
    }
}

/// 记录 ID，创建时生成
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// 评分：0 到 5，步长 0.5；0 表示未评分
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Option<f64>", into = "f64")]
pub struct Rating {
    half_steps: u8,
}

impl Rating {
    pub const UNSET: Rating = Rating { half_steps: 0 };
    pub const MAX: Rating = Rating { half_steps: 10 };

    pub fn new(value: f64) -> Result<Self, ValidationError> {
        let doubled = value * 2.0;
        let max = f64::from(Self::MAX.half_steps);
        if !(0.0..=max).contains(&doubled) || doubled.fract() != 0.0 {
            return Err(ValidationError::InvalidRating(value));
        }
        Ok(Self {
            half_steps: doubled as u8,
        })
    }

    pub fn value(&self) -> f64 {
        f64::from(self.half_steps) / 2.0
    }

    pub fn is_unset(&self) -> bool {
        self.half_steps == 0
    }
}

impl TryFrom<Option<f64>> for Rating {
    type Error = ValidationError;

    fn try_from(value: Option<f64>) -> Result<Self, Self::Error> {
        match value {
            Some(v) => Self::new(v),
            None => Ok(Self::UNSET),
        }
    }
}

impl From<Rating> for f64 {
    fn from(rating: Rating) -> Self {
        rating.value()
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unset() {
            return f.write_str("-");
        }
        write!(f, "{:.1}", self.value())
    }
}

/// 时延与 token 指标
///
/// `time_to_first_token == 0` 表示没有收到任何非空 delta；
/// `output_tokens` 统计的是 delta 分块数，不是模型真实 token 数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// 首个非空 delta 到达时间（毫秒，自发送起）
    #[serde(default)]
    pub time_to_first_token: u64,
    /// 流结束时间（毫秒，自发送起）
    #[serde(default)]
    pub time_to_last_token: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// 会话内容快照，按会话类型区分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transcript {
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_prompt: Option<String>,
        messages: Vec<Message>,
    },
    Completion {
        document: String,
    },
}

impl Transcript {
    pub fn chat(system_prompt: Option<String>, messages: Vec<Message>) -> Self {
        Self::Chat {
            system_prompt,
            messages,
        }
    }

    pub fn completion(document: impl Into<String>) -> Self {
        Self::Completion {
            document: document.into(),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Chat { .. } => ModelKind::Chat,
            Self::Completion { .. } => ModelKind::Completion,
        }
    }

    /// 是否至少有一处非空白内容
    pub fn has_content(&self) -> bool {
        match self {
            Self::Chat {
                system_prompt,
                messages,
            } => {
                system_prompt
                    .as_deref()
                    .is_some_and(|s| !s.trim().is_empty())
                    || messages.iter().any(|m| !m.content.trim().is_empty())
            }
            Self::Completion { document } => !document.trim().is_empty(),
        }
    }

    /// 最后一段文本（对话取最后一条消息，补全取整个文档）
    #[cfg(test)]
    pub fn tail_text(&self) -> &str {
        match self {
            Self::Chat { messages, .. } => messages.last().map(|m| m.content.as_str()).unwrap_or(""),
            Self::Completion { document } => document,
        }
    }
}

/// 一次已完成交互的历史记录
///
/// 创建后只有评分可以修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    /// 旧数据没有 id，加载时补一个新的
    #[serde(default)]
    pub id: RecordId,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub parameters: ParameterSet,
    pub transcript: Transcript,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub rating: Rating,
}

impl HistoricalRecord {
    pub fn new(transcript: Transcript, parameters: ParameterSet, metrics: Metrics) -> Self {
        Self {
            id: RecordId::new(),
            timestamp: Utc::now(),
            parameters,
            transcript,
            metrics,
            rating: Rating::UNSET,
        }
    }

    pub fn project(&self) -> &str {
        &self.parameters.project
    }

    pub fn kind(&self) -> ModelKind {
        self.transcript.kind()
    }

    pub fn with_rating(mut self, rating: Rating) -> Self {
        self.rating = rating;
        self
    }
}

/// 时间戳既可能是 RFC3339 字符串，也可能是毫秒时间戳
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Text(String),
        Millis(i64),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| serde::de::Error::custom(format!("无效的时间戳 '{}': {}", text, e))),
        RawTimestamp::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("时间戳超出范围: {}", ms))),
    }
}

//! 生成事件解码
//!
//! 只关心两类事件：`input_tokens`（十进制整数）和 `completion`
//! （JSON 分块，对话取 `choices[0].delta.content`，补全取 `choices[0].text`）。

use serde::Deserialize;

use super::error::StreamError;
use crate::api::endpoint::SseEvent;
use crate::api::types::ModelKind;

pub const EVENT_INPUT_TOKENS: &str = "input_tokens";
pub const EVENT_COMPLETION: &str = "completion";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    InputTokens(u64),
    /// 可能为空，空 delta 由累积器忽略
    Delta(String),
    /// 未知事件
    Ignored,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// 按会话类型解码一条事件
pub fn decode(kind: ModelKind, event: &SseEvent) -> Result<StreamEvent, StreamError> {
    match event.event.as_str() {
        EVENT_INPUT_TOKENS => event
            .data
            .trim()
            .parse::<u64>()
            .map(StreamEvent::InputTokens)
            .map_err(|e| StreamError::malformed(EVENT_INPUT_TOKENS, e)),
        EVENT_COMPLETION => {
            let payload: ChunkPayload = serde_json::from_str(&event.data)
                .map_err(|e| StreamError::malformed(EVENT_COMPLETION, e))?;

            // choices 为空视为没有 delta
            let delta = payload.choices.into_iter().next().and_then(|choice| match kind {
                ModelKind::Chat => choice.delta.and_then(|d| d.content),
                ModelKind::Completion => choice.text,
            });
            Ok(StreamEvent::Delta(delta.unwrap_or_default()))
        }
        _ => Ok(StreamEvent::Ignored),
    }
}

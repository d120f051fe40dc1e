//! 会话累积状态
//!
//! 单个会话独占，delta 追加和关闭时生成记录都通过它完成。

use std::time::Duration;

use crate::api::types::{Message, Role};
use crate::history::record::{Metrics, Transcript};

#[derive(Debug, Clone)]
pub struct Accumulator {
    transcript: Transcript,
    metrics: Metrics,
    first_delta_seen: bool,
}

impl Accumulator {
    /// 对话会话在末尾补一条空的 assistant 消息作为追加目标
    pub fn new(mut transcript: Transcript) -> Self {
        if let Transcript::Chat { messages, .. } = &mut transcript {
            let has_target = messages
                .last()
                .is_some_and(|m| m.role == Role::Assistant && m.content.is_empty());
            if !has_target {
                messages.push(Message::assistant(""));
            }
        }

        Self {
            transcript,
            metrics: Metrics::default(),
            first_delta_seen: false,
        }
    }

    /// 重复出现时以最后一次为准
    pub fn set_input_tokens(&mut self, tokens: u64) {
        self.metrics.input_tokens = tokens;
    }

    /// 追加一段 delta，空 delta 不计数，返回是否生效
    pub fn apply_delta(&mut self, delta: &str, elapsed: Duration) -> bool {
        if delta.is_empty() {
            return false;
        }

        if !self.first_delta_seen {
            self.first_delta_seen = true;
            // 0 表示没有收到 delta，不足 1ms 记为 1
            self.metrics.time_to_first_token = millis(elapsed).max(1);
        }
        self.metrics.output_tokens += 1;

        match &mut self.transcript {
            Transcript::Chat { messages, .. } => {
                if let Some(last) = messages.last_mut() {
                    last.content.push_str(delta);
                }
            }
            Transcript::Completion { document } => document.push_str(delta),
        }
        true
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.metrics.time_to_last_token = millis(elapsed).max(self.metrics.time_to_first_token);
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[cfg(test)]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn into_parts(self) -> (Transcript, Metrics) {
        (self.transcript, self.metrics)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

//! 会话错误类型

use thiserror::Error;

use crate::api::types::ModelKind;

/// 会话启动前置条件不满足（可恢复，调用方修正后重试）
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// 没有任何非空内容
    #[error("没有可提交的内容：至少需要一条非空消息或非空 prompt")]
    EmptyTranscript,

    /// 模型类型与端点类型不匹配
    #[error("模型 {model} 的类型为 {actual}，不能用于 {expected} 端点")]
    KindMismatch {
        model: String,
        expected: ModelKind,
        actual: ModelKind,
    },

    /// 评分不在 {0, 0.5, ..., 5} 中
    #[error("无效的评分 {0}：必须是 0 到 5 之间 0.5 的整数倍")]
    InvalidRating(f64),
}

/// 流中止原因，会话进入 Failed 状态，但已累积的内容仍会提交
///
/// 调用方取消不算错误，见 `Termination::Cancelled`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// 连接失败或读取中断
    #[error("网络错误: {0}")]
    Network(String),

    /// 端点返回非 2xx 状态
    #[error("生成端点返回错误 {status}: {body}")]
    Status { status: u16, body: String },

    /// 事件负载无法解析
    #[error("事件 {event} 的负载格式错误: {reason}")]
    Malformed { event: String, reason: String },
}

impl StreamError {
    pub fn malformed(event: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Malformed {
            event: event.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

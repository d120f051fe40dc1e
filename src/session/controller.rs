//! 流式会话控制器
//!
//! 一个 `StreamingSession` 只驱动一次请求：
//! `Idle → Sending → Streaming → {Closed, Failed}`。
//! 无论正常结束、出错还是取消，关闭路径都只执行一次，并把已累积的内容
//! 作为一条历史记录提交。

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::accumulator::Accumulator;
use super::error::{StreamError, ValidationError};
use super::events::{self, StreamEvent};
use crate::api::endpoint::GenerationEndpoint;
use crate::api::types::{
    ChatCompletionsRequest, CompletionsRequest, GenerationRequest, Message, ParameterSet, Role,
    SamplingFields,
};
use crate::history::persistence::PersistenceError;
use crate::history::record::{HistoricalRecord, Transcript, project_label};
use crate::history::store::HistoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    Streaming,
    Closed,
    Failed,
}

/// 会话结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// 事件流自然结束
    Completed,
    /// 调用方取消
    Cancelled,
    Failed(StreamError),
}

impl Termination {
    /// 取消视为正常关闭，只有流错误进入 Failed
    pub fn state(&self) -> SessionState {
        match self {
            Self::Completed | Self::Cancelled => SessionState::Closed,
            Self::Failed(_) => SessionState::Failed,
        }
    }
}

/// 会话结果
#[derive(Debug)]
pub struct SessionReport {
    /// 已提交的记录
    pub record: HistoricalRecord,
    pub termination: Termination,
    /// 写回持久化存储的结果，失败不影响内存中的历史
    pub persisted: Result<(), PersistenceError>,
}

/// 展示层回调
///
/// 每个事件处理完（累积状态已更新）后才会回调，回调返回前不会处理下一个事件。
pub trait SessionObserver {
    fn on_state(&mut self, _state: SessionState) {}

    fn on_delta(&mut self, _delta: &str) {}

    fn on_input_tokens(&mut self, _tokens: u64) {}
}

impl SessionObserver for () {}

#[derive(Debug)]
pub struct StreamingSession {
    parameters: ParameterSet,
    request: GenerationRequest,
    accumulator: Accumulator,
    state: SessionState,
    cancel: CancellationToken,
}

impl StreamingSession {
    /// 校验前置条件并构造请求
    pub fn new(transcript: Transcript, parameters: ParameterSet) -> Result<Self, ValidationError> {
        if !transcript.has_content() {
            return Err(ValidationError::EmptyTranscript);
        }
        if parameters.model.kind != transcript.kind() {
            return Err(ValidationError::KindMismatch {
                model: parameters.model.name.clone(),
                expected: transcript.kind(),
                actual: parameters.model.kind,
            });
        }

        let parameters = parameters.normalized();
        let accumulator = Accumulator::new(transcript);
        let request = build_request(accumulator.transcript(), &parameters);
        // 只有 system prompt 而模型又不支持时，请求里没有任何消息
        if let GenerationRequest::Chat(chat) = &request {
            if chat.messages.is_empty() {
                return Err(ValidationError::EmptyTranscript);
            }
        }

        Ok(Self {
            parameters,
            request,
            accumulator,
            state: SessionState::Idle,
            cancel: CancellationToken::new(),
        })
    }

    /// 取消令牌，可在任意任务中调用 `cancel()`
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// 执行会话直到结束，并把结果提交到历史存储
    pub async fn run<E, O>(
        mut self,
        endpoint: &E,
        history: &HistoryStore,
        observer: &mut O,
    ) -> SessionReport
    where
        E: GenerationEndpoint + ?Sized,
        O: SessionObserver + ?Sized,
    {
        let started = Instant::now();
        self.transition(SessionState::Sending, observer);

        let termination = self.consume(endpoint, observer, started).await;
        self.close(termination, started, history, observer)
    }

    async fn consume<E, O>(&mut self, endpoint: &E, observer: &mut O, started: Instant) -> Termination
    where
        E: GenerationEndpoint + ?Sized,
        O: SessionObserver + ?Sized,
    {
        let mut feed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Termination::Cancelled,
            opened = endpoint.open(&self.request) => match opened {
                Ok(feed) => feed,
                Err(e) => return Termination::Failed(e),
            },
        };
        self.transition(SessionState::Streaming, observer);

        let kind = self.request.kind();
        loop {
            // 取消优先：取消后不再应用任何 delta
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Termination::Cancelled,
                next = feed.next() => next,
            };
            let Some(item) = next else {
                return Termination::Completed;
            };

            match item.and_then(|event| events::decode(kind, &event)) {
                Ok(StreamEvent::InputTokens(tokens)) => {
                    self.accumulator.set_input_tokens(tokens);
                    observer.on_input_tokens(tokens);
                }
                Ok(StreamEvent::Delta(delta)) => {
                    if self.accumulator.apply_delta(&delta, started.elapsed()) {
                        observer.on_delta(&delta);
                    }
                }
                Ok(StreamEvent::Ignored) => {}
                Err(e) => return Termination::Failed(e),
            }
        }
    }

    fn close<O>(
        mut self,
        termination: Termination,
        started: Instant,
        history: &HistoryStore,
        observer: &mut O,
    ) -> SessionReport
    where
        O: SessionObserver + ?Sized,
    {
        self.accumulator.finish(started.elapsed());
        self.transition(termination.state(), observer);

        let (transcript, metrics) = self.accumulator.into_parts();
        let record = HistoricalRecord::new(transcript, self.parameters, metrics);

        match &termination {
            Termination::Failed(e) => tracing::warn!(
                record_id = %record.id,
                model = %record.parameters.model.name,
                output_tokens = metrics.output_tokens,
                "会话异常结束，已保存部分输出: {}",
                e
            ),
            _ => tracing::info!(
                record_id = %record.id,
                model = %record.parameters.model.name,
                project = %project_label(record.project()),
                cancelled = matches!(termination, Termination::Cancelled),
                input_tokens = metrics.input_tokens,
                output_tokens = metrics.output_tokens,
                ttft_ms = metrics.time_to_first_token,
                ttlt_ms = metrics.time_to_last_token,
                "会话结束"
            ),
        }

        let persisted = history.add_record(record.clone());
        SessionReport {
            record,
            termination,
            persisted,
        }
    }

    fn transition<O>(&mut self, state: SessionState, observer: &mut O)
    where
        O: SessionObserver + ?Sized,
    {
        tracing::debug!(from = ?self.state, to = ?state, "会话状态变更");
        self.state = state;
        observer.on_state(state);
    }
}

/// 根据会话内容和参数构造请求体
fn build_request(transcript: &Transcript, parameters: &ParameterSet) -> GenerationRequest {
    let sampling = SamplingFields::from(parameters);
    let model = parameters.model.name.clone();

    match transcript {
        Transcript::Chat {
            system_prompt,
            messages,
        } => {
            let mut request_messages = Vec::with_capacity(messages.len() + 1);

            if let Some(prompt) = system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
                if parameters.model.supports_system_prompt() {
                    request_messages.push(Message::new(Role::System, prompt));
                } else {
                    tracing::warn!(model = %model, "模型不支持 system prompt，已从请求中省略");
                }
            }
            // 空消息（包括待填充的 assistant 占位）不发送
            request_messages.extend(
                messages
                    .iter()
                    .filter(|m| !m.content.trim().is_empty())
                    .cloned(),
            );

            GenerationRequest::Chat(ChatCompletionsRequest {
                model,
                messages: request_messages,
                sampling,
            })
        }
        Transcript::Completion { document } => GenerationRequest::Completion(CompletionsRequest {
            model,
            prompt: document.clone(),
            sampling,
        }),
    }
}

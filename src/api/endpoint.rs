//! 生成端点
//!
//! `GenerationEndpoint` 把一次生成请求变成事件流；`HttpEndpoint` 基于
//! reqwest-eventsource 发送请求并读取 SSE 响应，不做断线重连。

use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::Client;
use reqwest::header::ACCEPT;
use reqwest_eventsource::{Error as SourceError, Event, EventSource, retry};

use super::types::GenerationRequest;
use crate::session::error::StreamError;

/// 一条服务端事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// 事件名（未声明时为 "message"）
    pub event: String,
    pub data: String,
}

impl SseEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// 按到达顺序产出的事件流
pub type EventFeed = BoxStream<'static, Result<SseEvent, StreamError>>;

#[async_trait]
pub trait GenerationEndpoint: Send + Sync {
    /// 发送请求并打开事件流
    async fn open(&self, request: &GenerationRequest) -> Result<EventFeed, StreamError>;
}

/// 基于 HTTP + SSE 的生成端点
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    client: Client,
    base_url: String,
}

impl HttpEndpoint {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GenerationEndpoint for HttpEndpoint {
    async fn open(&self, request: &GenerationRequest) -> Result<EventFeed, StreamError> {
        let url = format!("{}{}", self.base_url, request.path());

        #[cfg(feature = "sensitive-logs")]
        tracing::debug!(
            url = %url,
            model = %request.model(),
            body = %request.to_json().map(|v| v.to_string()).unwrap_or_default(),
            "发送生成请求"
        );
        #[cfg(not(feature = "sensitive-logs"))]
        tracing::debug!(url = %url, model = %request.model(), "发送生成请求");

        let builder = self
            .client
            .post(&url)
            .header(ACCEPT, "text/event-stream");
        let builder = match request {
            GenerationRequest::Chat(req) => builder.json(req),
            GenerationRequest::Completion(req) => builder.json(req),
        };

        let mut source =
            EventSource::new(builder).map_err(|e| StreamError::Network(e.to_string()))?;
        // 流中断即结束会话，不重连
        source.set_retry_policy(Box::new(retry::Never));

        match source.next().await {
            Some(Ok(Event::Open)) => {
                tracing::debug!(url = %url, "事件流已建立");
                Ok(event_feed(source))
            }
            Some(Err(e)) => {
                source.close();
                Err(open_error(&url, e).await)
            }
            Some(Ok(Event::Message(_))) | None => {
                source.close();
                Err(StreamError::Network("事件流在建立前已关闭".to_string()))
            }
        }
    }
}

/// 连接阶段的错误：状态码和响应类型不对时带上响应体
async fn open_error(url: &str, e: SourceError) -> StreamError {
    match e {
        SourceError::InvalidStatusCode(status, response) => StreamError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        },
        // 服务端找不到模型时会以 200 + JSON 返回错误
        SourceError::InvalidContentType(_, response) => {
            tracing::warn!(url = %url, "生成端点未返回事件流");
            StreamError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            }
        }
        other => stream_error(other),
    }
}

fn stream_error(e: SourceError) -> StreamError {
    match e {
        SourceError::Transport(err) => StreamError::Network(err.to_string()),
        other @ (SourceError::Utf8(_) | SourceError::Parser(_)) => {
            StreamError::malformed("sse", other)
        }
        other => StreamError::Network(other.to_string()),
    }
}

/// 把 EventSource 转成事件流：响应体结束即流结束，其它错误作为最后一项产出
fn event_feed<S>(source: S) -> EventFeed
where
    S: Stream<Item = Result<Event, SourceError>> + Send + 'static,
{
    source
        .take_while(|item| future::ready(!matches!(item, Err(SourceError::StreamEnded))))
        .filter_map(|item| {
            future::ready(match item {
                Ok(Event::Open) => None,
                Ok(Event::Message(message)) => Some(Ok(SseEvent::new(message.event, message.data))),
                Err(e) => Some(Err(stream_error(e))),
            })
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::types::{
        ChatCompletionsRequest, CompletionsRequest, Message, Model, ModelKind, ParameterSet,
        SamplingFields,
    };
    use crate::http_client::build_client;
    use crate::model::config::TlsBackend;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{StatusCode, header};
    use axum::routing::post;
    use futures::stream;

    async fn spawn_mock(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    fn chat_request(model: &str) -> GenerationRequest {
        let params = ParameterSet::new(Model::new(model, ModelKind::Chat));
        GenerationRequest::Chat(ChatCompletionsRequest {
            model: model.to_string(),
            messages: vec![Message::user("Hi")],
            sampling: SamplingFields::from(&params),
        })
    }

    fn endpoint(base: String) -> HttpEndpoint {
        HttpEndpoint::new(build_client(None, 5, TlsBackend::Rustls).unwrap(), base)
    }

    #[tokio::test]
    async fn test_http_endpoint_streams_chat_events() {
        async fn handler(
            axum::Json(body): axum::Json<serde_json::Value>,
        ) -> impl axum::response::IntoResponse {
            assert_eq!(body["model"], "gpt-4");
            assert_eq!(body["messages"][0]["content"], "Hi");
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                "event: completion\ndata: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                 : keep-alive\n\n\
                 event: completion\r\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\r\n\r\n\
                 event: input_tokens\ndata: 5\n\n",
            )
        }

        let base = spawn_mock(Router::new().route("/api/chat/completions", post(handler))).await;
        let feed = endpoint(base).open(&chat_request("gpt-4")).await.unwrap();
        let events: Vec<_> = feed.collect().await;

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            Ok(SseEvent::new(
                "completion",
                r#"{"choices":[{"delta":{"content":"Hel"}}]}"#
            ))
        );
        assert_eq!(events[2], Ok(SseEvent::new("input_tokens", "5")));
    }

    #[tokio::test]
    async fn test_http_endpoint_completion_path() {
        async fn handler(
            axum::Json(body): axum::Json<serde_json::Value>,
        ) -> impl axum::response::IntoResponse {
            assert_eq!(body["prompt"], "Once upon");
            assert_eq!(body["max_tokens"], 256);
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                "event: completion\ndata: {\"choices\":[{\"text\":\" a time\"}]}\n\n",
            )
        }

        let base = spawn_mock(Router::new().route("/api/completions", post(handler))).await;
        let params = ParameterSet::new(Model::new("davinci", ModelKind::Completion)).normalized();
        let request = GenerationRequest::Completion(CompletionsRequest {
            model: "davinci".to_string(),
            prompt: "Once upon".to_string(),
            sampling: SamplingFields::from(&params),
        });

        let events: Vec<_> = endpoint(base).open(&request).await.unwrap().collect().await;
        assert_eq!(events.len(), 1);
    }

    /// 响应体读取中断：已收到的事件保留，错误作为最后一项
    #[tokio::test]
    async fn test_http_endpoint_surfaces_read_error() {
        async fn handler() -> impl axum::response::IntoResponse {
            let chunks = stream::iter(vec![
                Ok("event: completion\ndata: a\n\n".to_string()),
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            ])
            .then(|chunk| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                chunk
            });
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(chunks),
            )
        }

        let base = spawn_mock(Router::new().route("/api/chat/completions", post(handler))).await;
        let events: Vec<_> = endpoint(base)
            .open(&chat_request("gpt-4"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Ok(SseEvent::new("completion", "a")));
        assert!(matches!(events[1], Err(StreamError::Network(_))));
    }

    #[tokio::test]
    async fn test_http_endpoint_error_status() {
        async fn handler() -> impl axum::response::IntoResponse {
            (StatusCode::BAD_GATEWAY, "upstream down")
        }

        let base = spawn_mock(Router::new().route("/api/chat/completions", post(handler))).await;
        let result = endpoint(base).open(&chat_request("gpt-4")).await;

        match result {
            Err(StreamError::Status { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream down");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    /// 服务端以 200 + JSON 报告模型不存在
    #[tokio::test]
    async fn test_http_endpoint_rejects_non_event_stream() {
        async fn handler() -> impl axum::response::IntoResponse {
            axum::Json(serde_json::json!({"error": "Model not found."}))
        }

        let base = spawn_mock(Router::new().route("/api/chat/completions", post(handler))).await;
        let result = endpoint(base).open(&chat_request("missing")).await;

        match result {
            Err(StreamError::Status { status, body }) => {
                assert_eq!(status, 200);
                assert!(body.contains("Model not found."));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_http_endpoint_connection_refused() {
        // 绑定后立即释放端口，连接会被拒绝
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = endpoint(format!("http://{}/api", addr))
            .open(&chat_request("gpt-4"))
            .await;
        assert!(matches!(result, Err(StreamError::Network(_))));
    }
}

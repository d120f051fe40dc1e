//! 子命令实现
//!
//! 生成文本写到 stdout，日志和提示信息写到 stderr。

use std::io::Write;

use anyhow::{Context, bail};
use reqwest::Client;

use crate::api::types::{Message, ModelKind, Role};
use crate::api::{HttpEndpoint, ModelDirectory};
use crate::common::single_line_preview;
use crate::history::{HistoricalRecord, HistoryStore, Rating, RecordId, Transcript, project_label};
use crate::http_client::build_client;
use crate::model::arg::{ChatArgs, CompleteArgs, HistoryCommand, SamplingArgs};
use crate::model::config::Config;
use crate::session::{SessionObserver, SessionState, StreamingSession, Termination};

const PREVIEW_BYTES: usize = 60;

fn http_client(config: &Config) -> anyhow::Result<Client> {
    build_client(
        config.proxy().as_ref(),
        config.connect_timeout_secs,
        config.tls_backend,
    )
}

/// 列出模型目录
pub async fn list_models(config: &Config, kind: Option<ModelKind>) -> anyhow::Result<()> {
    let client = http_client(config)?;
    let directory = ModelDirectory::fetch(&client, config.api_base()).await?;
    if directory.is_empty() {
        eprintln!("模型目录为空: {}", config.api_base());
        return Ok(());
    }

    let kinds: Vec<ModelKind> = match kind {
        Some(kind) => vec![kind],
        None => vec![ModelKind::Chat, ModelKind::Completion],
    };
    for kind in kinds {
        let default = directory
            .default_for(kind, &config.default_models)
            .map(|m| m.name.clone());
        println!("[{}]", kind);
        for model in directory.of_kind(kind) {
            let marker = if default.as_deref() == Some(model.name.as_str()) { "*" } else { " " };
            let mut line = format!("{} {}", marker, model.name);
            if let Some(vendor) = &model.vendor {
                line.push_str(&format!("  ({})", vendor));
            }
            if let Some(cap) = model.max_tokens {
                line.push_str(&format!("  max_tokens={}", cap));
            }
            if !model.supports_system_prompt() {
                line.push_str("  no-system-prompt");
            }
            if !model.description.is_empty() {
                line.push_str(&format!("  {}", single_line_preview(&model.description, PREVIEW_BYTES)));
            }
            println!("{}", line);
        }
    }
    Ok(())
}

/// 对话生成
pub async fn chat(config: &Config, history: &HistoryStore, args: ChatArgs) -> anyhow::Result<()> {
    let transcript = chat_transcript(args.system, args.messages);
    generate(config, history, transcript, &args.sampling).await
}

/// 文本补全
pub async fn complete(
    config: &Config,
    history: &HistoryStore,
    args: CompleteArgs,
) -> anyhow::Result<()> {
    generate(config, history, Transcript::completion(args.prompt), &args.sampling).await
}

/// 消息按 user / assistant 交替排列
fn chat_transcript(system: Option<String>, contents: Vec<String>) -> Transcript {
    let messages = contents
        .into_iter()
        .enumerate()
        .map(|(i, content)| {
            if i % 2 == 0 {
                Message::user(content)
            } else {
                Message::assistant(content)
            }
        })
        .collect();
    Transcript::chat(system.filter(|s| !s.trim().is_empty()), messages)
}

async fn generate(
    config: &Config,
    history: &HistoryStore,
    transcript: Transcript,
    sampling: &SamplingArgs,
) -> anyhow::Result<()> {
    let client = http_client(config)?;
    let directory = ModelDirectory::fetch(&client, config.api_base()).await?;
    let model = directory.resolve(
        sampling.model.as_deref(),
        transcript.kind(),
        &config.default_models,
    )?;

    let session = StreamingSession::new(transcript, sampling.to_parameters(model))?;
    stream(config, client, history, session).await
}

/// 运行会话，Ctrl-C 取消
async fn stream(
    config: &Config,
    client: Client,
    history: &HistoryStore,
    session: StreamingSession,
) -> anyhow::Result<()> {
    let endpoint = HttpEndpoint::new(client, config.api_base());
    let parameters = session.parameters();
    tracing::info!(
        model = %parameters.model.name,
        project = %project_label(&parameters.project),
        "开始生成"
    );

    let cancel = session.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("收到中断信号，正在取消会话");
            cancel.cancel();
        }
    });

    let mut printer = StdoutPrinter::default();
    let report = session.run(&endpoint, history, &mut printer).await;
    interrupt.abort();
    printer.finish();

    let metrics = report.record.metrics;
    eprintln!(
        "record {}  input_tokens={} output_tokens={} ttft={}ms ttlt={}ms",
        report.record.id,
        metrics.input_tokens,
        metrics.output_tokens,
        metrics.time_to_first_token,
        metrics.time_to_last_token
    );
    if let Err(e) = &report.persisted {
        eprintln!("警告: 历史记录未能写入存储: {}", e);
    }

    match report.termination {
        Termination::Completed => Ok(()),
        Termination::Cancelled => {
            eprintln!("会话已取消，部分输出已保存");
            Ok(())
        }
        Termination::Failed(e) => Err(anyhow::Error::new(e).context("生成失败，部分输出已保存")),
    }
}

/// 把 delta 直接写到 stdout
#[derive(Debug, Default)]
struct StdoutPrinter {
    wrote_any: bool,
}

impl StdoutPrinter {
    fn finish(&mut self) {
        if self.wrote_any {
            println!();
        }
    }
}

impl SessionObserver for StdoutPrinter {
    fn on_state(&mut self, state: SessionState) {
        tracing::debug!(state = ?state, "会话状态");
    }

    fn on_delta(&mut self, delta: &str) {
        let mut stdout = std::io::stdout().lock();
        // stdout 被关闭时忽略，会话仍会提交
        let _ = stdout.write_all(delta.as_bytes());
        let _ = stdout.flush();
        self.wrote_any = true;
    }

    fn on_input_tokens(&mut self, tokens: u64) {
        tracing::debug!(input_tokens = tokens, "输入 token 数");
    }
}

/// 历史记录子命令
pub async fn history_command(
    config: &Config,
    history: &HistoryStore,
    command: HistoryCommand,
) -> anyhow::Result<()> {
    match command {
        HistoryCommand::List { project } => {
            list_history(history, project.as_deref());
            Ok(())
        }
        HistoryCommand::Show { id } => {
            let record = find_record(history, id)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&record).context("序列化历史记录失败")?
            );
            Ok(())
        }
        HistoryCommand::Rate { id, rating } => {
            let rating = Rating::new(rating)?;
            if !history.rate(id, rating).context("保存评分失败")? {
                bail!("未找到历史记录: {}", id);
            }
            eprintln!("已评分 {}: {}", id, rating);
            Ok(())
        }
        HistoryCommand::Delete { ids } => {
            let mut targets = Vec::with_capacity(ids.len());
            for id in ids {
                match history.find(id) {
                    Some(record) => targets.push(record),
                    None => tracing::warn!(record_id = %id, "未找到历史记录，跳过"),
                }
            }
            let removed = match targets.as_slice() {
                [one] => history.delete_record(one),
                many => history.delete_records(many),
            }
            .context("删除历史记录失败")?;
            eprintln!("已删除 {} 条记录", removed);
            Ok(())
        }
        HistoryCommand::DeleteProject { project } => {
            let removed = history.delete_project(&project).context("删除项目失败")?;
            eprintln!("已删除项目 {} 下的 {} 条记录", project_label(&project), removed);
            Ok(())
        }
        HistoryCommand::Replay { id } => {
            let record = find_record(history, id)?;
            let session = StreamingSession::new(
                replay_transcript(record.transcript),
                record.parameters,
            )?;
            let client = http_client(config)?;
            stream(config, client, history, session).await
        }
    }
}

/// 修改默认模型并写回配置文件
pub fn set_default_model(
    mut config: Config,
    kind: ModelKind,
    name: Option<String>,
) -> anyhow::Result<()> {
    config.default_models.set(kind, name);
    config.save()?;

    match config.default_models.preferred(kind) {
        Some(name) => eprintln!("{} 默认模型已设为 {}", kind, name),
        None => eprintln!("已清除 {} 默认模型", kind),
    }
    Ok(())
}

fn find_record(history: &HistoryStore, id: RecordId) -> anyhow::Result<HistoricalRecord> {
    history
        .find(id)
        .with_context(|| format!("未找到历史记录: {}", id))
}

fn list_history(history: &HistoryStore, project: Option<&str>) {
    if history.is_empty() {
        eprintln!("暂无历史记录");
        return;
    }
    if let Some(project) = project {
        let projects = history.projects();
        if !projects.iter().any(|p| p == project) {
            let labels: Vec<&str> = projects.iter().map(|p| project_label(p)).collect();
            eprintln!("项目 {} 下没有记录，已有项目: {}", project, labels.join(", "));
            return;
        }
    }

    for group in history.groups() {
        if project.is_some_and(|p| p != group.project) {
            continue;
        }
        println!("== {} ({}) ==", group.label(), group.records.len());
        for record in &group.records {
            println!("  {}", summary_line(record));
        }
    }
}

/// id  时间  类型  模型  厂商  温度  ttft  ttlt  输入/输出 token  评分  提示
fn summary_line(record: &HistoricalRecord) -> String {
    let parameters = &record.parameters;
    let metrics = &record.metrics;
    let temperature = parameters
        .temperature
        .map(|t| format!("{:.2}", t))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{}  {}  {:<11}  {:<24}  {:<10}  t={:<4}  ttft={:>5}ms  ttlt={:>6}ms  in/out={}/{}  {:>3}  {}",
        record.id,
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.kind(),
        parameters.model.name,
        parameters.model.vendor.as_deref().unwrap_or("-"),
        temperature,
        metrics.time_to_first_token,
        metrics.time_to_last_token,
        metrics.input_tokens,
        metrics.output_tokens,
        record.rating.to_string(),
        single_line_preview(prompt_text(&record.transcript), PREVIEW_BYTES)
    )
}

/// 列表中展示的提示内容：对话取第一条用户消息，补全取文档开头
fn prompt_text(transcript: &Transcript) -> &str {
    match transcript {
        Transcript::Chat { messages, .. } => messages
            .iter()
            .find(|m| m.role == Role::User && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
            .unwrap_or(""),
        Transcript::Completion { document } => document,
    }
}

/// 重新生成时去掉对话末尾的回复，让新的回复取代它
fn replay_transcript(transcript: Transcript) -> Transcript {
    match transcript {
        Transcript::Chat {
            system_prompt,
            mut messages,
        } => {
            if messages.last().is_some_and(|m| m.role == Role::Assistant) {
                messages.pop();
            }
            Transcript::chat(system_prompt, messages)
        }
        completion => completion,
    }
}

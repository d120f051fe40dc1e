mod api;
mod commands;
mod common;
mod history;
mod http_client;
mod model;
mod session;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use history::{FileBlobStore, HistoryStore, MemoryBlobStore, PersistenceAdapter};
use model::arg::{Args, Command};
use model::config::Config;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let args = Args::parse();

    // 初始化日志（stdout 留给生成的文本）
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(args).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // 加载配置
    let config_path = args
        .config
        .unwrap_or_else(|| Config::default_config_path().to_string());
    let file_config = Config::load(&config_path)?;
    // 命令行覆盖只作用于本次运行，不写回配置文件
    let mut config = file_config.clone();
    if let Some(api_url) = args.api_url {
        config.api_url = api_url;
    }
    tracing::debug!(api_url = %config.api_base(), "配置已加载");

    let history = open_history(&config)?;

    match args.command {
        Command::Models { kind } => commands::list_models(&config, kind.map(Into::into)).await,
        Command::Chat(chat) => commands::chat(&config, &history, chat).await,
        Command::Complete(complete) => commands::complete(&config, &history, complete).await,
        Command::History { command } => commands::history_command(&config, &history, command).await,
        Command::DefaultModel { kind, name } => {
            commands::set_default_model(file_config, kind.into(), name)
        }
    }
}

/// 打开历史存储；关闭持久化时仅保存在内存中
fn open_history(config: &Config) -> anyhow::Result<HistoryStore> {
    let adapter: Arc<dyn PersistenceAdapter> = if config.history_enabled {
        Arc::new(FileBlobStore::new(&config.history_dir))
    } else {
        tracing::info!("历史记录持久化已关闭，本次运行的记录不会保存");
        Arc::new(MemoryBlobStore::new())
    };

    HistoryStore::open(adapter, config.history_key.clone()).with_context(|| {
        format!("加载历史记录失败: {}", config.history_dir.display())
    })
}

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use crate::api::types::{Model, ModelKind, ParameterSet};
use crate::history::record::RecordId;

/// 流式文本生成 Playground 命令行客户端
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<String>,

    /// 覆盖配置中的 API 根地址
    #[arg(long)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 列出模型目录
    Models {
        /// 只显示某一类型
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },

    /// 对话生成
    Chat(ChatArgs),

    /// 文本补全
    Complete(CompleteArgs),

    /// 历史记录管理
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// 设置默认模型并写回配置文件，省略模型名时清除
    DefaultModel {
        #[arg(value_enum)]
        kind: KindArg,
        name: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
pub struct ChatArgs {
    /// 消息内容，按 user / assistant 交替排列，第一条为 user
    #[arg(short, long = "message", required = true)]
    pub messages: Vec<String>,

    /// system prompt
    #[arg(short, long)]
    pub system: Option<String>,

    #[command(flatten)]
    pub sampling: SamplingArgs,
}

#[derive(ClapArgs, Debug)]
pub struct CompleteArgs {
    /// 待续写的文本
    pub prompt: String,

    #[command(flatten)]
    pub sampling: SamplingArgs,
}

/// 采样参数，未指定的参数不发送
#[derive(ClapArgs, Debug, Default)]
pub struct SamplingArgs {
    /// 模型名，未指定时使用默认模型
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    /// 停止序列，可重复
    #[arg(long)]
    pub stop: Vec<String>,

    #[arg(long)]
    pub frequency_penalty: Option<f32>,

    #[arg(long)]
    pub presence_penalty: Option<f32>,

    /// 项目标签
    #[arg(long, default_value = "")]
    pub project: String,
}

impl SamplingArgs {
    pub fn to_parameters(&self, model: Model) -> ParameterSet {
        let mut params = ParameterSet::new(model).with_project(self.project.clone());
        params.temperature = self.temperature;
        params.max_tokens = self.max_tokens;
        params.top_p = self.top_p;
        params.stop = self.stop.iter().filter(|s| !s.is_empty()).cloned().collect();
        params.frequency_penalty = self.frequency_penalty;
        params.presence_penalty = self.presence_penalty;
        params
    }
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// 按项目分组列出历史记录
    List {
        /// 只显示某个项目（"" 为默认分组）
        #[arg(long)]
        project: Option<String>,
    },

    /// 显示一条记录的完整内容
    Show { id: RecordId },

    /// 评分（0 到 5，步长 0.5；0 清除评分）
    Rate { id: RecordId, rating: f64 },

    /// 删除记录
    Delete {
        #[arg(required = true)]
        ids: Vec<RecordId>,
    },

    /// 删除项目下的所有记录
    DeleteProject { project: String },

    /// 用记录中的内容和参数重新生成
    Replay { id: RecordId },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum KindArg {
    Chat,
    Completion,
}

impl From<KindArg> for ModelKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Chat => ModelKind::Chat,
            KindArg::Completion => ModelKind::Completion,
        }
    }
}

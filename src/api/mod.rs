//! 生成服务 API：类型、端点与模型目录

pub mod directory;
pub mod endpoint;
pub mod types;

pub use directory::ModelDirectory;
pub use endpoint::HttpEndpoint;

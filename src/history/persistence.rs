//! 历史记录持久化适配器
//!
//! 以字符串键读写整块数据（blob）：
//! - `FileBlobStore`：每个键一个 JSON 文件，原子写入
//! - `MemoryBlobStore`：仅内存，用于测试和关闭持久化时

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use parking_lot::RwLock;
use thiserror::Error;

/// 持久化失败（非致命，调用方应提示用户）
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("读写历史存储失败: {0}")]
    Io(#[from] io::Error),

    #[error("序列化历史记录失败: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("历史记录数据无法解析: {0}")]
    Decode(#[source] serde_json::Error),
}

/// 按键读写 blob 的同步存储
pub trait PersistenceAdapter: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

/// 基于文件的 blob 存储
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 获取文件路径
    fn get_file_path(&self, key: &str) -> PathBuf {
        // 清理 key 中的非法字符
        let safe_key: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe_key))
    }
}

impl PersistenceAdapter for FileBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.get_file_path(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir)?;

        let final_path = self.get_file_path(key);
        let tmp_path = final_path.with_extension("json.tmp");
        fs::write(&tmp_path, value)?;

        if let Err(rename_err) = fs::rename(&tmp_path, &final_path) {
            if final_path.exists() {
                fs::remove_file(&final_path)?;
                fs::rename(&tmp_path, &final_path)?;
            } else {
                return Err(rename_err.into());
            }
        }

        tracing::debug!(
            key = %key,
            bytes = value.len(),
            path = %final_path.display(),
            "blob 已写入"
        );
        Ok(())
    }
}

/// 内存 blob 存储
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceAdapter for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.blobs.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.blobs.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

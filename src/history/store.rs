//! 历史记录存储
//!
//! 持有全部记录，所有修改都会把整个集合序列化后写回持久化适配器：
//! - 读取时按时间倒序返回
//! - 写入失败只记录警告并返回错误，内存中的修改保留
//! - 按项目分组，空项目归入默认分组

use std::sync::Arc;

use parking_lot::RwLock;

use super::persistence::{PersistenceAdapter, PersistenceError};
use super::record::{HistoricalRecord, Rating, RecordId, project_label};

/// 同一项目下的记录（已按时间倒序）
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectGroup {
    /// 存储中的项目值（默认分组为空字符串）
    pub project: String,
    pub records: Vec<HistoricalRecord>,
}

impl ProjectGroup {
    pub fn label(&self) -> &str {
        project_label(&self.project)
    }
}

pub struct HistoryStore {
    adapter: Arc<dyn PersistenceAdapter>,
    key: String,
    /// 存储顺序即插入顺序（新记录在前），不代表展示顺序
    records: RwLock<Vec<HistoricalRecord>>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("key", &self.key)
            .field("records", &self.records.read().len())
            .finish()
    }
}

impl HistoryStore {
    /// 从持久化适配器加载（只在启动时读取一次）
    pub fn open(
        adapter: Arc<dyn PersistenceAdapter>,
        key: impl Into<String>,
    ) -> Result<Self, PersistenceError> {
        let key = key.into();
        let (records, assigned) = match adapter.get(&key)? {
            Some(content) if !content.trim().is_empty() => decode_records(&content)?,
            _ => (Vec::new(), 0),
        };

        tracing::debug!(key = %key, count = records.len(), "历史记录已加载");

        let store = Self {
            adapter,
            key,
            records: RwLock::new(records),
        };
        if assigned > 0 {
            tracing::info!(key = %store.key, assigned, "旧历史记录缺少 id，已补充并写回");
            // 写回失败时下次启动会重新分配，persist 已记录警告
            let _ = store.persist(&store.records.read());
        }
        Ok(store)
    }

    /// 仅内存的存储
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            adapter: Arc::new(super::persistence::MemoryBlobStore::new()),
            key: "history".to_string(),
            records: RwLock::new(Vec::new()),
        }
    }

    /// 全部记录，按时间倒序
    pub fn records(&self) -> Vec<HistoricalRecord> {
        let mut records = self.records.read().clone();
        // 稳定排序：同一时间戳保持存储顺序
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn find(&self, id: RecordId) -> Option<HistoricalRecord> {
        self.records.read().iter().find(|r| r.id == id).cloned()
    }

    /// 新记录插到最前面，不做去重
    pub fn add_record(&self, record: HistoricalRecord) -> Result<(), PersistenceError> {
        let mut records = self.records.write();
        tracing::debug!(
            record_id = %record.id,
            project = %project_label(record.project()),
            "添加历史记录"
        );
        records.insert(0, record);
        self.persist(&records)
    }

    pub fn delete_record(&self, record: &HistoricalRecord) -> Result<usize, PersistenceError> {
        self.delete_records(std::slice::from_ref(record))
    }

    /// 删除 ID 与列表中任一记录相同的记录，返回删除数量
    pub fn delete_records(&self, targets: &[HistoricalRecord]) -> Result<usize, PersistenceError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| !targets.iter().any(|t| t.id == r.id));
        let removed = before - records.len();

        if removed == 0 {
            return Ok(0);
        }
        tracing::debug!(removed, "删除历史记录");
        self.persist(&records)?;
        Ok(removed)
    }

    /// 用新内容替换同 ID 的记录；不存在时集合不变，返回 false
    pub fn update_record(&self, record: HistoricalRecord) -> Result<bool, PersistenceError> {
        let mut records = self.records.write();
        let Some(slot) = records.iter_mut().find(|r| r.id == record.id) else {
            tracing::debug!(record_id = %record.id, "未找到要更新的历史记录");
            return Ok(false);
        };
        *slot = record;
        self.persist(&records)?;
        Ok(true)
    }

    /// 修改评分
    pub fn rate(&self, id: RecordId, rating: Rating) -> Result<bool, PersistenceError> {
        match self.find(id) {
            Some(record) => self.update_record(record.with_rating(rating)),
            None => Ok(false),
        }
    }

    /// 删除项目下的所有记录（精确匹配存储值，"" 即默认分组）
    pub fn delete_project(&self, project: &str) -> Result<usize, PersistenceError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.project() != project);
        let removed = before - records.len();

        if removed == 0 {
            return Ok(0);
        }
        tracing::info!(project = %project_label(project), removed, "删除项目历史记录");
        self.persist(&records)?;
        Ok(removed)
    }

    /// 按项目分组；分组顺序为各项目最新一条记录的先后
    pub fn groups(&self) -> Vec<ProjectGroup> {
        let mut groups: Vec<ProjectGroup> = Vec::new();
        for record in self.records() {
            match groups.iter_mut().find(|g| g.project == record.project()) {
                Some(group) => group.records.push(record),
                None => groups.push(ProjectGroup {
                    project: record.project().to_string(),
                    records: vec![record],
                }),
            }
        }
        groups
    }

    /// 所有出现过的项目（与 `groups` 顺序一致）
    pub fn projects(&self) -> Vec<String> {
        self.groups().into_iter().map(|g| g.project).collect()
    }

    /// 整体写回；调用方持有写锁，保证写入顺序与修改顺序一致
    fn persist(&self, records: &[HistoricalRecord]) -> Result<(), PersistenceError> {
        let result = serde_json::to_string(records)
            .map_err(PersistenceError::Encode)
            .and_then(|json| self.adapter.set(&self.key, &json));

        if let Err(e) = &result {
            tracing::warn!(key = %self.key, "历史记录保存失败: {}", e);
        }
        result
    }
}

/// 解析整个集合，同时统计没有 id 的旧记录条数
fn decode_records(content: &str) -> Result<(Vec<HistoricalRecord>, usize), PersistenceError> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(content).map_err(PersistenceError::Decode)?;
    let assigned = raw.iter().filter(|v| v.get("id").is_none()).count();

    let records = raw
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<HistoricalRecord>, _>>()
        .map_err(PersistenceError::Decode)?;
    Ok((records, assigned))
}

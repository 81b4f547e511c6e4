//! 事件查询条件（EventQuery）
//!
//! 描述一次 `events` 调用：键、排他下界 `offset`、最大条数 `limit` 与标签过滤。
//! 标签过滤语义为“全部包含”：事件必须含有每一个请求的标签，空过滤匹配全部事件。
//!
use crate::persist::PersistedEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    key: String,
    offset: u64,
    limit: usize,
    tags: Vec<String>,
}

impl EventQuery {
    pub fn new(key: impl Into<String>, offset: u64, limit: usize, tags: &[String]) -> Self {
        let mut tags = tags.to_vec();
        tags.sort();
        tags.dedup();

        Self {
            key: key.into(),
            offset,
            limit,
            tags,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_filtered(&self) -> bool {
        !self.tags.is_empty()
    }

    /// 事件是否满足本查询的键、下界与标签条件（不含 limit）
    pub fn matches(&self, event: &PersistedEvent) -> bool {
        event.key() == self.key
            && event.sequence_number() > self.offset
            && self.tags.iter().all(|tag| event.has_tag(tag))
    }
}

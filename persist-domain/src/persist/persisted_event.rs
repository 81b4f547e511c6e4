//! 已持久化事件（PersistedEvent）
//!
//! 不可变值对象：构造时完成全部校验，字段私有且只提供只读访问。
//! 标签在构造时按字典序排序，保证比较与序列化的确定性。
//!
use crate::{
    error::{PersistResult, RecordError},
    persist::wire,
};
use bon::bon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 某个持久化键下的一条事件记录。
///
/// 未显式设置 `created_at` 时取系统时钟的当前时间；需要确定时间时显式传入，
/// 或经由 `EventJournal` 构造（使用其注入的 `Clock`）。
///
/// ```
/// use persist_domain::persist::PersistedEvent;
/// use serde_json::json;
///
/// let event = PersistedEvent::builder()
///     .data(json!({ "amount": 10 }))
///     .sequence_number(1)
///     .key("acct-1")
///     .tags(vec!["debit".to_string(), "audit".to_string()])
///     .build()
///     .unwrap();
///
/// assert_eq!(event.tags(), ["audit", "debit"]);
/// ```
///
/// 构造后字段不可修改：
///
/// ```compile_fail
/// use persist_domain::persist::PersistedEvent;
///
/// let mut event = PersistedEvent::builder()
///     .data(serde_json::json!(1))
///     .sequence_number(1)
///     .key("acct-1")
///     .build()
///     .unwrap();
/// event.sequence_number = 2;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEvent {
    /// 事件负载，对本层不透明
    data: Value,
    /// 键内序列号，从 1 开始连续递增
    sequence_number: u64,
    /// 所属聚合/流的标识
    key: String,
    /// 已排序的标签
    tags: Vec<String>,
    /// 创建时间（毫秒精度）
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
}

#[bon]
impl PersistedEvent {
    #[builder]
    pub fn new(
        data: Value,
        sequence_number: u64,
        #[builder(into)] key: String,
        #[builder(default)] tags: Vec<String>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Self, RecordError> {
        if data.is_null() {
            return Err(RecordError::DataRequired);
        }

        let mut tags = tags;
        tags.sort();

        Ok(Self {
            data,
            sequence_number,
            key,
            tags,
            created_at: wire::normalize_created_at(created_at),
        })
    }
}

impl PersistedEvent {
    /// 从线上形态构造并重新校验
    pub fn from_json(value: Value) -> PersistResult<Self> {
        let mut fields = wire::into_fields(value)?;
        let data = wire::take_data(&mut fields)?;
        let tags = wire::take_tags(&mut fields)?;
        let sequence_number = wire::take_sequence_number(&fields)?;
        let key = wire::take_key(&mut fields)?;
        let created_at = wire::take_created_at(&fields)?;

        let event = Self::builder()
            .data(data)
            .sequence_number(sequence_number)
            .key(key)
            .tags(tags)
            .maybe_created_at(created_at)
            .build()?;

        Ok(event)
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags
            .binary_search_by(|probe| probe.as_str().cmp(tag))
            .is_ok()
    }
}

impl<'de> Deserialize<'de> for PersistedEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(value).map_err(serde::de::Error::custom)
    }
}

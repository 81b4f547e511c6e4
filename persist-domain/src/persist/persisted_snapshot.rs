use crate::{
    error::{PersistResult, RecordError},
    persist::wire,
};
use bon::bon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 快照：某个键在 `sequence_number` 处（含）折叠后的状态
///
/// 未显式设置 `created_at` 时取系统时钟的当前时间，`EventJournal::snapshot_now` 使用注入的 `Clock`。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    data: Value,
    /// 快照所包含的最后一条事件的序列号
    sequence_number: u64,
    key: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
}

#[bon]
impl PersistedSnapshot {
    #[builder]
    pub fn new(
        data: Value,
        sequence_number: u64,
        #[builder(into)] key: String,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Self, RecordError> {
        if data.is_null() {
            return Err(RecordError::DataRequired);
        }

        Ok(Self {
            data,
            sequence_number,
            key,
            created_at: wire::normalize_created_at(created_at),
        })
    }
}

impl PersistedSnapshot {
    pub fn from_json(value: Value) -> PersistResult<Self> {
        let mut fields = wire::into_fields(value)?;
        let data = wire::take_data(&mut fields)?;
        let sequence_number = wire::take_sequence_number(&fields)?;
        let key = wire::take_key(&mut fields)?;
        let created_at = wire::take_created_at(&fields)?;

        let snapshot = Self::builder()
            .data(data)
            .sequence_number(sequence_number)
            .key(key)
            .maybe_created_at(created_at)
            .build()?;

        Ok(snapshot)
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

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl<'de> Deserialize<'de> for PersistedSnapshot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(value).map_err(serde::de::Error::custom)
    }
}

//! 记录的线上形态（wire shape）解析
//!
//! 字段采用 camelCase：`data`、`sequenceNumber`、`key`、`tags`、`createdAt`（毫秒时间戳）。
//! 校验顺序与类型化构造保持一致：先 data，再 tags，最后 sequenceNumber。
//!
use crate::error::{PersistError, PersistResult, RecordError};
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::{Map, Value};

pub(crate) type Fields = Map<String, Value>;

pub(crate) fn into_fields(value: Value) -> Result<Fields, RecordError> {
    match value {
        Value::Object(fields) => Ok(fields),
        other => Err(RecordError::Malformed {
            reason: format!("expected an object, found {}", type_name(&other)),
        }),
    }
}

pub(crate) fn take_data(fields: &mut Fields) -> Result<Value, RecordError> {
    match fields.remove("data") {
        None | Some(Value::Null) => Err(RecordError::DataRequired),
        Some(data) => Ok(data),
    }
}

pub(crate) fn take_tags(fields: &mut Fields) -> Result<Vec<String>, RecordError> {
    match fields.remove("tags") {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(tag) => Ok(tag),
                other => Err(RecordError::InvalidTags {
                    reason: format!("found {} element", type_name(&other)),
                }),
            })
            .collect(),
        Some(other) => Err(RecordError::InvalidTags {
            reason: format!("found {}", type_name(&other)),
        }),
    }
}

/// 序列号由引擎分配，类型不符属于内部错误
pub(crate) fn take_sequence_number(fields: &Fields) -> PersistResult<u64> {
    fields
        .get("sequenceNumber")
        .and_then(Value::as_u64)
        .ok_or_else(|| PersistError::invariant("sequence number must be an unsigned integer"))
}

pub(crate) fn take_key(fields: &mut Fields) -> Result<String, RecordError> {
    match fields.remove("key") {
        Some(Value::String(key)) => Ok(key),
        Some(other) => Err(RecordError::Malformed {
            reason: format!("key must be a string, found {}", type_name(&other)),
        }),
        None => Err(RecordError::Malformed {
            reason: "key is missing".to_string(),
        }),
    }
}

pub(crate) fn take_created_at(fields: &Fields) -> Result<Option<DateTime<Utc>>, RecordError> {
    match fields.get("createdAt") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(Some)
            .ok_or_else(|| RecordError::Malformed {
                reason: "createdAt must be epoch milliseconds".to_string(),
            }),
    }
}

/// 统一截断到毫秒精度，保证与线上形态往返一致
pub(crate) fn normalize_created_at(created_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    created_at.unwrap_or_else(Utc::now).trunc_subsecs(3)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

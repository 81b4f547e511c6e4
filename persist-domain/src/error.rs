//! 持久化引擎统一错误定义
//!
//! 按严重程度划分为四类：
//! - 记录校验错误（调用方输入问题，可恢复）；
//! - 顺序/一致性错误（可基于最新状态重试）；
//! - 后端 I/O 错误；
//! - 内部不变量错误（引擎缺陷，不应暴露为用户输入校验）。
//!
use thiserror::Error;

/// 记录构造阶段的结构性错误
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("data required")]
    DataRequired,
    #[error("tags must be a string sequence: {reason}")]
    InvalidTags { reason: String },
    #[error("malformed record: {reason}")]
    Malformed { reason: String },
}

/// 错误类别，便于调用方区分“输入有误”与“引擎损坏”
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Ordering,
    Backend,
    Internal,
}

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PersistError {
    // --- 记录校验 ---
    #[error("invalid record: {0}")]
    Record(#[from] RecordError),

    // --- 顺序/一致性 ---
    #[error("sequence conflict: key={key}, expected={expected}, actual={actual}")]
    SequenceConflict {
        key: String,
        expected: u64,
        actual: u64,
    },
    #[error(
        "snapshot references unpersisted event: key={key}, sequence_number={sequence_number}, last_sequence_number={last_sequence_number}"
    )]
    UnpersistedSnapshot {
        key: String,
        sequence_number: u64,
        last_sequence_number: u64,
    },

    // --- 后端 ---
    #[error("backend error: {reason}")]
    Backend { reason: String },
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    // --- 内部不变量 ---
    #[error("invariant violated: {reason}")]
    Invariant { reason: String },
}

impl PersistError {
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::Invariant {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Record(_) => ErrorKind::Validation,
            Self::SequenceConflict { .. } | Self::UnpersistedSnapshot { .. } => ErrorKind::Ordering,
            Self::Backend { .. } | Self::Serde { .. } => ErrorKind::Backend,
            Self::Invariant { .. } => ErrorKind::Internal,
        }
    }

    /// 顺序类错误可在刷新状态后重试
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Ordering
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::SequenceConflict { .. })
    }
}

/// 统一 Result 类型别名
pub type PersistResult<T> = Result<T, PersistError>;

// 允许在基础设施层直接使用 `?` 将 sqlx 错误转换为 PersistError
#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for PersistError {
    fn from(err: sqlx::Error) -> Self {
        PersistError::Backend {
            reason: err.to_string(),
        }
    }
}

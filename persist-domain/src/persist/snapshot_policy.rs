//! 快照策略
//!
//! 以“距上一个快照已累积的事件数”决定是否落盘新快照，
//! 中途漏掉的检查点不会导致之后一直不再生成快照。
//!
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    #[default]
    Never,
    /// 距上一个快照至少累积 n 条事件（n 为 0 时按 1 处理）
    Every(u64),
}

impl SnapshotPolicy {
    /// `latest` 为当前最新快照的序列号，没有快照时为 `None`
    pub fn is_due(&self, sequence_number: u64, latest: Option<u64>) -> bool {
        let SnapshotPolicy::Every(interval) = *self else {
            return false;
        };
        if sequence_number == 0 {
            return false;
        }

        let since = sequence_number.saturating_sub(latest.unwrap_or(0));
        since >= interval.max(1)
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, SnapshotPolicy::Never)
    }
}

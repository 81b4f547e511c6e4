use serde::{Deserialize, Serialize};

/// InMemoryEngine 配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryEngineConfig {
    /// 每个键保留的快照数量（保留最新的 N 个）；`None` 表示全部保留
    pub snapshot_retention: Option<usize>,
}

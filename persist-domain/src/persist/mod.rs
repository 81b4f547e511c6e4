//! 持久化与事件溯源（persist）
//!
//! 定义事件/快照记录、引擎协议及其通用组合实现，支持：
//! - 不可变记录与构造期校验（`PersistedEvent`、`PersistedSnapshot`）；
//! - 引擎协议（`PersistenceEngine`）与查询语义（`EventQuery`）；
//! - 不变量校验装饰器（`ValidatingEngine`）；
//! - 面向调用方的编排器（`EventJournal`）：追加、回放、重建与快照策略。
//!
//! 该模块聚焦协议与装配逻辑，具体存储后端由上层提供实现并注入。
//!
mod engine;
mod event_query;
mod journal;
mod persisted_event;
mod persisted_snapshot;
mod snapshot_policy;
mod validating_engine;
mod wire;

#[cfg(test)]
mod test_support;

pub use engine::{EventStream, PersistenceEngine};
pub use event_query::EventQuery;
pub use journal::{EventJournal, JournalConfig, Rehydrated};
pub use persisted_event::PersistedEvent;
pub use persisted_snapshot::PersistedSnapshot;
pub use snapshot_policy::SnapshotPolicy;
pub use validating_engine::ValidatingEngine;

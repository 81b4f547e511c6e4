//! 事件溯源持久化引擎基础库（persist-domain）
//!
//! 提供以追加日志为中心的通用抽象，用于在应用中实现：
//! - 按键分区、序列号连续递增的不可变事件记录；
//! - 限制重放成本的时点快照；
//! - 按序、可按标签过滤的事件读取，用于重建与投影。
//!
//! 本 crate 与具体存储解耦，仅定义记录类型、引擎协议、不变量校验层与最小必要的错误类型，
//! 以便在不同基础设施（内存、数据库等）上进行适配实现。
//!
//! 典型用法：
//! 1. 选择或实现一个 `PersistenceEngine` 后端；
//! 2. 使用 `EventJournal::builder()` 注入后端、配置与时钟；
//! 3. 通过 `append` 追加事件，通过 `rehydrate` 从“快照 + 增量事件”重建状态。
//!
pub mod clock;
pub mod error;
pub mod persist;

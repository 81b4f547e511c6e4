//! 内存版持久化后端（persist-memory）
//!
//! `InMemoryEngine` 实现 `persist_domain::persist::PersistenceEngine` 协议，
//! 典型用途：测试环境、示例与本地开发。进程退出后数据即丢失。
//!
pub mod config;
pub mod inmemory_engine;

pub use config::InMemoryEngineConfig;
pub use inmemory_engine::InMemoryEngine;

//! 持久化引擎协议（PersistenceEngine）
//!
//! 每个具体后端都必须实现四个操作：追加事件、查询事件、读取最新快照、保存快照。
//! 协议本身没有默认实现，未实现的后端在编译期即被拒绝。
//!
use crate::{
    error::PersistResult,
    persist::{PersistedEvent, PersistedSnapshot},
};
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::TryStreamExt;
use std::sync::Arc;

/// 惰性、按序列号升序、有限且可重新发起的事件流
pub type EventStream<'a> = BoxStream<'a, PersistResult<PersistedEvent>>;

const LAST_SEQUENCE_PAGE: usize = 512;

#[async_trait]
pub trait PersistenceEngine: Send + Sync {
    /// 追加一条已分配序列号的事件。
    ///
    /// 序列号必须恰好等于该键当前最大序列号加一，且与同键的并发追加原子地判定；
    /// 否则返回 `PersistError::SequenceConflict`，不得静默重排。
    async fn persist(&self, event: PersistedEvent) -> PersistResult<PersistedEvent>;

    /// 查询 `offset`（不含）之后、最多 `limit` 条、包含全部 `tags` 的事件，按序列号升序。
    fn events<'a>(
        &'a self,
        key: &'a str,
        offset: u64,
        limit: usize,
        tags: &'a [String],
    ) -> EventStream<'a>;

    /// 序列号最高的快照；不存在时返回 `None`
    async fn latest_snapshot(&self, key: &str) -> PersistResult<Option<PersistedSnapshot>>;

    /// 保存快照；序列号必须对应该键下已持久化的事件
    async fn take_snapshot(&self, snapshot: PersistedSnapshot) -> PersistResult<PersistedSnapshot>;

    /// 该键当前最大的事件序列号，没有事件时为 0。
    ///
    /// 默认实现从最新快照开始分页读取；后端可覆盖为直接查询。
    async fn last_sequence_number(&self, key: &str) -> PersistResult<u64> {
        let mut last = self
            .latest_snapshot(key)
            .await?
            .map_or(0, |snapshot| snapshot.sequence_number());

        loop {
            let page: Vec<PersistedEvent> = self
                .events(key, last, LAST_SEQUENCE_PAGE, &[])
                .try_collect()
                .await?;

            let Some(tail) = page.last() else {
                return Ok(last);
            };
            last = tail.sequence_number();

            if page.len() < LAST_SEQUENCE_PAGE {
                return Ok(last);
            }
        }
    }
}

#[async_trait]
impl<T> PersistenceEngine for Arc<T>
where
    T: PersistenceEngine + ?Sized,
{
    async fn persist(&self, event: PersistedEvent) -> PersistResult<PersistedEvent> {
        (**self).persist(event).await
    }

    fn events<'a>(
        &'a self,
        key: &'a str,
        offset: u64,
        limit: usize,
        tags: &'a [String],
    ) -> EventStream<'a> {
        (**self).events(key, offset, limit, tags)
    }

    async fn latest_snapshot(&self, key: &str) -> PersistResult<Option<PersistedSnapshot>> {
        (**self).latest_snapshot(key).await
    }

    async fn take_snapshot(&self, snapshot: PersistedSnapshot) -> PersistResult<PersistedSnapshot> {
        (**self).take_snapshot(snapshot).await
    }

    async fn last_sequence_number(&self, key: &str) -> PersistResult<u64> {
        (**self).last_sequence_number(key).await
    }
}

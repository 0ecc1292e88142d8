//! `BatchEffects` 的进程内参考实现。
//!
//! 这套实现用于示例程序和集成测试：它在当前进程内模拟
//! "创建或通知批次处理器" 与 "按标识路由状态跟踪器通知" 两类效果，
//! 并暴露可观察的副作用（有效处理器数量、各批次成员）供验证。
//! 它不是编排运行时本身——真实部署中这些效果应由外部运行时承担。

use super::{batch_processor_task_id, url_state_task_id, BatchEffects};
use crate::error::EffectError;
use crate::types::{BatchAssignment, BatchId, Url};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// 跟踪器目录：从确定性派生的跟踪器标识到其接收通道的路由表。
///
/// 这是规格中"弱引用"关系的落地形式：按身份查找，不是所有权边。
/// 目录持有的只是发送端；跟踪器任务持有接收端，随时可以消失，
/// 此时路由会以 `NotifyFailed` 失败（对协调器非致命）。
#[derive(Debug, Default)]
pub struct TrackerDirectory {
    entries: Mutex<HashMap<String, mpsc::Sender<BatchAssignment>>>,
}

impl TrackerDirectory {
    /// 创建一个空目录。
    pub fn new() -> Self {
        TrackerDirectory {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 为某个 URL 注册状态跟踪器，返回其接收通道。
    /// 重复注册同一个 URL 会替换旧的路由条目。
    pub fn register(&self, url: &str) -> mpsc::Receiver<BatchAssignment> {
        let (tx, rx) = mpsc::channel(16);
        let task_id = url_state_task_id(url);
        debug!("(TrackerDirectory) 注册状态跟踪器: {}", task_id);
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(task_id, tx);
        rx
    }

    /// 按派生标识把分配结果路由给对应的跟踪器。
    pub async fn route(&self, assignment: &BatchAssignment) -> Result<(), EffectError> {
        let task_id = url_state_task_id(&assignment.url);

        // 先在锁内克隆发送端，再在锁外 await，避免持锁跨越挂起点
        let sender = {
            let entries = self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.get(&task_id).cloned()
        };

        match sender {
            None => Err(EffectError::TrackerNotFound { task_id }),
            Some(tx) => tx
                .send(assignment.clone())
                .await
                .map_err(|e| EffectError::NotifyFailed {
                    task_id,
                    reason: e.to_string(),
                }),
        }
    }
}

/// `BatchEffects` 的进程内实现。
///
/// `ensure_batch_processor` 以 "create-if-absent-else-signal" 语义维护
/// 每个批次的处理器条目：首次调用创建（计入有效创建次数），
/// 后续调用只追加信号。这让测试可以直接断言幂等性。
#[derive(Debug, Default)]
pub struct InProcessEffects {
    directory: TrackerDirectory,
    /// 每个批次处理器已收到的 URL 信号（首次创建时建立条目）。
    batches: Mutex<HashMap<BatchId, Vec<Url>>>,
    /// 有效的处理器创建次数（幂等性验证用：重复 ensure 不递增）。
    effective_spawns: AtomicU32,
}

impl InProcessEffects {
    /// 创建一个新的进程内效果实现。
    pub fn new() -> Self {
        InProcessEffects::default()
    }

    /// 跟踪器目录，供调用方注册状态跟踪器。
    pub fn directory(&self) -> &TrackerDirectory {
        &self.directory
    }

    /// 有效的处理器创建次数（对同一批次的重复 ensure 只计一次）。
    pub fn effective_processor_count(&self) -> u32 {
        self.effective_spawns.load(Ordering::SeqCst)
    }

    /// 各批次处理器收到的 URL 信号快照。
    pub fn batch_members(&self) -> HashMap<BatchId, Vec<Url>> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl BatchEffects for InProcessEffects {
    async fn ensure_batch_processor(&self, batch_id: BatchId, url: &str) -> Result<(), EffectError> {
        let mut batches = self
            .batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match batches.entry(batch_id) {
            Entry::Vacant(vacant) => {
                self.effective_spawns.fetch_add(1, Ordering::SeqCst);
                info!(
                    "(InProcessEffects) 创建批次处理器: {}",
                    batch_processor_task_id(batch_id)
                );
                vacant.insert(vec![url.to_string()]);
            }
            Entry::Occupied(mut occupied) => {
                debug!(
                    "(InProcessEffects) 批次处理器 {} 已存在，追加信号: {}",
                    batch_processor_task_id(batch_id),
                    url
                );
                occupied.get_mut().push(url.to_string());
            }
        }
        Ok(())
    }

    async fn notify_assigned(&self, assignment: &BatchAssignment) -> Result<(), EffectError> {
        self.directory.route(assignment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试 ensure 的幂等性：同一批次重复调用只创建一个有效处理器。
    #[tokio::test]
    async fn test_ensure_batch_processor_is_idempotent() {
        let effects = InProcessEffects::new();

        effects.ensure_batch_processor(1, "https://a").await.unwrap();
        effects.ensure_batch_processor(1, "https://b").await.unwrap();
        effects.ensure_batch_processor(1, "https://a").await.unwrap();

        assert_eq!(effects.effective_processor_count(), 1);
        let members = effects.batch_members();
        assert_eq!(members.get(&1).map(|urls| urls.len()), Some(3));
    }

    /// 测试不同批次各自创建一个处理器。
    #[tokio::test]
    async fn test_ensure_creates_one_processor_per_batch() {
        let effects = InProcessEffects::new();

        effects.ensure_batch_processor(0, "https://a").await.unwrap();
        effects.ensure_batch_processor(1, "https://b").await.unwrap();
        effects.ensure_batch_processor(2, "https://c").await.unwrap();

        assert_eq!(effects.effective_processor_count(), 3);
    }

    /// 测试目录路由：已注册的跟踪器能收到分配通知。
    #[tokio::test]
    async fn test_route_to_registered_tracker() {
        let effects = InProcessEffects::new();
        let mut tracker_rx = effects.directory().register("https://a");

        let assignment = BatchAssignment {
            url: "https://a".to_string(),
            batch_id: 5,
        };
        effects.notify_assigned(&assignment).await.unwrap();

        let received = tracker_rx.recv().await.expect("跟踪器应收到通知");
        assert_eq!(received, assignment);
    }

    /// 测试未注册跟踪器时路由返回 `TrackerNotFound`。
    #[tokio::test]
    async fn test_route_unregistered_tracker_fails() {
        let effects = InProcessEffects::new();
        let assignment = BatchAssignment {
            url: "https://missing".to_string(),
            batch_id: 0,
        };

        match effects.notify_assigned(&assignment).await {
            Err(EffectError::TrackerNotFound { task_id }) => {
                assert_eq!(task_id, url_state_task_id("https://missing"));
            }
            other => panic!("期望 TrackerNotFound, 得到 {:?}", other),
        }
    }

    /// 测试跟踪器接收端被丢弃后路由以 `NotifyFailed` 失败。
    #[tokio::test]
    async fn test_route_dropped_tracker_fails() {
        let effects = InProcessEffects::new();
        let tracker_rx = effects.directory().register("https://a");
        drop(tracker_rx); // 跟踪器消失

        let assignment = BatchAssignment {
            url: "https://a".to_string(),
            batch_id: 0,
        };
        match effects.notify_assigned(&assignment).await {
            Err(EffectError::NotifyFailed { .. }) => {}
            other => panic!("期望 NotifyFailed, 得到 {:?}", other),
        }
    }
}

//! 定义协调器对外部世界的效果接口。
//!
//! 协调器自身不直接了解下游的批次处理器或 URL 状态跟踪器，
//! 它只通过 `BatchEffects` trait 触发两类出站效果：
//! - `ensure_batch_processor`: 幂等地"创建或通知"某个批次的处理器
//!   （对同一个批次 ID 重复调用必须安全，下游不可见重复副作用）；
//! - `notify_assigned`: 一次性地通知某个 URL 的状态跟踪器它被分配到的批次
//!   （失败对协调器非致命）。
//!
//! 两类效果的目标都通过确定性派生的标识寻址，而不是直接指针：
//! 见 [`batch_processor_task_id`] 和 [`url_state_task_id`]。

mod in_process;

pub use in_process::{InProcessEffects, TrackerDirectory};

use crate::error::EffectError;
use crate::types::{BatchAssignment, BatchId};
use async_trait::async_trait;

/// 由批次 ID 确定性派生出批次处理器的标识。
///
/// 同一个批次 ID 总是得到同一个标识，这是 `ensure_batch_processor`
/// 幂等性的寻址基础。
pub fn batch_processor_task_id(batch_id: BatchId) -> String {
    format!("batch-processor-{}", batch_id)
}

/// 由 URL 确定性派生出其状态跟踪器的标识。
///
/// 这是一种按身份查找的弱引用关系：协调器不持有跟踪器的所有权，
/// 只通过目录按标识路由通知。
pub fn url_state_task_id(url: &str) -> String {
    format!("scraped-url-state-{}", url)
}

/// 协调器的出站效果接口。
///
/// 实现方负责真正的投递语义；协调器只约定：
/// - `ensure_batch_processor` 失败会进入协调器的重试循环，重试耗尽对该条目致命；
/// - `notify_assigned` 失败会被记录日志后吞掉，分配结果不回滚。
#[async_trait]
pub trait BatchEffects: Send + Sync + 'static {
    /// 幂等地创建或通知批次处理器：为 `(batch_id, url)` 确保一个
    /// 由 [`batch_processor_task_id`] 寻址的处理器存在，并把该 URL 交给它。
    async fn ensure_batch_processor(&self, batch_id: BatchId, url: &str) -> Result<(), EffectError>;

    /// 一次性通知 URL 的状态跟踪器其分配结果，
    /// 目标由 [`url_state_task_id`] 寻址。
    async fn notify_assigned(&self, assignment: &BatchAssignment) -> Result<(), EffectError>;
}

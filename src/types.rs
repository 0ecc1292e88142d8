//! 定义库的核心数据结构和类型别名。
//!
//! 这个模块包含了在 `Coordinator`、`AssignerHandle` 和外部效果实现之间传递信息
//! 以及维护内部状态所需的基础类型定义。

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
// 引入 Tokio 的 `oneshot` 通道，用于实现异步请求-响应模式
use tokio::sync::oneshot;

// --- 基本类型别名 (Basic Type Aliases) ---

/// 批次的唯一标识符。
/// 一个单调递增的 `u64` 值，由 `BatchCycleState` 在批次滚动时分配。
/// 注意：批次 ID 跨实例重启的连续性依赖 `CoordinatorSeed` 显式传递，
/// 而不是隐式地全局唯一。
pub type BatchId = u64;

/// 待分配的工作条目标识（待抓取的 URL）。
pub type Url = String;

/// 某个批次中可回填空位的数量。
/// 空位注册表保证不存在计数 <= 0 的条目。
pub type GapCount = u32;

// --- 通道和回调类型 (Channel and Callback Types) ---

/// 用于 `QueryGaps` 请求的回复通道发送端。
///
/// 协调器收到查询后，会通过这个通道发送空位注册表的只读快照。
/// 查询永不阻塞主循环，也不改变任何状态。
pub type GapSnapshotReplyTx = oneshot::Sender<BTreeMap<BatchId, GapCount>>;

/// 用于 `QueryStatus` 请求的回复通道发送端。
pub type StatusReplyTx = oneshot::Sender<CoordinatorStatus>;

/// 用于 `Shutdown` 请求的回复通道发送端。
/// 协调器在处理完正在进行的条目并排干队列后，回复最终的 `CoordinatorSeed`。
pub type ShutdownReplyTx = oneshot::Sender<CoordinatorSeed>;

// --- 数据结构 (Data Structures) ---

/// 一次批次分配的结果：某个 URL 被分配到了哪个批次。
///
/// 这个结构体有两个用途：
/// 1. 作为 `BatchEffects::notify_assigned` 的载荷，通知该 URL 的状态跟踪器；
/// 2. 在进程内实现 (`TrackerDirectory`) 中，作为路由给跟踪器的消息本体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAssignment {
    /// 被分配的 URL。
    pub url: Url,
    /// 分配到的批次 ID。
    pub batch_id: BatchId,
}

/// 跨实例重启时显式传递的协调器种子状态。
///
/// 这是重启边界上 **唯一** 传递的状态：继任实例以空的待处理队列
/// 和（默认）空的空位注册表开始。参见 `CoordinatorConfig::carry_gaps_across_restart`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorSeed {
    /// 当前批次 ID。首次启动时为 0，即第一个新分配落在 0 号批次。
    pub current_batch_id: BatchId,
    /// 当前批次已填入的 URL 数量，取值范围 [0, max_batch_size]。
    pub urls_in_current_batch: u32,
}

/// 协调器运行状态的只读快照，由 `QueryStatus` 返回。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    /// 当前实例的代数（从 1 开始，每次保状态重启递增）。
    pub generation: u32,
    /// 当前批次 ID。
    pub current_batch_id: BatchId,
    /// 当前批次已填入的 URL 数量。
    pub urls_in_current_batch: u32,
    /// 待处理队列中尚未分配的条目数。
    pub pending: usize,
}

// --- 请求枚举 (Requests for Handle -> Coordinator Communication) ---

/// 枚举类型，代表所有可能通过 `AssignerHandle` 发送给协调器的消息。
///
/// 协调器的主事件循环接收 `Request` 类型的消息，并根据具体的变体分发处理。
/// 信号类变体 (`AssignToBatch`、`NewGap`) 是 fire-and-forget 的；
/// 查询类变体携带 `oneshot` 回复通道。
#[derive(Debug)]
pub enum Request {
    /// 请求为某个 URL 分配批次 ID。协调器将其追加到待处理队列尾部（FIFO）。
    AssignToBatch {
        /// 待分配的 URL。
        url: Url,
    },
    /// 上报某个批次出现了一个可回填的空位。
    NewGap {
        /// 出现空位的批次 ID。
        batch_id: BatchId,
    },
    /// 查询空位注册表的只读快照。
    QueryGaps {
        /// 用于接收快照的回复通道。
        reply_tx: GapSnapshotReplyTx,
    },
    /// 查询协调器运行状态（代数、批次计数器、队列长度）。
    QueryStatus {
        /// 用于接收状态的回复通道。
        reply_tx: StatusReplyTx,
    },
    /// 请求协调器优雅关停：处理完队列中剩余条目后回复最终种子状态并退出。
    Shutdown {
        /// 用于接收最终 `CoordinatorSeed` 的回复通道。
        reply_tx: ShutdownReplyTx,
    },
}

// --- 抓取执行器相关类型 (Fetch Executor Types) ---

/// 一次抓取调用的输入：一组 URL 和它们所属的批次。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// 本次逻辑请求的完整 URL 集合。
    pub urls: Vec<Url>,
    /// 这些 URL 所属的批次 ID（用于日志和错误归属）。
    pub batch_id: BatchId,
}

/// 抓取执行器的检查点载荷。
///
/// 当上一次调用部分失败时，失败的 URL 子集会被记录到检查点中；
/// 携带检查点的重试调用只会重新处理该子集，而不是完整输入集。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchCheckpoint {
    /// 上一次调用中失败的 URL 子集。`None` 表示没有先前的失败记录。
    pub failed_urls_in_last_run: Option<Vec<Url>>,
}

impl FetchCheckpoint {
    /// 基于一次失败的尝试构建缩小范围后的检查点。
    pub fn narrowed(failed_urls: Vec<Url>) -> Self {
        FetchCheckpoint {
            failed_urls_in_last_run: Some(failed_urls),
        }
    }

    /// 计算本次调用的有效工作集：有检查点则用检查点，否则用完整输入集。
    pub fn effective<'a>(&'a self, full: &'a [Url]) -> &'a [Url] {
        match &self.failed_urls_in_last_run {
            Some(failed) => failed,
            None => full,
        }
    }
}

/// 抓取执行器的可选配置。
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// 并发上限。`None` 表示不限制（与最初观察到的行为一致）；
    /// `Some(n)` 时通过信号量将同时进行的抓取限制为 n 个。
    pub max_concurrency: Option<NonZeroUsize>,
}

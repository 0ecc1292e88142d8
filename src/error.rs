//! 定义库中使用的错误类型。
//!
//! 本模块包含几种主要的错误枚举：
//! - `CoordinatorError`: 协调器内部处理时可能发生的业务逻辑错误
//!   （单例租约冲突、外部效果重试耗尽等）。
//! - `AssignerError`: 暴露给库用户的顶层错误类型。
//!   它封装了与协调器通信时可能发生的错误（通道发送/接收失败）
//!   以及协调器报告的 `CoordinatorError`。
//! - `EffectError`: 外部效果 (`BatchEffects`) 调用失败时返回的错误。
//! - `FetchAttemptError` / `FetchError`: 抓取执行器的单条目错误与聚合错误。
//!   单条目错误（如限流）是预期内的、可重试的，从不单独向调用方抛出；
//!   聚合错误只在失败子集非空时产生，提示调用方携带检查点重试。

use crate::types::{BatchId, Request, Url};
use thiserror::Error;
// 使用 `thiserror` 宏为枚举变体实现 `std::error::Error` trait 和 `Display` trait。
use tokio::sync::{mpsc, oneshot};
// 引入 Tokio 通道的错误类型，用于表示发送或接收失败

/// 协调器内部处理逻辑中可能产生的具体错误。
///
/// 这些错误代表协调器自身生命周期或分配流程中的失败场景，
/// 区别于与协调器通信层面的错误（那些由 `AssignerError` 承担）。
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// 表示指定名称的单例租约已被占用。
    /// 分配决策必须串行化在唯一的权威实例上，
    /// 因此同一名称同一时间只允许存在一个活跃的协调器。
    #[error("单例租约 {0} 已被占用，同一时间只允许一个活跃的协调器实例")]
    SingletonAlreadyClaimed(String),

    /// 表示 `ensure_batch_processor` 效果在配置的重试策略耗尽后仍然失败。
    /// 这对该条目的分配是致命的：分配被放弃，协调器继续处理下一个条目。
    #[error("批次 {batch_id} 的 ensure_batch_processor 在 {attempts} 次尝试后仍失败: {source}")]
    EnsureRetriesExhausted {
        /// 目标批次 ID。
        batch_id: BatchId,
        /// 已经尝试的次数。
        attempts: u32,
        /// 最后一次尝试返回的效果错误。
        #[source]
        source: EffectError,
    },
}

/// 用户与 `AssignerHandle` 交互时可能遇到的顶层错误类型。
///
/// 这个枚举为库的使用者提供一个统一的错误处理接口，
/// 将通信错误和协调器的业务逻辑错误整合在一起。
#[derive(Error, Debug)]
pub enum AssignerError {
    /// 表示向协调器发送请求 (`Request`) 时失败。
    ///
    /// 这通常发生在协调器的后台任务已经终止（panic 或正常退出）的情况下，
    /// 导致连接 `AssignerHandle` 和协调器的 MPSC 请求通道被关闭。
    #[error("向协调器发送请求失败 (协调器可能已停止): {0}")]
    SendRequestError(#[from] mpsc::error::SendError<Request>),

    /// 表示等待并接收来自协调器的回复时失败。
    ///
    /// 每个查询类请求都包含一个 `oneshot` 回复通道。如果在协调器发送回复之前
    /// 它就终止了，这个回复通道会被关闭，导致接收端出错。
    #[error("从协调器接收回复失败 (协调器可能已停止): {0}")]
    ReceiveReplyError(#[from] oneshot::error::RecvError),

    /// 表示协调器报告了业务逻辑错误（例如单例租约冲突）。
    #[error("协调器报告错误: {0}")]
    Coordinator(#[from] CoordinatorError),
}

/// 外部效果 (`BatchEffects`) 调用失败时返回的错误。
///
/// `ensure_batch_processor` 的失败会进入协调器的重试循环并最终可能传播；
/// `notify_assigned` 的失败被协调器记录日志后吞掉（接受的最终一致性缺口）。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    /// 创建或通知批次处理器失败。
    #[error("批次处理器 {task_id} 创建或通知失败: {reason}")]
    EnsureFailed {
        /// 由批次 ID 确定性派生出的处理器标识。
        task_id: String,
        /// 失败原因描述。
        reason: String,
    },

    /// 目标 URL 的状态跟踪器未在目录中注册。
    #[error("状态跟踪器 {task_id} 未注册")]
    TrackerNotFound {
        /// 由 URL 确定性派生出的跟踪器标识。
        task_id: String,
    },

    /// 向状态跟踪器投递分配结果失败（例如跟踪器已停止接收）。
    #[error("向状态跟踪器 {task_id} 投递分配结果失败: {reason}")]
    NotifyFailed {
        /// 由 URL 确定性派生出的跟踪器标识。
        task_id: String,
        /// 失败原因描述。
        reason: String,
    },
}

/// 抓取执行器中 **单个 URL** 尝试的失败。
///
/// 限流 (`RateLimited`) 是预期内的瞬态失败，不是缺陷；
/// 这类错误从不单独向调用方抛出，只会把对应 URL 归入失败子集。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchAttemptError {
    /// 抓取被限流，属于可重试的瞬态失败。
    #[error("抓取被限流 (可重试): {url}")]
    RateLimited {
        /// 被限流的 URL。
        url: Url,
    },

    /// 其他抓取失败。
    #[error("抓取失败: {url}: {reason}")]
    Other {
        /// 失败的 URL。
        url: Url,
        /// 失败原因描述。
        reason: String,
    },
}

impl FetchAttemptError {
    /// 判断该失败是否为瞬态（可通过重试恢复）。
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchAttemptError::RateLimited { .. })
    }

    /// 返回该失败关联的 URL。
    pub fn url(&self) -> &str {
        match self {
            FetchAttemptError::RateLimited { url } => url,
            FetchAttemptError::Other { url, .. } => url,
        }
    }
}

/// 抓取执行器整次调用的失败。
#[derive(Error, Debug)]
pub enum FetchError {
    /// 所有尝试结算后失败子集非空。失败的 URL 已通过心跳检查点记录，
    /// 调用方的重试策略应携带该检查点重新调用执行器。
    #[error("批次 {batch_id} 的抓取未全部成功，存在失败的 URL")]
    AttemptsFailed {
        /// 所属批次 ID。
        batch_id: BatchId,
        /// 本次调用中失败的 URL 子集。
        failed_urls: Vec<Url>,
    },

    /// 某个抓取子任务无法汇合（被取消或 panic）。
    #[error("抓取子任务执行失败: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

//! 定义 `AssignerHandle`，这是用户与协调器交互的主要接口。
//!
//! `AssignerHandle` 封装了与协调器后台任务进行异步通信的细节，
//! 提供方法来发送分配请求 (`assign_to_batch`)、上报空位 (`report_gap`)、
//! 查询状态 (`batch_id_gaps`、`status`) 以及触发优雅关停 (`shutdown`)。
//!
//! 这个句柄是 `Clone` 的，允许多个任务或线程共享对同一个协调器的访问。
//! 由于请求通道属于"运行时"而非某一代实例，句柄在协调器保状态重启后
//! 依然有效，信号会继续流向继任实例。

use crate::error::AssignerError;
use crate::types::{BatchId, CoordinatorSeed, CoordinatorStatus, GapCount, Request, Url};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace};

/// 与协调器交互的句柄。
///
/// 这个结构体提供一个异步接口，用于向关联的协调器发送请求。
/// 它是 `Clone` 的，克隆成本很低（只复制内部的 MPSC 发送端），
/// 因此可以方便地在多个任务之间共享。
#[derive(Clone, Debug)]
pub struct AssignerHandle {
    /// 用于向协调器发送 `Request` 枚举的 MPSC 通道发送端。
    request_tx: mpsc::Sender<Request>,
}

impl AssignerHandle {
    /// 创建一个新的 `AssignerHandle` 实例。
    ///
    /// 这个方法是 `pub(crate)` 的，只在 `Coordinator::spawn` 中创建初始句柄时使用。
    pub(crate) fn new(request_tx: mpsc::Sender<Request>) -> Self {
        Self { request_tx }
    }

    /// 请求为某个 URL 分配批次 ID（fire-and-forget 信号）。
    ///
    /// 协调器会把 URL 追加到待处理队列尾部，按 FIFO 顺序处理。
    /// 本方法只确认请求已投递，不等待分配完成；分配结果通过
    /// `BatchEffects::notify_assigned` 通知该 URL 的状态跟踪器。
    pub async fn assign_to_batch(&self, url: impl Into<Url>) -> Result<(), AssignerError> {
        let url = url.into();
        trace!("(Handle) 发送分配请求: {}", url);

        self.request_tx
            .send(Request::AssignToBatch { url })
            .await
            .map_err(|e| {
                error!("(Handle) 发送 AssignToBatch 请求失败: {}", e);
                AssignerError::SendRequestError(e)
            })
    }

    /// 上报某个批次出现了一个可回填的空位（fire-and-forget 信号）。
    pub async fn report_gap(&self, batch_id: BatchId) -> Result<(), AssignerError> {
        trace!("(Handle) 上报空位: 批次 {}", batch_id);

        self.request_tx
            .send(Request::NewGap { batch_id })
            .await
            .map_err(|e| {
                error!("(Handle) 发送 NewGap 请求失败: {}", e);
                AssignerError::SendRequestError(e)
            })
    }

    /// 查询空位注册表的只读快照。
    ///
    /// 查询由协调器的消息处理器直接回答，不阻塞主循环、不改变任何状态。
    pub async fn batch_id_gaps(&self) -> Result<BTreeMap<BatchId, GapCount>, AssignerError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.request_tx
            .send(Request::QueryGaps { reply_tx })
            .await
            .map_err(|e| {
                error!("(Handle) 发送 QueryGaps 请求失败: {}", e);
                AssignerError::SendRequestError(e)
            })?;

        match reply_rx.await {
            Ok(snapshot) => {
                debug!("(Handle) 收到空位快照: {} 个批次存在空位", snapshot.len());
                Ok(snapshot)
            }
            Err(recv_error) => {
                error!("(Handle) 接收 QueryGaps 回复失败: {}", recv_error);
                Err(AssignerError::ReceiveReplyError(recv_error))
            }
        }
    }

    /// 查询协调器运行状态（代数、批次计数器、队列长度）。
    pub async fn status(&self) -> Result<CoordinatorStatus, AssignerError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.request_tx
            .send(Request::QueryStatus { reply_tx })
            .await
            .map_err(|e| {
                error!("(Handle) 发送 QueryStatus 请求失败: {}", e);
                AssignerError::SendRequestError(e)
            })?;

        match reply_rx.await {
            Ok(status) => {
                trace!("(Handle) 收到状态: {:?}", status);
                Ok(status)
            }
            Err(recv_error) => {
                error!("(Handle) 接收 QueryStatus 回复失败: {}", recv_error);
                Err(AssignerError::ReceiveReplyError(recv_error))
            }
        }
    }

    /// 请求协调器优雅关停。
    ///
    /// 协调器会先处理完正在进行的条目并排干待处理队列，
    /// 然后回复最终的 `CoordinatorSeed`（可用于下次启动时恢复滚动状态）。
    ///
    /// **注意：** 调用 `shutdown` 会消耗这个 `AssignerHandle` 实例。
    /// 如果还需要保留句柄（例如用于其他任务），可以先 `clone()` 一个副本。
    pub async fn shutdown(self) -> Result<CoordinatorSeed, AssignerError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        if let Err(e) = self.request_tx.send(Request::Shutdown { reply_tx }).await {
            error!("(Handle) 发送 Shutdown 请求失败: {}", e);
            return Err(AssignerError::SendRequestError(e));
        }
        info!("(Handle) Shutdown 请求已发送，等待协调器排干队列...");

        match reply_rx.await {
            Ok(seed) => {
                info!("(Handle) 协调器已关停，最终种子状态: {:?}", seed);
                Ok(seed)
            }
            Err(recv_error) => {
                error!("(Handle) 接收 Shutdown 回复失败: {}", recv_error);
                Err(AssignerError::ReceiveReplyError(recv_error))
            }
        }
    }
}

//! 单代实例的请求分发与分配处理逻辑。
//!
//! 这里实现 `Generation` 的消息处理器：信号类请求（分配、空位）只改内存状态，
//! 查询类请求直接回复快照；真正触发外部效果的分配流程在 `assign_url` 中，
//! 由主循环在 DRAINING 状态下逐条驱动。

use super::{Control, Generation};
use crate::effects::BatchEffects;
use crate::error::{CoordinatorError, EffectError};
use crate::types::{BatchAssignment, BatchId, CoordinatorStatus, Request, Url};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

impl<E: BatchEffects> Generation<E> {
    /// 分发单条请求。
    ///
    /// 信号类变体入队或登记后立即返回；查询类变体同步回复，
    /// 既不阻塞主循环也不改变分配状态。
    pub(super) fn handle_request(&mut self, request: Request) {
        match request {
            Request::AssignToBatch { url } => {
                debug!("(Coordinator) 收到分配请求，入队: {}", url);
                self.pending.push_back(url);
            }
            Request::NewGap { batch_id } => {
                self.gaps.register_gap(batch_id);
            }
            Request::QueryGaps { reply_tx } => {
                if reply_tx.send(self.gaps.snapshot()).is_err() {
                    warn!("(Coordinator) 回复 QueryGaps 失败 (调用方已放弃等待)");
                }
            }
            Request::QueryStatus { reply_tx } => {
                let status = CoordinatorStatus {
                    generation: self.generation,
                    current_batch_id: self.state.current_batch_id(),
                    urls_in_current_batch: self.state.urls_in_current_batch(),
                    pending: self.pending.len(),
                };
                if reply_tx.send(status).is_err() {
                    warn!("(Coordinator) 回复 QueryStatus 失败 (调用方已放弃等待)");
                }
            }
            Request::Shutdown { reply_tx } => {
                match self.control {
                    None => {
                        info!(
                            "(Coordinator) 收到关停请求，待排干 {} 个队列条目后退出",
                            self.pending.len()
                        );
                        self.control = Some(Control::Shutdown(reply_tx));
                    }
                    Some(_) => {
                        // 已有挂起的控制流转换，重复的关停请求直接回复当前种子
                        warn!("(Coordinator) 收到重复的关停请求，回复当前种子状态");
                        let _ = reply_tx.send(self.state.seed());
                    }
                }
            }
        }
    }

    /// 非阻塞地吸收通道中已到达的全部消息。
    ///
    /// DRAINING 状态下每处理一个条目前调用一次，保证乱序到达的空位信号
    /// 在后续分配中可见，查询也不会被长积压饿死。
    pub(super) fn absorb_queued_requests(&mut self, rx: &mut mpsc::Receiver<Request>) {
        loop {
            match rx.try_recv() {
                Ok(request) => self.handle_request(request),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.control.is_none() {
                        self.control = Some(Control::ChannelClosed);
                    }
                    break;
                }
            }
        }
    }

    /// 处理一个待分配条目：选批次、确保处理器存在、通知状态跟踪器。
    ///
    /// `ensure_batch_processor` 按重试策略重试，耗尽对该条目致命（记录后丢弃）；
    /// `notify_assigned` 失败只记录日志，分配结果不回滚。
    pub(super) async fn assign_url(&mut self, url: Url) {
        let batch_id = self.state.next_batch_id_for(&mut self.gaps);
        info!("(Coordinator) 分配 {} -> 批次 {}", url, batch_id);

        if let Err(fatal) = self.ensure_with_retry(batch_id, &url).await {
            error!("(Coordinator) 分配 {} 失败，丢弃该条目: {}", url, fatal);
            return;
        }

        let assignment = BatchAssignment { url, batch_id };
        if let Err(e) = self.effects.notify_assigned(&assignment).await {
            // TODO: 被丢弃的通知意味着跟踪器视角的批次成员数偏少，
            // 可以考虑在这里自动登记一个空位作为补偿
            warn!(
                "(Coordinator) 通知状态跟踪器失败 (分配保持有效): {}",
                e
            );
        }
    }

    /// 带指数退避的 `ensure_batch_processor` 重试循环。
    async fn ensure_with_retry(
        &self,
        batch_id: BatchId,
        url: &str,
    ) -> Result<(), CoordinatorError> {
        let policy = &self.config.ensure_retry;
        let mut backoff = policy.initial_backoff;
        let mut last_error: Option<EffectError> = None;

        for attempt in 1..=policy.max_attempts.max(1) {
            match self.effects.ensure_batch_processor(batch_id, url).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "(Coordinator) ensure_batch_processor 失败 (批次 {}, 第 {}/{} 次): {}",
                        batch_id, attempt, policy.max_attempts, e
                    );
                    last_error = Some(e);
                    if attempt < policy.max_attempts {
                        sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        Err(CoordinatorError::EnsureRetriesExhausted {
            batch_id,
            attempts: policy.max_attempts,
            source: last_error.unwrap_or(EffectError::EnsureFailed {
                task_id: crate::effects::batch_processor_task_id(batch_id),
                reason: "未执行任何尝试".to_string(),
            }),
        })
    }
}

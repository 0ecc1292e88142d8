//! 部分失败抓取执行器。
//!
//! 对一组 URL 做并发抓取，把 **部分失败** 当作头等结果对待：
//! 单个 URL 的失败（典型的是限流）从不中断整次调用，
//! 只会把该 URL 归入失败子集。全部尝试结算后，
//! 失败子集通过心跳检查点记录下来；整次调用仅在失败子集非空时报错，
//! 提示调用方携带检查点重试。
//!
//! 携带检查点的重试调用只处理上次失败的子集，而不是完整输入集，
//! 已成功的 URL 不会被重复抓取。检查点只会缩小范围，不会增大：
//! 本次失败的 URL 必然是本次有效工作集（上次失败集）的子集。
//!
//! 执行器自身不做重试：重试由调用方（或其运行时）驱动，
//! 执行器只负责单次调用的结算和检查点记录。

use crate::error::{FetchAttemptError, FetchError};
use crate::types::{FetchCheckpoint, FetchOptions, FetchRequest, Url};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// 单个 URL 的抓取接口。
///
/// 实现方负责真正的网络交互；执行器只约定：
/// 失败通过 `FetchAttemptError` 返回（限流用 `RateLimited` 标记为瞬态），
/// 不要在实现内部自行重试。
#[async_trait]
pub trait UrlFetcher: Send + Sync + 'static {
    /// 抓取一个 URL。
    async fn fetch(&self, url: &str) -> Result<(), FetchAttemptError>;
}

/// 执行器的活性与检查点上报接口。
///
/// 真实部署中对应编排运行时的心跳通道：`beat` 表明执行器仍在推进，
/// `checkpoint` 持久化失败子集，供重试调用恢复。
#[async_trait]
pub trait Heartbeat: Send + Sync + 'static {
    /// 上报一次活性信号（每完成一个 URL 的尝试调用一次）。
    async fn beat(&self);

    /// 记录本次调用结算出的失败子集。
    async fn checkpoint(&self, failed_urls: &[Url]);
}

/// 丢弃所有信号的心跳实现，用于不需要活性上报的调用方。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHeartbeat;

#[async_trait]
impl Heartbeat for NoopHeartbeat {
    async fn beat(&self) {}

    async fn checkpoint(&self, _failed_urls: &[Url]) {}
}

/// 执行一次抓取调用。
///
/// 1. 用检查点计算有效工作集（有检查点则为上次失败子集，否则为完整输入集）；
/// 2. 为每个 URL 派生一个并发抓取任务（可选地受 `max_concurrency` 信号量约束）；
/// 3. 等待 **所有** 任务结算，失败的 URL 汇入失败子集；
/// 4. 把失败子集写入心跳检查点；
/// 5. 失败子集非空时返回 `FetchError::AttemptsFailed`，否则返回 `Ok(())`。
pub async fn run_fetch_attempt<F, H>(
    request: &FetchRequest,
    checkpoint: Option<&FetchCheckpoint>,
    fetcher: Arc<F>,
    heartbeat: Arc<H>,
    options: &FetchOptions,
) -> Result<(), FetchError>
where
    F: UrlFetcher,
    H: Heartbeat,
{
    let default_checkpoint = FetchCheckpoint::default();
    let effective = checkpoint
        .unwrap_or(&default_checkpoint)
        .effective(&request.urls);

    if effective.len() < request.urls.len() {
        info!(
            "(Fetch) 批次 {} 携带检查点恢复: 本次只处理 {}/{} 个 URL",
            request.batch_id,
            effective.len(),
            request.urls.len()
        );
    } else {
        info!(
            "(Fetch) 批次 {} 开始抓取 {} 个 URL",
            request.batch_id,
            effective.len()
        );
    }

    let semaphore = options
        .max_concurrency
        .map(|n| Arc::new(Semaphore::new(n.get())));
    let failed: Arc<Mutex<Vec<Url>>> = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::with_capacity(effective.len());
    for url in effective {
        let url = url.clone();
        let fetcher = Arc::clone(&fetcher);
        let heartbeat = Arc::clone(&heartbeat);
        let failed = Arc::clone(&failed);
        let semaphore = semaphore.clone();

        tasks.push(tokio::spawn(async move {
            // 并发上限通过信号量实现；acquire_owned 只在信号量被关闭时失败，
            // 这里信号量由本次调用独占，不会被关闭
            let _permit = match semaphore {
                Some(s) => s.acquire_owned().await.ok(),
                None => None,
            };

            match fetcher.fetch(&url).await {
                Ok(()) => {
                    debug!("(Fetch) 抓取成功: {}", url);
                }
                Err(e) => {
                    if e.is_transient() {
                        // 限流是预期内的瞬态失败，降级记录
                        debug!("(Fetch) 抓取失败 (瞬态, 将归入失败子集): {}", e);
                    } else {
                        warn!("(Fetch) 抓取失败: {}", e);
                    }
                    failed
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(url);
                }
            }
            heartbeat.beat().await;
        }));
    }

    // 等待所有任务结算后再统一判定，单个失败不会提前中断其余抓取
    for join_result in join_all(tasks).await {
        join_result?;
    }

    let mut failed_urls = Arc::try_unwrap(failed)
        .map(|m| m.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
        .unwrap_or_else(|arc| {
            arc.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone()
        });
    // 并发结算的完成顺序不确定，排序以获得稳定的检查点内容
    failed_urls.sort();

    heartbeat.checkpoint(&failed_urls).await;

    if failed_urls.is_empty() {
        info!("(Fetch) 批次 {} 抓取全部成功", request.batch_id);
        Ok(())
    } else {
        warn!(
            "(Fetch) 批次 {} 抓取部分失败: {}/{} 个 URL 失败，已记录检查点",
            request.batch_id,
            failed_urls.len(),
            effective.len()
        );
        Err(FetchError::AttemptsFailed {
            batch_id: request.batch_id,
            failed_urls,
        })
    }
}

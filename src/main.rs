//! 主程序入口和示例用法演示
//!
//! 这个示例展示了如何使用批次分配协调器：
//! 1. 启动 Coordinator Actor（迭代上限被调低以便演示保状态重启）。
//! 2. 为每个 URL 注册状态跟踪器并启动跟踪器消费任务。
//! 3. 通过 `AssignerHandle` 并发发送分配请求与空位信号：
//!    - 常规分配触发批次滚动。
//!    - 上报空位后观察最老批次被优先回填。
//!    - 查询空位快照与协调器状态。
//! 4. 驱动一轮 "部分失败 + 检查点重试" 的抓取流程。
//! 5. 调用 `handle.shutdown()` 优雅关停并获取最终种子状态。

use async_trait::async_trait;
use batch_assigner::{
    run_fetch_attempt, AssignerHandle, BatchAssignment, Coordinator, CoordinatorConfig,
    FetchAttemptError, FetchCheckpoint, FetchError, FetchOptions, FetchRequest, InProcessEffects,
    NoopHeartbeat, RetryPolicy, UrlFetcher,
};
use futures::future::join_all;
use std::{
    collections::HashSet,
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// 演示用抓取器：第一轮对指定 URL 返回限流，之后放行。
struct DemoFetcher {
    rate_limited_once: Mutex<HashSet<String>>,
}

#[async_trait]
impl UrlFetcher for DemoFetcher {
    async fn fetch(&self, url: &str) -> Result<(), FetchAttemptError> {
        let mut pending = self
            .rate_limited_once
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if pending.remove(url) {
            return Err(FetchAttemptError::RateLimited {
                url: url.to_string(),
            });
        }
        Ok(())
    }
}

#[tokio::main] // 使用 tokio 作为异步运行时
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // --- 初始化日志系统 ---
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG) // 设置日志级别
        .with_target(false) // 不显示模块路径
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("设置全局日志 subscriber 失败");

    info!("========================================================");
    info!("启动批次分配协调器示例");
    info!("演示特性：FIFO 分配、批次滚动、空位回填、保状态重启、检查点抓取重试");
    info!("========================================================");

    // --- 配置参数 ---
    // 迭代上限被调得很低，让保状态重启在演示中可见
    let config = CoordinatorConfig {
        max_batch_size: 3,
        max_iterations: 8,
        idle_recheck: Duration::from_millis(50),
        channel_buffer: NonZeroUsize::new(128).unwrap(),
        singleton_name: "assigner-demo".to_string(),
        ensure_retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
        },
        ..CoordinatorConfig::default()
    };
    info!(
        "配置: 批次上限={}, 迭代上限={}",
        config.max_batch_size, config.max_iterations
    );

    // --- 启动 Coordinator Actor ---
    info!("正在启动 Coordinator Actor...");
    let effects = Arc::new(InProcessEffects::new());
    let (handle, coordinator_task) = Coordinator::spawn(config, Arc::clone(&effects))?;
    info!("Coordinator Actor 已启动。");

    // --- 注册状态跟踪器并启动跟踪器消费任务 ---
    let urls: Vec<String> = (0..7).map(|i| format!("https://example.com/page/{}", i)).collect();
    let assignments = Arc::new(Mutex::new(Vec::<BatchAssignment>::new()));
    let mut tracker_tasks = Vec::new();
    for url in &urls {
        let mut tracker_rx = effects.directory().register(url);
        let assignments = Arc::clone(&assignments);
        let url = url.clone();
        tracker_tasks.push(tokio::spawn(async move {
            if let Some(assignment) = tracker_rx.recv().await {
                info!(
                    "(跟踪器) {} 被分配到批次 {}",
                    url, assignment.batch_id
                );
                assignments
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(assignment);
            }
        }));
    }

    // --- 发送分配请求与空位信号 ---
    for url in &urls[..5] {
        handle.assign_to_batch(url.clone()).await?;
    }
    // 0 号批次有一个条目被移除，上报空位；下一个分配应优先回填它
    handle.report_gap(0).await?;
    for url in &urls[5..] {
        handle.assign_to_batch(url.clone()).await?;
    }

    // 等待所有跟踪器收到分配通知
    join_all(tracker_tasks).await;

    let snapshot = handle.batch_id_gaps().await?;
    info!("空位快照 (回填后应为空): {:?}", snapshot);
    let status = handle.status().await?;
    info!(
        "协调器状态: 第 {} 代, 当前批次 {}, 已填 {}, 队列 {}",
        status.generation, status.current_batch_id, status.urls_in_current_batch, status.pending
    );

    // --- 演示保状态重启：继续发请求直到迭代上限触发换代 ---
    let restart_urls: Vec<String> = (0..6)
        .map(|i| format!("https://example.com/extra/{}", i))
        .collect();
    for url in &restart_urls {
        let mut tracker_rx = effects.directory().register(url);
        tokio::spawn(async move {
            let _ = tracker_rx.recv().await;
        });
        handle.assign_to_batch(url.clone()).await?;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = handle.status().await?;
    info!(
        "重启后的协调器状态: 第 {} 代, 当前批次 {} (批次计数器跨代延续)",
        status.generation, status.current_batch_id
    );

    // --- 演示检查点抓取：第一轮部分限流，携带检查点的重试收敛 ---
    let members = effects.batch_members();
    let batch_zero: Vec<String> = members.get(&0).cloned().unwrap_or_default();
    info!("对 0 号批次的 {} 个成员执行抓取", batch_zero.len());

    let fetcher = Arc::new(DemoFetcher {
        rate_limited_once: Mutex::new(batch_zero.iter().take(2).cloned().collect()),
    });
    let request = FetchRequest {
        urls: batch_zero,
        batch_id: 0,
    };
    let heartbeat = Arc::new(NoopHeartbeat);

    let mut checkpoint: Option<FetchCheckpoint> = None;
    for round in 1..=3 {
        match run_fetch_attempt(
            &request,
            checkpoint.as_ref(),
            Arc::clone(&fetcher),
            Arc::clone(&heartbeat),
            &FetchOptions::default(),
        )
        .await
        {
            Ok(()) => {
                info!("(抓取) 第 {} 轮全部成功，流程收敛", round);
                break;
            }
            Err(FetchError::AttemptsFailed { failed_urls, .. }) => {
                warn!(
                    "(抓取) 第 {} 轮有 {} 个 URL 失败，携带检查点重试",
                    round,
                    failed_urls.len()
                );
                checkpoint = Some(FetchCheckpoint::narrowed(failed_urls));
            }
            Err(e) => return Err(e.into()),
        }
    }

    // --- 优雅关停 ---
    let report_handle: AssignerHandle = handle.clone();
    drop(report_handle); // 克隆的句柄示例：随时可丢弃，不影响协调器
    let final_seed = handle.shutdown().await?;
    info!(
        "协调器已关停。最终种子: 批次 {}, 已填 {} (可用于下次启动恢复)",
        final_seed.current_batch_id, final_seed.urls_in_current_batch
    );
    coordinator_task.await?;

    let assigned = assignments
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .len();
    info!("演示结束：{} 个跟踪器收到了分配通知。", assigned);
    Ok(())
}

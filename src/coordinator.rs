//! 批次分配协调器的主模块定义和核心事件循环。
//!
//! 包含 `Coordinator` 结构体定义、启动函数 (`spawn`)、跨代监督循环 (`run`)
//! 以及单代实例的状态机循环 (`Generation::run`)。
//! 具体的请求分发与分配处理逻辑放在 `handlers` 子模块中，
//! 批次滚动计数器和空位注册表分别放在 `state` 与 `gaps` 子模块中。
//!
//! ## 状态机
//!
//! 每一代实例在三个状态之间运转：
//! - **WAITING**: 队列为空，在请求通道上做有界等待；超时后回到 WAITING 重新检查。
//! - **DRAINING**: 队列非空，每轮迭代处理一个条目（分配批次、触发外部效果）。
//! - **RESTARTING**: 迭代计数达到上限或距实例启动的墙钟阈值到期（二者取先），
//!   每轮迭代只检查一次，绝不打断正在处理的条目。触发后排干队列中剩余条目，
//!   然后把 `CoordinatorSeed` 交给继任实例。
//!
//! ## 重启协议
//!
//! 保状态重启用于约束无界的历史增长：监督循环终止当前代实例，
//! 用其导出的种子状态启动下一代。继任实例以空的待处理队列和
//! （默认）空的空位注册表开始；请求通道属于运行时层，跨代存活，
//! 因此 `AssignerHandle` 在重启后依然有效。

pub(crate) mod gaps;
mod handlers;
pub(crate) mod state;

pub use gaps::GapRegistry;

use crate::effects::BatchEffects;
use crate::handle::AssignerHandle;
use crate::singleton::SingletonLease;
use crate::types::{CoordinatorSeed, Request, ShutdownReplyTx, Url};
use crate::AssignerError;
use state::BatchCycleState;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{error, info, trace, warn};

/// `ensure_batch_processor` 失败时的重试策略。
///
/// 这是编排运行时自身重试策略的进程内替身：失败的效果调用按指数退避重试，
/// 直到成功或尝试次数耗尽；耗尽对该条目的分配是致命的。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次调用），至少为 1。
    pub max_attempts: u32,
    /// 首次重试前的等待时长，之后每次翻倍。
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

/// 协调器的配置。
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// 每个批次允许的新分配（非回填）数量上限。
    pub max_batch_size: u32,
    /// 单代实例的迭代计数上限，达到后触发保状态重启。
    /// 与积压无关的绝对上界。
    pub max_iterations: u32,
    /// 单代实例自启动起的墙钟阈值，到期后触发保状态重启。
    /// 与迭代上限二者取先。
    pub restart_after: Duration,
    /// WAITING 状态下的有界等待时长：队列持续为空时按此周期醒来重新检查。
    pub idle_recheck: Duration,
    /// 请求通道的缓冲区大小。
    pub channel_buffer: NonZeroUsize,
    /// 单例租约名称：同一名称同一时间只允许一个活跃协调器。
    pub singleton_name: String,
    /// 首次启动时的种子状态（恢复部署时可传入上次关停导出的种子）。
    pub initial_seed: CoordinatorSeed,
    /// 是否把空位注册表带过重启边界。
    /// 观察到的原始设计在重启时丢弃空位（空位是尽力而为的优化，不是正确性前提），
    /// 因此默认为 `false`；是否持久化留作产品决策。
    pub carry_gaps_across_restart: bool,
    /// `ensure_batch_processor` 的重试策略。
    pub ensure_retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            max_batch_size: 10,
            max_iterations: 1000,
            // 至少每天重启一次，以协助清理旧版本的代码路径
            restart_after: Duration::from_secs(24 * 60 * 60),
            idle_recheck: Duration::from_secs(60 * 60),
            channel_buffer: NonZeroUsize::new(128).unwrap(),
            singleton_name: "batch-id-assigner".to_string(),
            initial_seed: CoordinatorSeed::default(),
            carry_gaps_across_restart: false,
            ensure_retry: RetryPolicy::default(),
        }
    }
}

/// 批次分配协调器。
///
/// 持有请求通道的接收端、外部效果实现和单例租约；
/// `spawn` 之后由后台任务中的监督循环驱动，跨代复用这份所有权。
pub struct Coordinator<E: BatchEffects> {
    /// 接收来自 `AssignerHandle` 的请求的 MPSC 通道接收端。
    /// 通道属于运行时层而非某一代实例，跨保状态重启存活。
    request_rx: mpsc::Receiver<Request>,
    /// 外部效果实现（ensure-batch-processor / notify-assigned）。
    effects: Arc<E>,
    /// 协调器配置。
    config: CoordinatorConfig,
    /// 单例租约，协调器任务存活期间持有，退出时随 Drop 释放。
    _lease: SingletonLease,
}

impl<E: BatchEffects> Coordinator<E> {
    /// 启动协调器后台任务。
    ///
    /// 先认领 `config.singleton_name` 对应的单例租约（失败即拒绝启动），
    /// 然后创建请求通道并把监督循环交给一个新的 Tokio 任务。
    /// 返回与协调器交互的 `AssignerHandle` 和后台任务的 `JoinHandle`。
    pub fn spawn(
        config: CoordinatorConfig,
        effects: Arc<E>,
    ) -> Result<(AssignerHandle, JoinHandle<()>), AssignerError> {
        let lease = SingletonLease::claim(&config.singleton_name)?;

        let (request_tx, request_rx) = mpsc::channel(config.channel_buffer.get());
        let coordinator = Coordinator {
            request_rx,
            effects,
            config,
            _lease: lease,
        };

        let handle = AssignerHandle::new(request_tx);
        let join_handle = tokio::spawn(coordinator.run());
        Ok((handle, join_handle))
    }

    /// 跨代监督循环。
    ///
    /// 每一代实例运行到重启条件触发后，把种子状态交回这里；
    /// 监督循环随即以该种子启动下一代。Shutdown 或通道关闭时退出。
    async fn run(mut self) {
        info!(
            "(Coordinator) 协调器任务已启动。单例: {}, 批次上限: {}, 迭代上限: {}",
            self.config.singleton_name, self.config.max_batch_size, self.config.max_iterations
        );

        let mut seed = self.config.initial_seed;
        let mut carried_gaps = GapRegistry::new();
        let mut generation: u32 = 1;

        loop {
            let gaps = std::mem::take(&mut carried_gaps);
            let instance = Generation::new(
                generation,
                seed,
                gaps,
                self.config.clone(),
                Arc::clone(&self.effects),
            );

            match instance.run(&mut self.request_rx).await {
                GenerationOutcome::Restart {
                    seed: next_seed,
                    gaps,
                    reason,
                } => {
                    info!(
                        "(Coordinator) 第 {} 代实例达到重启条件 ({:?})，执行保状态重启，交接种子: {:?}",
                        generation, reason, next_seed
                    );
                    seed = next_seed;
                    if self.config.carry_gaps_across_restart {
                        carried_gaps = gaps;
                    } else if !gaps.is_empty() {
                        warn!(
                            "(Coordinator) 重启丢弃了 {} 个批次的空位记录 (carry_gaps_across_restart 未开启)",
                            gaps.len()
                        );
                    }
                    generation += 1;
                }
                GenerationOutcome::Shutdown {
                    seed: final_seed,
                    reply_tx,
                } => {
                    info!(
                        "(Coordinator) 第 {} 代实例收到关停请求并已排干队列，最终种子: {:?}",
                        generation, final_seed
                    );
                    if reply_tx.send(final_seed).is_err() {
                        error!("(Coordinator) 发送关停结果失败 (调用方可能已放弃等待)");
                    }
                    break;
                }
                GenerationOutcome::Closed => {
                    info!("(Coordinator) 请求通道已关闭 (所有 Handle 均已 Drop)，协调器退出");
                    break;
                }
            }
        }
        info!("(Coordinator) 协调器任务退出。");
    }
}

/// 触发保状态重启的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RestartReason {
    /// 迭代计数达到上限。
    IterationCeiling,
    /// 距实例启动的墙钟阈值到期。
    WallClock,
}

/// 单代实例运行结束后交回监督循环的结果。
pub(crate) enum GenerationOutcome {
    /// 达到重启条件：交接种子状态（以及空位注册表，是否采用由配置决定）。
    Restart {
        seed: CoordinatorSeed,
        gaps: GapRegistry,
        reason: RestartReason,
    },
    /// 收到关停请求并已排干队列。
    Shutdown {
        seed: CoordinatorSeed,
        reply_tx: ShutdownReplyTx,
    },
    /// 请求通道已关闭。
    Closed,
}

/// 排干队列前挂起的控制流转换。
pub(crate) enum Control {
    /// 收到 Shutdown 请求，待队列排干后回复。
    Shutdown(ShutdownReplyTx),
    /// 请求通道关闭，待队列排干后退出。
    ChannelClosed,
}

/// 协调器的单代实例：一轮保状态重启之间的全部可变状态。
pub(crate) struct Generation<E> {
    /// 实例代数（从 1 开始）。
    generation: u32,
    /// 批次滚动计数器。
    state: BatchCycleState,
    /// 空位注册表。
    gaps: GapRegistry,
    /// 待处理队列：等待分配的 URL，FIFO。
    pending: VecDeque<Url>,
    /// 外部效果实现。
    effects: Arc<E>,
    /// 协调器配置。
    config: CoordinatorConfig,
    /// 排干队列前挂起的控制流转换（Shutdown / 通道关闭）。
    control: Option<Control>,
}

impl<E: BatchEffects> Generation<E> {
    pub fn new(
        generation: u32,
        seed: CoordinatorSeed,
        gaps: GapRegistry,
        config: CoordinatorConfig,
        effects: Arc<E>,
    ) -> Self {
        let state = BatchCycleState::from_seed(seed, config.max_batch_size);
        Generation {
            generation,
            state,
            gaps,
            pending: VecDeque::new(),
            effects,
            config,
            control: None,
        }
    }

    /// 单代实例的主事件循环（WAITING / DRAINING / RESTARTING 状态机）。
    ///
    /// 迭代计数对等待周期和条目处理统一计数，因此无论积压多重，
    /// 迭代上限都是绝对上界。重启条件每轮迭代只检查一次，
    /// 绝不打断正在处理的条目。
    pub async fn run(mut self, rx: &mut mpsc::Receiver<Request>) -> GenerationOutcome {
        info!(
            "(Coordinator) 第 {} 代实例事件循环开始。种子: {:?}",
            self.generation,
            self.state.seed()
        );

        let deadline = Instant::now() + self.config.restart_after;
        let mut iteration: u32 = 0;

        let reason = loop {
            // 每轮迭代只检查一次重启条件（迭代上限与墙钟阈值二者取先）
            if iteration >= self.config.max_iterations {
                break RestartReason::IterationCeiling;
            }
            if Instant::now() >= deadline {
                break RestartReason::WallClock;
            }
            iteration += 1;

            if self.pending.is_empty() {
                // WAITING: 队列为空，带超时地等待下一条消息，避免空转
                match time::timeout(self.config.idle_recheck, rx.recv()).await {
                    Ok(Some(request)) => self.handle_request(request),
                    Ok(None) => {
                        if self.control.is_none() {
                            self.control = Some(Control::ChannelClosed);
                        }
                    }
                    Err(_elapsed) => {
                        trace!(
                            "(Coordinator) 等待超时 ({:?})，队列仍为空，继续等待",
                            self.config.idle_recheck
                        );
                    }
                }
            } else {
                // DRAINING: 先吸收通道里已到达的信号（空位可能乱序到达），
                // 再处理队列头部的一个条目
                self.absorb_queued_requests(rx);
                if let Some(url) = self.pending.pop_front() {
                    self.assign_url(url).await;
                }
            }

            // 控制流转换（Shutdown / 通道关闭）只在队列排干后生效
            if self.pending.is_empty() {
                if let Some(control) = self.control.take() {
                    match control {
                        Control::Shutdown(reply_tx) => {
                            return GenerationOutcome::Shutdown {
                                seed: self.state.seed(),
                                reply_tx,
                            };
                        }
                        Control::ChannelClosed => return GenerationOutcome::Closed,
                    }
                }
            }
        };

        // RESTARTING: 不再吸收新信号，排干队列中剩余条目后交接。
        // 重启期间到达的信号留在通道中，由继任实例处理。
        while let Some(url) = self.pending.pop_front() {
            self.assign_url(url).await;
        }

        // 已挂起的控制流转换优先于重启：关停/通道关闭直接终结协调器
        if let Some(control) = self.control.take() {
            match control {
                Control::Shutdown(reply_tx) => {
                    return GenerationOutcome::Shutdown {
                        seed: self.state.seed(),
                        reply_tx,
                    };
                }
                Control::ChannelClosed => return GenerationOutcome::Closed,
            }
        }

        info!(
            "(Coordinator) 第 {} 代实例结束 (原因: {:?}, 迭代: {})",
            self.generation, reason, iteration
        );
        GenerationOutcome::Restart {
            seed: self.state.seed(),
            gaps: self.gaps,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试配置默认值与原始设计的常量一致。
    #[test]
    fn test_coordinator_config_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_iterations, 1000);
        assert_eq!(config.restart_after, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.idle_recheck, Duration::from_secs(60 * 60));
        assert!(!config.carry_gaps_across_restart);
        assert_eq!(config.initial_seed, CoordinatorSeed::default());
    }

    /// 测试重试策略默认值。
    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
    }
}

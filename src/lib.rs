// 声明模块 (Declare modules)
mod coordinator; // 协调器 Actor 与批次滚动/空位逻辑
mod effects;
mod error;
mod fetch;
mod handle;
mod singleton;
mod types;

// 公开导出需要被外部 (如 main 函数) 使用的类型
pub use coordinator::{Coordinator, CoordinatorConfig, GapRegistry, RetryPolicy}; // 导出协调器
pub use effects::{
    batch_processor_task_id, url_state_task_id, BatchEffects, InProcessEffects, TrackerDirectory,
}; // 导出效果接口及其进程内实现
pub use error::{
    AssignerError, CoordinatorError, EffectError, FetchAttemptError, FetchError, // 导出错误类型
};
pub use fetch::{run_fetch_attempt, Heartbeat, NoopHeartbeat, UrlFetcher}; // 导出抓取执行器
pub use handle::AssignerHandle; // 导出 Handle
pub use singleton::SingletonLease;
pub use types::{
    BatchAssignment,
    BatchId,
    CoordinatorSeed,
    CoordinatorStatus,
    FetchCheckpoint,
    FetchOptions,
    FetchRequest,
    GapCount,
    Url, // 导出主要的数据类型
};

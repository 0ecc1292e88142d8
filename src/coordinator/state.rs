//! 批次滚动状态与分配策略。

use super::gaps::GapRegistry;
use crate::types::{BatchId, CoordinatorSeed};
use tracing::info;

/// 协调器的批次滚动计数器：当前批次 ID 与已填入数量。
///
/// 不变量：`urls_in_current_batch` 不超过 `max_batch_size`；
/// 达到上限后下一个新分配触发滚动（批次 ID 加一、计数清零）。
/// 该状态在重启边界通过 `CoordinatorSeed` 显式传递给继任实例。
#[derive(Debug)]
pub(crate) struct BatchCycleState {
    current_batch_id: BatchId,
    urls_in_current_batch: u32,
    max_batch_size: u32,
}

impl BatchCycleState {
    /// 从种子状态恢复（首次启动时种子为默认值 {0, 0}）。
    pub fn from_seed(seed: CoordinatorSeed, max_batch_size: u32) -> Self {
        BatchCycleState {
            current_batch_id: seed.current_batch_id,
            urls_in_current_batch: seed.urls_in_current_batch,
            max_batch_size,
        }
    }

    /// 导出种子状态，用于交接给继任实例。
    pub fn seed(&self) -> CoordinatorSeed {
        CoordinatorSeed {
            current_batch_id: self.current_batch_id,
            urls_in_current_batch: self.urls_in_current_batch,
        }
    }

    /// 当前批次 ID。
    pub fn current_batch_id(&self) -> BatchId {
        self.current_batch_id
    }

    /// 当前批次已填入的 URL 数量。
    pub fn urls_in_current_batch(&self) -> u32 {
        self.urls_in_current_batch
    }

    /// 滚动到新批次：批次 ID 加一，计数清零。
    fn cycle_to_new_batch(&mut self) {
        self.current_batch_id += 1;
        self.urls_in_current_batch = 0;
    }

    /// 分配策略：为下一个条目选择批次 ID。
    ///
    /// 1. 空位注册表中有空位 -> 立即返回该批次；当前批次的计数器不受影响
    ///    （回填批次独立于滚动计数器跟踪，回填不递增目标批次的填充计数）。
    /// 2. 否则若当前批次已满 -> 滚动到新批次。
    /// 3. 递增填充计数并返回当前批次 ID。
    ///
    /// 给定输入，该策略是确定性的、可重放的：无随机数、无时钟读取、无外部调用。
    pub fn next_batch_id_for(&mut self, gaps: &mut GapRegistry) -> BatchId {
        if let Some(batch_id_with_gap) = gaps.pull_first_gap() {
            info!("(Coordinator) 发现有空位的批次，尝试回填: {}", batch_id_with_gap);
            return batch_id_with_gap;
        }

        if self.urls_in_current_batch >= self.max_batch_size {
            self.cycle_to_new_batch();
        }

        self.urls_in_current_batch += 1;
        self.current_batch_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoordinatorSeed;

    /// 测试新分配在达到上限前不滚动，达到上限后滚动到下一个批次。
    #[test]
    fn test_rollover_at_max_batch_size() {
        let mut gaps = GapRegistry::new();
        let mut state = BatchCycleState::from_seed(CoordinatorSeed::default(), 3);

        // 前 3 个分配落在 0 号批次
        assert_eq!(state.next_batch_id_for(&mut gaps), 0);
        assert_eq!(state.next_batch_id_for(&mut gaps), 0);
        assert_eq!(state.next_batch_id_for(&mut gaps), 0);
        assert_eq!(state.urls_in_current_batch(), 3);

        // 第 4 个触发滚动
        assert_eq!(state.next_batch_id_for(&mut gaps), 1);
        assert_eq!(state.urls_in_current_batch(), 1);
    }

    /// 测试空位优先：有空位时返回空位批次，且不影响当前批次的计数器。
    #[test]
    fn test_gap_backfill_does_not_touch_fill_counter() {
        let mut gaps = GapRegistry::new();
        let mut state = BatchCycleState::from_seed(
            CoordinatorSeed {
                current_batch_id: 9,
                urls_in_current_batch: 2,
            },
            5,
        );

        gaps.register_gap(4);
        assert_eq!(state.next_batch_id_for(&mut gaps), 4);
        // 回填不递增滚动计数器
        assert_eq!(state.urls_in_current_batch(), 2);
        assert_eq!(state.current_batch_id(), 9);

        // 空位耗尽后回到正常分配路径
        assert_eq!(state.next_batch_id_for(&mut gaps), 9);
        assert_eq!(state.urls_in_current_batch(), 3);
    }

    /// 测试策略确定性：登记空位 {5, 2, 7} 后，连续三次分配返回 2, 5, 7。
    #[test]
    fn test_gap_pull_order_is_deterministic() {
        let mut gaps = GapRegistry::new();
        let mut state = BatchCycleState::from_seed(CoordinatorSeed::default(), 10);

        gaps.register_gap(5);
        gaps.register_gap(2);
        gaps.register_gap(7);

        assert_eq!(state.next_batch_id_for(&mut gaps), 2);
        assert_eq!(state.next_batch_id_for(&mut gaps), 5);
        assert_eq!(state.next_batch_id_for(&mut gaps), 7);
    }

    /// 测试种子往返：恢复后的第一个新分配延续之前的滚动状态。
    /// 种子 {3, 2}、上限 5 时：接下来 3 个分配仍在 3 号批次，之后才滚动到 4。
    #[test]
    fn test_seed_roundtrip_preserves_rollover_state() {
        let mut gaps = GapRegistry::new();
        let seed = CoordinatorSeed {
            current_batch_id: 3,
            urls_in_current_batch: 2,
        };
        let mut state = BatchCycleState::from_seed(seed, 5);

        assert_eq!(state.next_batch_id_for(&mut gaps), 3); // 填充数 3
        assert_eq!(state.next_batch_id_for(&mut gaps), 3); // 填充数 4
        assert_eq!(state.next_batch_id_for(&mut gaps), 3); // 填充数 5
        assert_eq!(state.next_batch_id_for(&mut gaps), 4); // 滚动

        let exported = state.seed();
        assert_eq!(exported.current_batch_id, 4);
        assert_eq!(exported.urls_in_current_batch, 1);
    }
}

//! 空位注册表：按批次跟踪可回填的容量。

use crate::types::{BatchId, GapCount};
use std::collections::BTreeMap;

/// 记录每个批次当前可回填空位数量的注册表。
///
/// 不变量：不存在计数 <= 0 的条目；计数减到 0 时条目被移除。
/// 消费顺序：最小的 `BatchId` 优先（优先填满最老的批次，
/// 避免留下大量部分填充的旧批次）。`BTreeMap` 的迭代顺序天然满足这一点。
#[derive(Debug, Default)]
pub struct GapRegistry {
    gaps: BTreeMap<BatchId, GapCount>,
}

impl GapRegistry {
    /// 创建一个空的注册表。
    pub fn new() -> Self {
        GapRegistry {
            gaps: BTreeMap::new(),
        }
    }

    /// 为指定批次登记一个空位（条目不存在时以 1 创建）。没有数量上限。
    pub fn register_gap(&mut self, batch_id: BatchId) {
        *self.gaps.entry(batch_id).or_insert(0) += 1;
    }

    /// 取出批次 ID 最小的一个空位。
    ///
    /// 对应条目的计数减一，减到 0 时移除条目。注册表为空时返回 `None`。
    /// 这是分配策略唯一的优先级信号。
    pub fn pull_first_gap(&mut self) -> Option<BatchId> {
        let (&batch_id, count) = self.gaps.iter_mut().next()?;
        *count -= 1;
        let exhausted = *count == 0;
        if exhausted {
            self.gaps.remove(&batch_id);
        }
        Some(batch_id)
    }

    /// 返回注册表的只读快照。无副作用，可在协调器主循环挂起时由消息处理器直接回答。
    pub fn snapshot(&self) -> BTreeMap<BatchId, GapCount> {
        self.gaps.clone()
    }

    /// 当前存在空位的批次数量。
    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    /// 注册表是否为空。
    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }
}

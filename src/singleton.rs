//! 进程级单例租约。
//!
//! 分配决策必须串行化在唯一的权威协调器实例上。这里用一个
//! 以固定名称为键的进程级租约注册表来强制这一点：
//! `Coordinator::spawn` 在启动前认领租约，认领失败即拒绝启动；
//! 租约在持有者被 Drop 时自动释放（RAII）。
//!
//! 跨进程部署时应替换为外部的锁/租约服务，接口形状保持不变。

use crate::error::CoordinatorError;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};
use tracing::{debug, info};

/// 进程级的已认领名称集合。
static CLAIMED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn claimed_set() -> &'static Mutex<HashSet<String>> {
    CLAIMED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// 一个已认领的单例租约。Drop 时自动释放对应名称。
#[derive(Debug)]
pub struct SingletonLease {
    name: String,
}

impl SingletonLease {
    /// 认领指定名称的租约。
    ///
    /// 如果该名称已被其他活跃实例持有，返回
    /// `CoordinatorError::SingletonAlreadyClaimed`。
    pub fn claim(name: &str) -> Result<Self, CoordinatorError> {
        let mut claimed = claimed_set()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !claimed.insert(name.to_string()) {
            return Err(CoordinatorError::SingletonAlreadyClaimed(name.to_string()));
        }

        info!("(SingletonLease) 已认领单例租约: {}", name);
        Ok(SingletonLease {
            name: name.to_string(),
        })
    }

    /// 租约对应的名称。
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SingletonLease {
    fn drop(&mut self) {
        let mut claimed = claimed_set()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        claimed.remove(&self.name);
        debug!("(SingletonLease) 已释放单例租约: {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试基本认领与名称访问。
    #[test]
    fn test_claim_and_name() {
        let lease = SingletonLease::claim("test-claim-basic").expect("首次认领应成功");
        assert_eq!(lease.name(), "test-claim-basic");
    }

    /// 测试同名冲突：租约被持有期间第二次认领失败。
    #[test]
    fn test_duplicate_claim_rejected() {
        let _lease = SingletonLease::claim("test-claim-dup").expect("首次认领应成功");

        match SingletonLease::claim("test-claim-dup") {
            Err(CoordinatorError::SingletonAlreadyClaimed(name)) => {
                assert_eq!(name, "test-claim-dup");
            }
            other => panic!("期望 SingletonAlreadyClaimed, 得到 {:?}", other),
        }
    }

    /// 测试 Drop 释放：持有者消失后可以重新认领。
    #[test]
    fn test_release_on_drop() {
        {
            let _lease = SingletonLease::claim("test-claim-release").expect("首次认领应成功");
        } // 离开作用域，租约释放

        let _again = SingletonLease::claim("test-claim-release").expect("释放后应可重新认领");
    }

    /// 测试不同名称互不影响。
    #[test]
    fn test_distinct_names_are_independent() {
        let _a = SingletonLease::claim("test-claim-a").expect("认领 a 应成功");
        let _b = SingletonLease::claim("test-claim-b").expect("认领 b 应成功");
    }
}

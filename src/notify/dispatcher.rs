//! 通知任务派发器
//!
//! 每个告警一个独立线程, 检测循环从不 join; 同时在途的任务数有上限,
//! 告警风暴时超出部分直接丢弃。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct Dispatcher {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

/// 线程结束 (或创建失败) 时归还名额
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Dispatcher {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// 派发后台任务; 名额已满或线程创建失败时返回 false
    pub fn spawn<F>(&self, name: &str, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let max = self.max_in_flight;
        let reserved = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            });
        if reserved.is_err() {
            warn!("⚠️ 通知任务过多 ({}), 丢弃: {}", max, name);
            return false;
        }

        let slot = Slot(Arc::clone(&self.in_flight));
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _slot = slot;
                task();
            });

        match spawned {
            Ok(_) => true,
            Err(e) => {
                warn!("❌ 通知线程创建失败: {}", e);
                false
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

//! 证据帧缓存 (Evidence buffer)
//!
//! 每个占用区间一份, 容量固定为 N, 先到先得: 满了以后本区间内
//! 的新帧全部丢弃, 区间结束时随状态一起销毁。

use crate::detection::types::Frame;

#[derive(Debug, Clone)]
pub struct EvidenceBuffer {
    capacity: usize,
    frames: Vec<Frame>,
}

impl EvidenceBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: Vec::with_capacity(capacity),
        }
    }

    /// 返回是否接收了该帧
    pub fn push(&mut self, frame: Frame) -> bool {
        if self.is_full() {
            return false;
        }
        self.frames.push(frame);
        true
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    /// 当前缓存的帧 (按采集顺序), 不清空
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

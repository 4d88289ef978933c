use crate::bindings::callframe::{CallFrame, FrameStorage};
use crate::config::FrameConfig;
use crate::core::error::BindingResult;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 调用帧存储池 - 线程安全，无锁
///
/// 每次方法调用都需要一块参数缓冲区；池化后热路径上不再分配内存。
/// 空闲存储放在容量为 `max_size` 的有界通道里，归还时通道已满则直接丢弃。
pub struct FramePool {
    sender: Sender<Box<FrameStorage>>,
    receiver: Receiver<Box<FrameStorage>>,
    max_size: usize,
    /// 统计信息
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    cache_hits: AtomicUsize,
    discarded: AtomicUsize,
}

impl FramePool {
    /// 创建帧池并预先分配 `initial_size` 块存储
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        // 容量为 0 时 try_send 总是失败，即不缓存
        let (sender, receiver) = bounded(max_size);
        let pool = Self {
            sender,
            receiver,
            max_size,
            acquisitions: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
        };
        pool.warm_up(initial_size);
        pool
    }

    pub fn from_config(config: &FrameConfig) -> Self {
        Self::new(config.initial_pool_size, config.max_pool_size)
    }

    /// 获取一个容量为 `capacity` 的调用帧
    pub fn acquire(&self, capacity: usize) -> BindingResult<CallFrame<'_>> {
        CallFrame::check_capacity(capacity)?;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);

        let storage = match self.receiver.try_recv() {
            Ok(storage) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                storage
            }
            Err(_) => {
                tracing::trace!(target: "ffi.frames", "frame pool empty, allocating");
                FrameStorage::boxed()
            }
        };

        Ok(CallFrame::with_storage(storage, capacity, Some(self)))
    }

    /// 归还存储（由 `CallFrame` 的 `Drop` 调用）
    pub(crate) fn release(&self, mut storage: Box<FrameStorage>) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        storage.reset();
        if self.sender.try_send(storage).is_err() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 预热池，最多填满到 `max_size`
    pub fn warm_up(&self, count: usize) {
        for _ in 0..count {
            if self.sender.try_send(FrameStorage::boxed()).is_err() {
                break;
            }
        }
    }

    /// 清空池
    pub fn clear(&self) {
        while self.receiver.try_recv().is_ok() {}
    }

    pub fn available(&self) -> usize {
        self.receiver.len()
    }

    /// 获取统计信息
    pub fn stats(&self) -> FramePoolStats {
        FramePoolStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            current_size: self.available(),
            max_size: self.max_size,
        }
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::from_config(&FrameConfig::default())
    }
}

/// 帧池统计信息
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FramePoolStats {
    pub acquisitions: usize,
    pub releases: usize,
    pub cache_hits: usize,
    pub discarded: usize,
    pub current_size: usize,
    pub max_size: usize,
}

impl FramePoolStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        if self.acquisitions == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.acquisitions as f64
        }
    }

    /// 已获取但尚未归还的帧数
    pub fn outstanding(&self) -> usize {
        self.acquisitions.saturating_sub(self.releases)
    }
}

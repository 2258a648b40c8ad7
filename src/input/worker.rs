//! 解码线程句柄: 停止标志 + 退出等待
//!
//! 释放输入源时先置停止标志, 再等待线程真正退出,
//! 保证设备 (如 /dev/videoN) 已关闭后才允许重新打开。

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

pub struct DecodeWorker {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    // 线程退出时发送端随之销毁
    exited: Receiver<()>,
}

impl DecodeWorker {
    /// 启动命名线程, 线程体通过停止标志得知何时退出
    pub fn spawn(
        name: impl Into<String>,
        body: impl FnOnce(Arc<AtomicBool>) + Send + 'static,
    ) -> io::Result<Self> {
        let name = name.into();
        let stop = Arc::new(AtomicBool::new(false));
        let (exit_tx, exited) = bounded::<()>(0);

        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _exit_tx = exit_tx;
            body(thread_stop);
        })?;

        Ok(Self {
            name,
            stop,
            handle: Some(handle),
            exited,
        })
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// 通知退出并等待; 超时返回 false, 线程被分离
    pub fn stop_and_join(&mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Relaxed);
        let Some(handle) = self.handle.take() else {
            return true;
        };
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("⚠️ {} 线程异常退出", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("⚠️ {} 线程 {}秒内未退出", self.name, timeout.as_secs_f32());
                false
            }
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

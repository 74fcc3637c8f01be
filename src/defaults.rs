//! 默认配置常量和 `ManagerConfig`。

use std::time::Duration;

/// 工作线程等待 I/O 的最长时间。
///
/// multi 的等待不会因为单个传输的超时到期而返回，所以这个值同时决定了
/// 传输超时的检测精度，以及信号被合并时发现新工作的最大延迟。
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 工作线程的默认名称。
pub const DEFAULT_WORKER_THREAD_NAME: &str = "curl-mux-worker";

/// `TransferManager` 的配置。
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// 每轮事件循环等待 I/O 或唤醒事件的上限。
    pub poll_interval: Duration,
    /// 工作线程名称。
    pub thread_name: String,
}

impl ManagerConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
        }
    }
}

//! 定义库的核心数据结构和类型别名。
//!
//! 这个模块包含了在调用者、`TransferManager` 和工作线程之间传递的基础类型：
//! 传输 ID、响应体累加器，以及回调和结果的类型别名。

use crate::transport::Transport;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// --- 传输 ID (Transfer Id) ---

/// 一个进行中传输的唯一标识符。
///
/// 在 `submit` 时分配，在进程内单调递增且不重复。
/// 它既是共享注册表的键，也是传输层报告完成时使用的 token。
///
/// 以 `usize` 计数，与传输层 token 的宽度一致，转换时不会截断。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(usize);

impl TransferId {
    /// 分配下一个 ID。
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(1);
        TransferId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 返回 ID 的数值。
    pub fn get(self) -> usize {
        self.0
    }

    /// 转换为传输层使用的 token。
    pub fn as_token(self) -> usize {
        self.0
    }

    /// 从传输层报告的 token 还原 ID。
    pub fn from_token(token: usize) -> Self {
        TransferId(token)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// --- 响应体累加器 (Accumulator) ---

/// 一个传输的响应体累加器。
///
/// 注册表和传输层的数据回调各持有一份克隆：传输层在数据到达时追加，
/// 工作线程在传输完成后一次性取走全部内容。
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    inner: Arc<Mutex<BytesMut>>,
}

impl Accumulator {
    /// 创建一个空的累加器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一段数据。
    pub fn append(&self, data: &[u8]) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
    }

    /// 当前已累积的字节数。
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取走已累积的全部数据，累加器被清空。
    pub fn take(&self) -> Bytes {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *guard).freeze()
    }
}

// --- 回调与结果类型 (Callback and Outcome Types) ---

/// 单个传输的最终状态：`Ok(())` 表示传输层报告成功，
/// `Err` 携带传输层的错误（连接失败、超时等）。
///
/// 注意：HTTP 层面的非 2xx 状态码对传输层来说仍然是成功，
/// 需要回调自己从句柄中读取响应码。
pub type TransferStatus<T> = Result<(), <T as Transport>::Error>;

/// 完成回调：`(状态, 传输句柄, 累积的响应体)`。
///
/// 每个成功提交的传输恰好调用一次，在工作线程上执行。
/// 回调返回后句柄立即被释放。回调 panic 会导致进程中止。
pub type Callback<T> =
    Box<dyn FnOnce(TransferStatus<T>, &mut <T as Transport>::Handle, Bytes) + Send + 'static>;

/// 异步 `fetch` 的结果。
pub struct Fetched<T: Transport> {
    /// 传输的 ID。
    pub id: TransferId,
    /// 传输层报告的最终状态。
    pub status: TransferStatus<T>,
    /// 回调期间从句柄中读取的摘要信息（例如 HTTP 响应码）。
    pub summary: T::Summary,
    /// 累积的响应体。
    pub body: Bytes,
}

impl<T: Transport> fmt::Debug for Fetched<T>
where
    T::Summary: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetched")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("summary", &self.summary)
            .field("body_len", &self.body.len())
            .finish()
    }
}

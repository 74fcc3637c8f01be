//! 多路复用传输上下文的抽象。
//!
//! `TransferManager` 不关心 HTTP 本身，只通过 `Transport` trait 驱动底层的多路复用器：
//! 挂接新的传输、推进所有传输、等待 I/O 或唤醒事件、收集已完成的传输。
//! 默认实现是基于 libcurl multi 接口的 `CurlTransport`。
//!
//! 一个 `Transport` 实例只在工作线程上被创建、使用和销毁，因此它本身不需要是 `Send` 的；
//! 只有句柄和错误需要在线程之间移动。

pub mod curl_multi;

use crate::types::{Accumulator, TransferId};
use crate::wake::WakeReceiver;
use std::time::Duration;

pub use self::curl_multi::{CurlTransport, ResponseInfo};

/// 一个已完成的传输，由 `Transport::take_completed` 交还。
pub struct Completion<T: Transport> {
    /// 提交时分配的 ID。
    pub id: TransferId,
    /// 传输层报告的最终状态。
    pub status: Result<(), T::Error>,
    /// 已从多路复用器中分离的句柄。
    pub handle: T::Handle,
}

/// 挂接失败时交还的句柄和错误，回调仍会带着这个错误被调用一次。
pub struct Rejected<T: Transport> {
    pub handle: T::Handle,
    pub error: T::Error,
}

/// 多路复用传输上下文。
///
/// 除 `install_sink` 和 `summarize` 外，所有方法都只在工作线程上调用。
pub trait Transport: Sized + 'static {
    /// 调用者配置好的传输句柄 (目标地址、方法、头部、超时等)。
    type Handle: Send + 'static;
    /// 传输层错误。
    type Error: std::error::Error + Send + Sync + 'static;
    /// 完成回调时从句柄中读取的摘要信息，供异步 `fetch` 使用。
    type Summary: Send + 'static;

    /// 把句柄的数据回调接到累加器上：此后到达的响应体字节都追加到 `sink`。
    ///
    /// 在提交线程上、句柄进入注册表之前调用。
    fn install_sink(handle: &mut Self::Handle, sink: Accumulator) -> Result<(), Self::Error>;

    /// 从已完成传输的句柄中读取摘要信息。
    fn summarize(handle: &mut Self::Handle) -> Self::Summary;

    /// 以 `id` 为 token 把句柄挂接到多路复用器。
    fn attach(&mut self, id: TransferId, handle: Self::Handle) -> Result<(), Rejected<Self>>;

    /// 非阻塞地推进所有传输一步，返回仍在进行的传输数量。
    fn perform(&mut self) -> Result<usize, Self::Error>;

    /// 等待任一传输的 I/O 就绪或唤醒通道可读，最多等待 `timeout`。
    ///
    /// 返回唤醒通道是否可读。
    fn wait(&mut self, wake: &WakeReceiver, timeout: Duration) -> Result<bool, Self::Error>;

    /// 取出所有已完成的传输，句柄已从多路复用器中分离。
    fn take_completed(&mut self) -> Vec<Completion<Self>>;

    /// 当前挂接在多路复用器上的传输数量。
    fn active(&self) -> usize;
}

#[cfg(test)]
pub(crate) mod scripted;

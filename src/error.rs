//! 定义库中使用的错误类型。
//!
//! 本模块包含以下错误枚举：
//! - `ManagerError`: 构造或使用 `TransferManager` 时可能发生的错误（重复实例、唤醒通道创建失败等）。
//! - `CurlError`: `CurlTransport` 的传输层错误，通过回调的状态参数交给调用者，从不抛出。
//! - `WakeError`: 唤醒通道读取失败或收到未知标签。
//! - `RequestError`: 将 JSON 请求描述转换为传输句柄时的错误。
//! - `FetchError`: 异步 `fetch` 接口的顶层错误类型。

use std::io;
use thiserror::Error;
// 使用 `thiserror` 宏为错误枚举派生 `std::error::Error` 和 `Display`。

/// 构造或使用 `TransferManager` 时可能产生的错误。
///
/// 构造类错误（`DuplicateInstance`、`ChannelCreationFailed`、`WorkerSpawnFailed`）
/// 都是致命的：在解决根本原因之前不应重试。
#[derive(Error, Debug)]
pub enum ManagerError {
    /// 进程内已经存在一个存活的 `TransferManager`。
    /// 同一时刻最多只允许构造一个实例。
    #[error("已有一个传输管理器实例在运行，同一进程内只允许一个")]
    DuplicateInstance,

    /// 无法创建用于唤醒工作线程的通道。
    #[error("创建唤醒通道失败: {0}")]
    ChannelCreationFailed(#[source] io::Error),

    /// 无法启动工作线程。
    #[error("启动工作线程失败: {0}")]
    WorkerSpawnFailed(#[source] io::Error),

    /// 管理器正在关闭或已关闭，不再接受新的传输。
    /// 被拒绝的请求连同其回调一起被丢弃，回调不会被调用。
    #[error("传输管理器正在关闭，不再接受新的传输")]
    ShuttingDown,
}

/// `CurlTransport` 报告的错误。
///
/// 单个传输的失败（连接失败、超时等）以 `Transfer` 的形式交给该传输的回调；
/// multi 句柄本身的错误以 `Multi` 的形式出现。
#[derive(Error, Debug)]
pub enum CurlError {
    /// easy 句柄级别的错误（连接失败、超时、写入回调中止等）。
    #[error("{0}")]
    Transfer(#[from] curl::Error),

    /// multi 句柄级别的错误。
    #[error("curl multi 错误: {0}")]
    Multi(#[from] curl::MultiError),

    /// 完成消息携带了一个不属于任何已挂接传输的 token。
    #[error("完成消息中的 token {0} 不对应任何已挂接的传输")]
    UnknownToken(usize),
}

/// 读取唤醒通道时的错误。
#[derive(Error, Debug)]
pub enum WakeError {
    /// 底层 I/O 错误。
    #[error("读取唤醒通道失败: {0}")]
    Io(#[from] io::Error),

    /// 读到了无法识别的事件标签。这只可能是程序错误。
    #[error("唤醒通道收到未知标签 {0:#04x}")]
    UnknownTag(u8),
}

/// 把 JSON 请求描述转换为 `HttpRequest` 或已配置的 curl 句柄时的错误。
#[derive(Error, Debug)]
pub enum RequestError {
    /// 参数数组的第一个元素缺失或不是字符串。
    #[error("Bad call to 'curl': missing url argument")]
    MissingUrl,

    /// 不支持的 HTTP 方法。
    #[error("Unknown HTTP method: {0}")]
    UnknownMethod(String),

    /// 请求描述不是合法的 JSON。
    #[error("请求描述不是合法的 JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// 配置 easy 句柄失败。
    #[error("Failed to configure curl handle: {0}")]
    Curl(#[from] curl::Error),
}

/// 异步 `fetch` 接口的顶层错误类型。
///
/// 它把提交失败、请求描述错误、传输失败以及"管理器在回调之前被销毁"
/// 统一为一个枚举，便于上层桥接代码把失败转换为拒绝回复。
#[derive(Error, Debug)]
pub enum FetchError {
    /// 提交到管理器时失败。
    #[error(transparent)]
    Manager(#[from] ManagerError),

    /// 请求描述无效。
    #[error(transparent)]
    Request(#[from] RequestError),

    /// 传输本身失败。
    #[error("CURL error: {0}")]
    Transfer(#[from] CurlError),

    /// 管理器在传输完成前被销毁，回调永远不会被调用。
    #[error("传输在完成前被放弃 (管理器已销毁)")]
    Abandoned,
}

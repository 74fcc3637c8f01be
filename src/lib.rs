// 声明模块 (Declare modules)
mod defaults;
mod error;
mod manager;
mod request;
pub mod transport; // 自定义传输层需要实现其中的 Transport trait
mod types;
pub mod wake;

// 公开导出需要被外部 (如 main 函数) 使用的类型
pub use defaults::{ManagerConfig, DEFAULT_POLL_INTERVAL, DEFAULT_WORKER_THREAD_NAME};
pub use error::{CurlError, FetchError, ManagerError, RequestError, WakeError};
pub use manager::TransferManager;
pub use request::{HttpRequest, HttpResponse, Method};
pub use transport::{CurlTransport, ResponseInfo, Transport};
pub use types::{Accumulator, Callback, Fetched, TransferId, TransferStatus};

// 重新导出 curl，调用者用它配置提交的句柄
pub use curl;

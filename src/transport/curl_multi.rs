//! 基于 libcurl multi 接口的 `Transport` 实现。
//!
//! 调用者提交的是已经配置好 URL、方法、头部、超时的 `curl::easy::Easy` 句柄，
//! 这里只负责把响应体接到累加器上，并在工作线程上驱动 multi 句柄。

use crate::error::CurlError;
use crate::transport::{Completion, Rejected, Transport};
use crate::types::{Accumulator, TransferId};
use crate::wake::WakeReceiver;
use curl::easy::Easy;
use curl::multi::{EasyHandle, Multi, WaitFd};
use std::collections::HashMap;
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::{error, trace, warn};

/// 已完成传输的摘要信息，在回调期间从 easy 句柄中读取。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseInfo {
    /// 最后一个响应的 HTTP 状态码；没有收到响应时为 0。
    pub response_code: u32,
    /// 跟随重定向后的最终 URL。
    pub effective_url: Option<String>,
}

/// libcurl multi 上下文。
///
/// 只在工作线程上创建和使用；drop 时先分离所有仍挂接的句柄，再销毁 multi 句柄，
/// 被放弃的传输的 easy 句柄随之释放。
pub struct CurlTransport {
    // 字段按声明顺序 drop：先释放挂接的句柄，再释放 multi
    attached: HashMap<TransferId, EasyHandle>,
    multi: Multi,
}

impl CurlTransport {
    /// 初始化 libcurl 全局状态并创建 multi 句柄。
    pub fn new() -> Self {
        curl::init();
        CurlTransport {
            attached: HashMap::new(),
            multi: Multi::new(),
        }
    }

    /// 从 multi 中分离一个已完成的句柄。
    ///
    /// libcurl 分离失败时原句柄已被销毁，回调拿到的是一个空白句柄和分离错误。
    fn detach(&mut self, id: TransferId, status: Result<(), CurlError>) -> Option<Completion<Self>> {
        let Some(easy_handle) = self.attached.remove(&id) else {
            warn!("(CurlTransport) 完成消息中的传输 {} 未挂接，忽略", id);
            return None;
        };
        match self.multi.remove(easy_handle) {
            Ok(handle) => Some(Completion { id, status, handle }),
            Err(e) => {
                error!("(CurlTransport) 从 multi 分离传输 {} 失败: {}", id, e);
                Some(Completion {
                    id,
                    status: Err(CurlError::Multi(e)),
                    handle: Easy::new(),
                })
            }
        }
    }
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for CurlTransport {
    type Handle = Easy;
    type Error = CurlError;
    type Summary = ResponseInfo;

    fn install_sink(handle: &mut Easy, sink: Accumulator) -> Result<(), CurlError> {
        handle.write_function(move |data| {
            sink.append(data);
            Ok(data.len())
        })?;
        Ok(())
    }

    fn summarize(handle: &mut Easy) -> ResponseInfo {
        ResponseInfo {
            response_code: handle.response_code().unwrap_or(0),
            effective_url: handle
                .effective_url()
                .ok()
                .flatten()
                .map(str::to_owned),
        }
    }

    fn attach(&mut self, id: TransferId, handle: Easy) -> Result<(), Rejected<Self>> {
        let mut easy_handle = self.multi.add(handle).map_err(|e| Rejected {
            // add 失败时 libcurl 已经销毁了原句柄
            handle: Easy::new(),
            error: CurlError::Multi(e),
        })?;
        if let Err(e) = easy_handle.set_token(id.as_token()) {
            let handle = self.multi.remove(easy_handle).unwrap_or_else(|_| Easy::new());
            return Err(Rejected {
                handle,
                error: CurlError::Transfer(e),
            });
        }
        trace!("(CurlTransport) 传输 {} 已挂接到 multi", id);
        self.attached.insert(id, easy_handle);
        Ok(())
    }

    fn perform(&mut self) -> Result<usize, CurlError> {
        Ok(self.multi.perform()? as usize)
    }

    fn wait(&mut self, wake: &WakeReceiver, timeout: Duration) -> Result<bool, CurlError> {
        let mut wake_fd = WaitFd::new();
        wake_fd.set_fd(wake.as_raw_fd());
        wake_fd.poll_on_read(true);
        let mut fds = [wake_fd];
        // multi 的等待不会因 easy 句柄自身的超时到期而返回，
        // 超时精度因此由 timeout 决定。
        self.multi.wait(&mut fds, timeout)?;
        Ok(fds[0].received_read())
    }

    fn take_completed(&mut self) -> Vec<Completion<Self>> {
        let mut finished = Vec::new();
        self.multi.messages(|message| {
            let Some(result) = message.result() else {
                return;
            };
            match message.token() {
                Ok(token) => finished.push((token, result)),
                Err(e) => error!("(CurlTransport) 读取完成消息的 token 失败: {}", e),
            }
        });

        finished
            .into_iter()
            .filter_map(|(token, result)| {
                let id = TransferId::from_token(token);
                if !self.attached.contains_key(&id) {
                    error!("(CurlTransport) {}", CurlError::UnknownToken(token));
                    return None;
                }
                self.detach(id, result.map_err(CurlError::from))
            })
            .collect()
    }

    fn active(&self) -> usize {
        self.attached.len()
    }
}

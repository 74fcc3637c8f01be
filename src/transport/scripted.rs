//! 测试用的脚本化传输层：每个传输在指定延迟后把预设的数据块写入累加器并完成。

use crate::transport::{Completion, Rejected, Transport};
use crate::types::{Accumulator, TransferId};
use crate::wake::WakeReceiver;
use bytes::Bytes;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum ScriptedError {
    #[error("脚本化失败: {0}")]
    Failed(String),
    #[error("拒绝挂接")]
    AttachRefused,
    #[error("拒绝安装数据回调")]
    SinkRefused,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 一个脚本化的传输句柄。
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransfer {
    pub chunks: Vec<Bytes>,
    pub delay: Duration,
    pub fail_with: Option<String>,
    pub refuse_attach: bool,
    pub refuse_sink: bool,
    sink: Option<Accumulator>,
}

impl ScriptedTransfer {
    /// 在 `delay` 之后以 `body` 成功完成的传输，响应体分两块写入。
    pub fn echo(body: impl Into<Bytes>, delay: Duration) -> Self {
        let body: Bytes = body.into();
        let mid = body.len() / 2;
        ScriptedTransfer {
            chunks: vec![body.slice(..mid), body.slice(mid..)],
            delay,
            ..Default::default()
        }
    }

    /// 挂接时被拒绝的传输。
    pub fn refusing_attach() -> Self {
        ScriptedTransfer {
            refuse_attach: true,
            ..Default::default()
        }
    }

    /// 安装数据回调时被拒绝的传输。
    pub fn refusing_sink() -> Self {
        ScriptedTransfer {
            refuse_sink: true,
            ..Default::default()
        }
    }

    /// 在 `delay` 之后失败的传输。
    pub fn failing(message: &str, delay: Duration) -> Self {
        ScriptedTransfer {
            delay,
            fail_with: Some(message.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    active: Vec<(TransferId, ScriptedTransfer, Instant)>,
    finished: Vec<Completion<Self>>,
}

impl Transport for ScriptedTransport {
    type Handle = ScriptedTransfer;
    type Error = ScriptedError;
    type Summary = usize;

    fn install_sink(handle: &mut ScriptedTransfer, sink: Accumulator) -> Result<(), ScriptedError> {
        if handle.refuse_sink {
            return Err(ScriptedError::SinkRefused);
        }
        handle.sink = Some(sink);
        Ok(())
    }

    fn summarize(handle: &mut ScriptedTransfer) -> usize {
        handle.chunks.len()
    }

    fn attach(&mut self, id: TransferId, handle: ScriptedTransfer) -> Result<(), Rejected<Self>> {
        if handle.refuse_attach {
            return Err(Rejected {
                handle,
                error: ScriptedError::AttachRefused,
            });
        }
        let deadline = Instant::now() + handle.delay;
        self.active.push((id, handle, deadline));
        Ok(())
    }

    fn perform(&mut self) -> Result<usize, ScriptedError> {
        let now = Instant::now();
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|(_, _, deadline)| *deadline <= now);
        self.active = pending;
        for (id, handle, _) in due {
            if let Some(sink) = &handle.sink {
                for chunk in &handle.chunks {
                    sink.append(chunk);
                }
            }
            let status = match &handle.fail_with {
                Some(message) => Err(ScriptedError::Failed(message.clone())),
                None => Ok(()),
            };
            self.finished.push(Completion { id, status, handle });
        }
        Ok(self.active.len())
    }

    fn wait(&mut self, wake: &WakeReceiver, timeout: Duration) -> Result<bool, ScriptedError> {
        let now = Instant::now();
        let until_next = self
            .active
            .iter()
            .map(|(_, _, deadline)| deadline.saturating_duration_since(now))
            .min()
            .unwrap_or(timeout);
        let timeout = if self.finished.is_empty() {
            timeout.min(until_next)
        } else {
            Duration::from_millis(1)
        };
        Ok(wake.wait(timeout)?)
    }

    fn take_completed(&mut self) -> Vec<Completion<Self>> {
        std::mem::take(&mut self.finished)
    }

    fn active(&self) -> usize {
        self.active.len()
    }
}

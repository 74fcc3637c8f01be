//! 唤醒通道：从任意线程打断工作线程的阻塞等待。
//!
//! 通道由一对相连的 `UnixStream` 组成，每个事件是一个单字节标签。
//! 发送端是非阻塞的：缓冲区满说明已经有信号在排队，这次写入直接被合并丢弃，
//! 不会阻塞生产者线程。工作循环自身的轮询超时保证了即使信号被合并也能继续推进。
//!
//! 接收端的文件描述符交给传输层的 `wait` 一起等待（见 `CurlTransport`），
//! 不能等待文件描述符的传输层可以使用 `WakeReceiver::wait`。

use crate::error::WakeError;
use socket2::SockRef;
use std::io::{self, Read, Write};
use std::mem::MaybeUninit;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::trace;

/// 一次最多读取的标签数量，多余的留到下一轮。
const DRAIN_BATCH: usize = 64;

/// 唤醒事件标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WakeEvent {
    /// 有新的传输被提交。
    NewWork = 1,
    /// 请求工作线程退出。
    Shutdown = 2,
}

impl TryFrom<u8> for WakeEvent {
    type Error = WakeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(WakeEvent::NewWork),
            2 => Ok(WakeEvent::Shutdown),
            other => Err(WakeError::UnknownTag(other)),
        }
    }
}

/// 创建一对相连的唤醒通道端点。
pub fn channel() -> io::Result<(WakeSender, WakeReceiver)> {
    let (tx, rx) = UnixStream::pair()?;
    tx.set_nonblocking(true)?;
    Ok((WakeSender { stream: tx }, WakeReceiver { stream: rx }))
}

/// 唤醒通道的发送端，可在多个线程间共享 (`&self` 即可发送)。
#[derive(Debug)]
pub struct WakeSender {
    stream: UnixStream,
}

impl WakeSender {
    /// 发送一个事件。
    ///
    /// 返回 `Ok(true)` 表示标签已写入，`Ok(false)` 表示缓冲区已满、信号被合并。
    /// 只在被信号中断时重试，从不因背压而阻塞或重试。
    pub fn signal(&self, event: WakeEvent) -> io::Result<bool> {
        let tag = [event as u8];
        loop {
            match (&self.stream).write(&tag) {
                Ok(_) => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!("(Wake) 缓冲区已满，{:?} 信号被合并", event);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
impl WakeSender {
    /// 写入任意标签字节。
    pub(crate) fn signal_raw(&self, tag: u8) -> io::Result<()> {
        (&self.stream).write_all(&[tag])
    }
}

/// 唤醒通道的接收端，只由工作线程持有。
#[derive(Debug)]
pub struct WakeReceiver {
    stream: UnixStream,
}

impl WakeReceiver {
    /// 阻塞等待通道变为可读，最多等待 `timeout`。
    ///
    /// 供无法把文件描述符交给底层多路复用器的传输层使用。
    /// 发送端关闭也视为可读（随后 `drain` 会报告 `Shutdown`）。
    pub fn wait(&self, timeout: Duration) -> io::Result<bool> {
        // set_read_timeout 不接受零时长
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;
        let mut peeked = [MaybeUninit::<u8>::uninit(); 1];
        // MSG_PEEK：只探测，不消费标签
        match SockRef::from(&self.stream).peek(&mut peeked) {
            Ok(_) => Ok(true),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// 读取并解码当前排队的事件。只应在通道已可读时调用。
    ///
    /// 发送端已关闭 (读到 EOF) 时返回 `[Shutdown]`。
    pub fn drain(&self) -> Result<Vec<WakeEvent>, WakeError> {
        let mut buf = [0u8; DRAIN_BATCH];
        let read = loop {
            match (&self.stream).read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WakeError::Io(e)),
            }
        };
        if read == 0 {
            return Ok(vec![WakeEvent::Shutdown]);
        }
        buf[..read].iter().map(|&tag| WakeEvent::try_from(tag)).collect()
    }
}

impl AsRawFd for WakeReceiver {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

//! 工作线程的事件循环。
//!
//! 唯一拥有多路复用上下文的线程：挂接新提交的传输、推进所有传输、
//! 等待 I/O 或唤醒事件、对每个完成的传输恰好调用一次回调。

use super::registry::{Pending, Registry, Submission};
use crate::error::WakeError;
use crate::transport::{Completion, Rejected, Transport};
use crate::types::{Callback, TransferId, TransferStatus};
use crate::wake::{WakeEvent, WakeReceiver};
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use std::{mem, process, thread};
use tracing::{debug, error, info, trace, warn};

/// 事件循环的状态。`Stopped` 是终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopState {
    Running,
    Stopped,
}

pub(crate) struct Worker<T: Transport> {
    transport: T,
    registry: Arc<RwLock<Registry>>,
    queue: Receiver<Submission<T>>,
    /// 已从队列取出、尚未回调的传输的完成回调。
    callbacks: HashMap<TransferId, Callback<T>>,
    wake: WakeReceiver,
    poll_interval: Duration,
}

impl<T: Transport> Worker<T> {
    pub fn new(
        transport: T,
        registry: Arc<RwLock<Registry>>,
        queue: Receiver<Submission<T>>,
        wake: WakeReceiver,
        poll_interval: Duration,
    ) -> Self {
        Worker {
            transport,
            registry,
            queue,
            callbacks: HashMap::new(),
            wake,
            poll_interval,
        }
    }

    /// 运行事件循环直到收到关闭信号。
    ///
    /// 返回前丢弃所有未完成传输的回调 (不会被调用)，多路复用上下文随 `self` 一起销毁。
    pub fn run(mut self) {
        info!("(Worker) 事件循环开始。轮询间隔: {:?}", self.poll_interval);
        while self.step() == LoopState::Running {}

        // 关闭标志之后不会再有新的提交入队
        let queued: Vec<Submission<T>> = self.queue.try_iter().collect();
        let callbacks = mem::take(&mut self.callbacks);
        let abandoned = self.write_registry().abandon_all();
        if abandoned > 0 {
            warn!(
                "(Worker) 事件循环停止，放弃 {} 个未完成的传输 (多路复用器中仍挂接 {} 个，排队 {} 个)",
                abandoned,
                self.transport.active(),
                queued.len()
            );
        }
        drop(queued);
        drop(callbacks);
        info!("(Worker) 事件循环结束，多路复用上下文即将销毁。");
    }

    /// 执行一轮事件循环。
    pub fn step(&mut self) -> LoopState {
        // 0. 挂接新提交的传输
        self.adopt_queued();

        // 1. 非阻塞地推进所有传输
        match self.transport.perform() {
            Ok(active) => trace!("(Worker) perform 完成，仍在进行的传输: {}", active),
            Err(e) => error!("(Worker) 推进传输失败: {}", e),
        }

        // 2. 等待 I/O 就绪或唤醒事件，最多一个轮询间隔
        let woken = match self.transport.wait(&self.wake, self.poll_interval) {
            Ok(woken) => woken,
            Err(e) => {
                error!("(Worker) 等待 I/O 失败: {}，退避一个轮询间隔", e);
                thread::sleep(self.poll_interval);
                false
            }
        };

        // 3. 处理唤醒事件
        if woken && self.drain_wake() == LoopState::Stopped {
            return LoopState::Stopped;
        }
        // 关闭信号可能被合并丢失，以注册表中的标志为准
        if self.read_registry().is_stopping() {
            debug!("(Worker) 注册表已标记关闭，停止事件循环");
            return LoopState::Stopped;
        }

        // 4. 分发已完成的传输
        for Completion { id, status, handle } in self.transport.take_completed() {
            self.dispatch(id, status, handle);
        }
        LoopState::Running
    }

    fn drain_wake(&mut self) -> LoopState {
        let events = match self.wake.drain() {
            Ok(events) => events,
            Err(WakeError::UnknownTag(tag)) => {
                error!("(Worker) 唤醒通道收到未知标签 {:#04x}，这是程序错误，中止进程", tag);
                process::abort();
            }
            Err(e) => {
                error!("(Worker) {}", e);
                return LoopState::Running;
            }
        };
        trace!("(Worker) 收到唤醒事件: {:?}", events);
        if events.contains(&WakeEvent::Shutdown) {
            info!("(Worker) 收到关闭信号");
            return LoopState::Stopped;
        }
        LoopState::Running
    }

    /// 把排队的句柄挂接到多路复用器；挂接失败的传输直接带着错误回调。
    ///
    /// 每轮最多取出进入本轮时已排队的数量，持续提交不会饿死事件循环。
    fn adopt_queued(&mut self) {
        let backlog = self.queue.len();
        let queued: Vec<Submission<T>> = self.queue.try_iter().take(backlog).collect();
        for Submission { id, pending, callback } in queued {
            self.callbacks.insert(id, callback);
            match pending {
                Pending::Ready(handle) => match self.transport.attach(id, handle) {
                    Ok(()) => debug!("(Worker) 传输 {} 已挂接", id),
                    Err(Rejected { handle, error }) => {
                        warn!("(Worker) 挂接传输 {} 失败: {}", id, error);
                        self.dispatch(id, Err(error), handle);
                    }
                },
                Pending::Rejected(handle, error) => {
                    warn!("(Worker) 传输 {} 在提交时已失败: {}", id, error);
                    self.dispatch(id, Err(error), handle);
                }
            }
        }
    }

    /// 对一个已完成的传输调用回调，随后释放句柄。
    ///
    /// 累加器在写锁下从注册表中移除，回调在锁外执行，慢回调不会阻塞 `submit`。
    fn dispatch(&mut self, id: TransferId, status: TransferStatus<T>, mut handle: T::Handle) {
        let accumulator = self.write_registry().remove(id);
        let callback = self.callbacks.remove(&id);
        let (Some(accumulator), Some(callback)) = (accumulator, callback) else {
            warn!("(Worker) 完成的传输 {} 不在注册表中，忽略", id);
            return;
        };
        let body = accumulator.take();
        trace!(
            "(Worker) 分发传输 {} (成功: {}, 响应体 {} 字节)",
            id,
            status.is_ok(),
            body.len()
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(status, &mut handle, body)));
        if outcome.is_err() {
            // 回调不能把 panic 带进多路复用器的内部状态
            error!("(Worker) 传输 {} 的回调发生 panic，中止进程", id);
            process::abort();
        }
        drop(handle);
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

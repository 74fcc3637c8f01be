//! `TransferManager` 的定义、生命周期管理和提交接口。
//!
//! 包含进程级单实例约束 (`InstanceGuard`)、共享实例访问器 (`shared`)、
//! 提交接口 (`submit` / `fetch`) 以及关闭逻辑。
//! 事件循环放在 `worker` 子模块，共享注册表放在 `registry` 子模块。

mod registry;
mod worker;

use crate::defaults::ManagerConfig;
use crate::error::{FetchError, ManagerError};
use crate::transport::{CurlTransport, Transport};
use crate::types::{Accumulator, Fetched, TransferId, TransferStatus};
use crate::wake::{self, WakeEvent, WakeSender};
use bytes::Bytes;
use crossbeam_channel::{SendError, Sender};
use registry::{Pending, Registry, Submission};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};
use worker::Worker;

// ==================================
// 进程级单实例约束
// ==================================

/// 是否已有一个存活的管理器。
static INSTANCE_ALIVE: AtomicBool = AtomicBool::new(false);

/// 持有期间占用进程级实例标志，drop 时释放。
///
/// 由工作线程持有，因此标志在工作线程退出 (多路复用上下文销毁) 之后才被清除。
struct InstanceGuard;

impl InstanceGuard {
    fn acquire() -> Result<Self, ManagerError> {
        INSTANCE_ALIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InstanceGuard)
            .map_err(|_| ManagerError::DuplicateInstance)
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        INSTANCE_ALIVE.store(false, Ordering::Release);
    }
}

/// `TransferManager::shared` 返回的共享实例。
static SHARED: Mutex<Option<Arc<TransferManager>>> = Mutex::new(None);

// ==================================
// TransferManager
// ==================================

/// 多路复用传输管理器。
///
/// 拥有一个多路复用上下文和一个专用工作线程。任意线程都可以并发调用 `submit`；
/// 每个被接受的传输恰好收到一次回调，除非管理器在它完成前被销毁。
///
/// 销毁 (`shutdown` 或 drop) 时仍在进行的传输被放弃：它们的回调被丢弃，永远不会被调用。
/// 需要投递保证的调用者应在销毁前等待所有传输完成。
pub struct TransferManager<T: Transport = CurlTransport> {
    registry: Arc<RwLock<Registry>>,
    /// 提交队列：句柄和回调经由它交给工作线程。
    queue: Sender<Submission<T>>,
    wake: WakeSender,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: ManagerConfig,
}

impl TransferManager<CurlTransport> {
    /// 创建一个基于 libcurl multi 的管理器。
    pub fn new(config: ManagerConfig) -> Result<Self, ManagerError> {
        Self::with_transport(config, CurlTransport::new)
    }

    /// 返回进程内共享的管理器，首次调用时以默认配置创建。
    ///
    /// 如果进程内已有一个不是通过本访问器创建的实例，返回 `DuplicateInstance`。
    pub fn shared() -> Result<Arc<Self>, ManagerError> {
        let mut slot = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(manager) = slot.as_ref() {
            return Ok(Arc::clone(manager));
        }
        let manager = Arc::new(Self::new(ManagerConfig::default())?);
        *slot = Some(Arc::clone(&manager));
        Ok(manager)
    }

    /// 释放共享访问器持有的引用。
    ///
    /// 最后一个克隆被 drop 时管理器随之销毁；之后再调用 `shared` 会创建新实例。
    pub fn release_shared() {
        let released = SHARED.lock().unwrap_or_else(PoisonError::into_inner).take();
        // 在锁外 drop，销毁过程可能要等待工作线程退出
        drop(released);
    }
}

impl<T: Transport> TransferManager<T> {
    /// 使用自定义传输层创建管理器。
    ///
    /// `factory` 在工作线程上执行，多路复用上下文从创建到销毁都只属于工作线程。
    pub fn with_transport<F>(config: ManagerConfig, factory: F) -> Result<Self, ManagerError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let guard = InstanceGuard::acquire()?;
        let (wake_tx, wake_rx) = wake::channel().map_err(ManagerError::ChannelCreationFailed)?;
        let registry = Arc::new(RwLock::new(Registry::new()));
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();

        let worker_registry = Arc::clone(&registry);
        let poll_interval = config.poll_interval;
        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                // 最先声明，最后 drop：传输层销毁之后才释放实例标志
                let _guard = guard;
                Worker::new(factory(), worker_registry, queue_rx, wake_rx, poll_interval).run();
            })
            .map_err(ManagerError::WorkerSpawnFailed)?;

        info!(
            "(Manager) 传输管理器已启动。工作线程: {}, 轮询间隔: {:?}",
            config.thread_name, config.poll_interval
        );
        Ok(TransferManager {
            registry,
            queue: queue_tx,
            wake: wake_tx,
            worker: Mutex::new(Some(worker)),
            config,
        })
    }

    /// 提交一个已配置好的传输。
    ///
    /// 管理器只负责把响应体接到累加器上，不修改句柄上的其他选项。
    /// 结果通过 `callback` 在工作线程上异步送达，每个被接受的传输恰好一次。
    /// 提交后句柄归管理器所有，回调返回后即被释放。
    ///
    /// 管理器正在关闭时返回 `ShuttingDown`，句柄和回调被直接丢弃。
    pub fn submit<F>(&self, mut handle: T::Handle, callback: F) -> Result<TransferId, ManagerError>
    where
        F: FnOnce(TransferStatus<T>, &mut T::Handle, Bytes) + Send + 'static,
    {
        let id = TransferId::next();
        let accumulator = Accumulator::new();
        let pending = match T::install_sink(&mut handle, accumulator.clone()) {
            Ok(()) => Pending::Ready(handle),
            Err(error) => Pending::Rejected(handle, error),
        };

        let submission = Submission {
            id,
            pending,
            callback: Box::new(callback),
        };

        let rejected = {
            let mut registry = self.write_registry();
            if registry.is_stopping() {
                Some(submission)
            } else {
                registry.insert(id, accumulator);
                // 在写锁内入队：关闭标志设置之前接受的提交都已在队列中
                match self.queue.send(submission) {
                    Ok(()) => None,
                    Err(SendError(submission)) => {
                        registry.remove(id);
                        Some(submission)
                    }
                }
            }
        };
        if let Some(submission) = rejected {
            warn!("(Manager) 管理器正在关闭，拒绝传输 {}", id);
            // 在锁外丢弃句柄和回调
            drop(submission);
            return Err(ManagerError::ShuttingDown);
        }

        // 锁释放后再唤醒工作线程
        if let Err(e) = self.wake.signal(WakeEvent::NewWork) {
            // 工作线程会在下一个轮询间隔内发现新工作
            warn!("(Manager) 发送唤醒信号失败: {}", e);
        }
        trace!("(Manager) 传输 {} 已提交", id);
        Ok(id)
    }

    /// `submit` 的异步版本：等待传输完成并返回状态、摘要信息和响应体。
    ///
    /// 管理器在传输完成前被销毁时返回 `FetchError::Abandoned`。
    pub async fn fetch(&self, handle: T::Handle) -> Result<Fetched<T>, FetchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let id = self.submit(handle, move |status, handle, body| {
            let summary = T::summarize(handle);
            if reply_tx.send((status, summary, body)).is_err() {
                trace!("(Manager) fetch 的等待方已放弃，丢弃结果");
            }
        })?;

        let (status, summary, body) = reply_rx.await.map_err(|_| FetchError::Abandoned)?;
        Ok(Fetched {
            id,
            status,
            summary,
            body,
        })
    }

    /// 尚未回调的传输数量。
    pub fn in_flight(&self) -> usize {
        self.read_registry().len()
    }

    /// 指定的传输是否仍在等待回调。
    pub fn is_pending(&self, id: TransferId) -> bool {
        self.read_registry().contains(id)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// 关闭管理器：拒绝新的提交，通知工作线程退出并等待其结束。
    ///
    /// 可重复调用。仍在进行的传输被放弃，回调不会被调用。
    /// 在工作线程内部 (例如回调中丢弃了最后一个引用) 调用时不等待，
    /// 工作线程在当前回调返回后自行退出。
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };

        let abandoned = {
            let mut registry = self.write_registry();
            registry.begin_stopping();
            registry.len()
        };
        info!("(Manager) 开始关闭，{} 个传输尚未完成", abandoned);
        if let Err(e) = self.wake.signal(WakeEvent::Shutdown) {
            // 注册表中的关闭标志保证工作线程在一个轮询间隔内退出
            warn!("(Manager) 发送关闭信号失败: {}", e);
        }

        if worker.thread().id() == thread::current().id() {
            debug!("(Manager) 在工作线程内关闭，不等待工作线程结束");
            return;
        }
        if worker.join().is_err() {
            error!("(Manager) 工作线程异常退出");
        }
        info!("(Manager) 传输管理器已关闭");
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Transport> Drop for TransferManager<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Transport> fmt::Debug for TransferManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferManager")
            .field("in_flight", &self.in_flight())
            .field("config", &self.config)
            .finish()
    }
}

use crate::transport::Transport;
use crate::types::{Accumulator, Callback, TransferId};
use std::collections::HashMap;

/// 已提交但尚未被工作线程挂接到多路复用器的句柄。
pub(crate) enum Pending<T: Transport> {
    /// 正常排队，等待挂接。
    Ready(T::Handle),
    /// 提交时安装数据回调失败；工作线程会直接带着错误回调。
    Rejected(T::Handle, T::Error),
}

/// 经由提交队列交给工作线程的一个传输：句柄和它唯一的完成回调。
///
/// 回调从这里开始只属于工作线程，不进入共享注册表。
pub(crate) struct Submission<T: Transport> {
    pub id: TransferId,
    pub pending: Pending<T>,
    pub callback: Callback<T>,
}

// ==================================
// Registry: TransferId -> 累加器
// ==================================
// 跨线程共享的可变状态，由外层 RwLock 保护：
// 读者 (查询) 互不阻塞；写者 (提交、完成清理、关闭) 独占。

pub(crate) struct Registry {
    /// 所有已提交且尚未回调的传输。
    requests: HashMap<TransferId, Accumulator>,
    /// 管理器是否已开始关闭。
    stopping: bool,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            requests: HashMap::new(),
            stopping: false,
        }
    }

    /// 登记一个新传输。调用者需先检查 `is_stopping`。
    pub fn insert(&mut self, id: TransferId, accumulator: Accumulator) {
        let previous = self.requests.insert(id, accumulator);
        debug_assert!(previous.is_none(), "传输 ID {} 被重复登记", id);
    }

    /// 移除一个已完成的传输，交还它的累加器。每个 ID 最多成功移除一次。
    pub fn remove(&mut self, id: TransferId) -> Option<Accumulator> {
        self.requests.remove(&id)
    }

    /// 关闭时清空所有未完成的传输，返回被放弃的数量。
    pub fn abandon_all(&mut self) -> usize {
        let abandoned = self.requests.len();
        self.requests.clear();
        abandoned
    }

    /// 标记管理器开始关闭，此后 `submit` 会被拒绝。
    pub fn begin_stopping(&mut self) {
        self.stopping = true;
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// 尚未回调的传输数量 (包括还在排队的)。
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn contains(&self, id: TransferId) -> bool {
        self.requests.contains_key(&id)
    }
}

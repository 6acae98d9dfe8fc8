use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 关闭信号：运行中的实验是执行完毕还是立即中止
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
    Immediate,
}

impl ShutdownSignal {
    pub fn is_immediate(self) -> bool {
        matches!(self, ShutdownSignal::Immediate)
    }
}

/// 优雅关闭管理器
///
/// 信号只广播一次；关闭后才订阅的接收器会立即收到同一信号。
#[derive(Clone)]
pub struct ShutdownManager {
    sender: Arc<RwLock<Option<broadcast::Sender<ShutdownSignal>>>>,
    fired: Arc<RwLock<Option<ShutdownSignal>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender: Arc::new(RwLock::new(Some(sender))),
            fired: Arc::new(RwLock::new(None)),
        }
    }

    /// 订阅关闭信号
    pub async fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        if let Some(tx) = self.sender.read().await.as_ref() {
            return tx.subscribe();
        }
        let signal = self.fired.read().await.unwrap_or(ShutdownSignal::Immediate);
        let (tx, rx) = broadcast::channel(1);
        let _ = tx.send(signal);
        rx
    }

    /// 触发关闭，重复触发无效
    pub async fn shutdown(&self, signal: ShutdownSignal) {
        let mut fired = self.fired.write().await;
        if fired.is_some() {
            debug!("关闭信号已经发送过，忽略 {:?}", signal);
            return;
        }
        *fired = Some(signal);

        if let Some(tx) = self.sender.write().await.take() {
            debug!("发送关闭信号给 {} 个订阅者", tx.receiver_count());
            let _ = tx.send(signal);
        }
        info!("关闭信号已发送: {:?}", signal);
    }

    pub async fn signal(&self) -> Option<ShutdownSignal> {
        *self.fired.read().await
    }

    pub async fn is_shutdown(&self) -> bool {
        self.fired.read().await.is_some()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

//! 预算守卫：滑动时间窗内的调用速率限制 + 粘滞熔断
//!
//! 每次 Planner 调用与每次计量操作调用前都经过 check_and_record；
//! 一旦熔断，只有显式 reset 能恢复，时间流逝不会自动清除。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::BudgetSection;

/// 超出调用速率预算（熔断已触发）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("budget exceeded: more than {limit} calls within {}s", .window.as_secs())]
pub struct BudgetExceeded {
    pub limit: usize,
    pub window: Duration,
}

/// 时间窗：调用时间戳 + 粘滞熔断标记
#[derive(Debug)]
struct RateWindow {
    timestamps: VecDeque<Instant>,
    tripped: bool,
    velocity_limit: usize,
    window: Duration,
}

impl RateWindow {
    fn trim(&mut self, now: Instant) {
        while let Some(front) = self.timestamps.front() {
            if now.saturating_duration_since(*front) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn exceeded(&self) -> BudgetExceeded {
        BudgetExceeded {
            limit: self.velocity_limit,
            window: self.window,
        }
    }
}

/// 预算守卫：所有调用点共享，内部互斥保证「修剪-计数-记录」原子
pub struct BudgetGuardian {
    window: Mutex<RateWindow>,
    halt_tx: broadcast::Sender<BudgetExceeded>,
}

impl BudgetGuardian {
    pub fn new(velocity_limit: usize, window_secs: u64) -> Self {
        let (halt_tx, _) = broadcast::channel(4);
        Self {
            window: Mutex::new(RateWindow {
                timestamps: VecDeque::new(),
                tripped: false,
                velocity_limit,
                window: Duration::from_secs(window_secs),
            }),
            halt_tx,
        }
    }

    pub fn from_config(cfg: &BudgetSection) -> Self {
        Self::new(cfg.velocity_limit, cfg.window_secs)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateWindow> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn check_and_record(&self) -> Result<(), BudgetExceeded> {
        self.check_and_record_at(Instant::now())
    }

    /// 以给定时刻执行检查（便于确定性调用）
    pub fn check_and_record_at(&self, now: Instant) -> Result<(), BudgetExceeded> {
        let mut w = self.lock();
        w.trim(now);
        if w.tripped {
            return Err(w.exceeded());
        }
        w.timestamps.push_back(now);
        if w.timestamps.len() > w.velocity_limit {
            w.tripped = true;
            let err = w.exceeded();
            drop(w);
            tracing::warn!(
                limit = err.limit,
                window_secs = err.window.as_secs(),
                "budget guardian tripped, requesting halt"
            );
            // 没有订阅者时忽略
            let _ = self.halt_tx.send(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// 订阅熔断触发时发出的停机请求
    pub fn subscribe(&self) -> broadcast::Receiver<BudgetExceeded> {
        self.halt_tx.subscribe()
    }

    pub fn is_tripped(&self) -> bool {
        self.lock().tripped
    }

    /// 当前时间窗内的调用数（不修剪）
    pub fn recorded_calls(&self) -> usize {
        self.lock().timestamps.len()
    }

    /// 管理操作：清除熔断与时间戳
    pub fn reset(&self) {
        let mut w = self.lock();
        w.tripped = false;
        w.timestamps.clear();
        tracing::info!("budget guardian reset");
    }

    /// 管理操作：调整速率上限与时间窗（不清除熔断）
    pub fn configure(&self, velocity_limit: usize, window_secs: u64) {
        let mut w = self.lock();
        w.velocity_limit = velocity_limit;
        w.window = Duration::from_secs(window_secs);
    }
}

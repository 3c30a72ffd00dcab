// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 单槽检测周期
//! 同一时刻最多一个周期在跑; 新节拍要么看到"忙"直接跳过, 要么接替已取消的旧周期

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{AudienceError, Result};

/// 取消令牌 (克隆后共享同一个标志)
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// 节拍结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 新周期已启动
    Started,
    /// 上一个周期仍在进行, 本节拍跳过
    Busy,
}

struct InFlight<T> {
    rx: Receiver<Result<T>>,
    cancel: CancelToken,
    started: Instant,
}

/// 单槽: 持有至多一个在途周期
pub struct CycleSlot<T> {
    in_flight: Option<InFlight<T>>,
    timeout: Duration,
}

impl<T: Send + 'static> CycleSlot<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            in_flight: None,
            timeout,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 在工作线程中启动周期, 槽被占用时返回 Busy
    pub fn start<F>(&mut self, work: F) -> TickOutcome
    where
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    {
        if self.in_flight.is_some() {
            return TickOutcome::Busy;
        }

        let (tx, rx) = bounded(1);
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        thread::spawn(move || {
            let result = if worker_cancel.is_cancelled() {
                Err(AudienceError::Cancelled)
            } else {
                work(&worker_cancel)
            };
            // 已被放弃的周期没有接收方
            let _ = tx.send(result);
        });

        self.in_flight = Some(InFlight {
            rx,
            cancel,
            started: Instant::now(),
        });
        TickOutcome::Started
    }

    /// 非阻塞检查: 完成或超时时清空槽并返回 (结果, 耗时)
    pub fn poll(&mut self) -> Option<(Result<T>, Duration)> {
        let flight = self.in_flight.as_ref()?;
        let elapsed = flight.started.elapsed();
        let result = match flight.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) if elapsed < self.timeout => return None,
            Err(TryRecvError::Empty) => {
                flight.cancel.cancel();
                Err(AudienceError::GatewayTimeout(self.timeout.as_millis() as u64))
            }
            Err(TryRecvError::Disconnected) => {
                Err(AudienceError::Gateway("detection worker exited".to_string()))
            }
        };
        self.in_flight = None;
        Some((result, elapsed))
    }

    /// 阻塞等待在途周期, 最长等到超时
    pub fn wait(&mut self) -> Option<(Result<T>, Duration)> {
        let flight = self.in_flight.take()?;
        let remaining = self.timeout.saturating_sub(flight.started.elapsed());
        let result = match flight.rx.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                flight.cancel.cancel();
                Err(AudienceError::GatewayTimeout(self.timeout.as_millis() as u64))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(AudienceError::Gateway("detection worker exited".to_string()))
            }
        };
        Some((result, flight.started.elapsed()))
    }

    /// 取消并丢弃在途周期
    pub fn cancel(&mut self) -> bool {
        match self.in_flight.take() {
            Some(flight) => {
                flight.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_while_in_flight() {
        let mut slot = CycleSlot::new(Duration::from_secs(5));
        let outcome = slot.start(|_| {
            thread::sleep(Duration::from_millis(100));
            Ok(1u32)
        });
        assert_eq!(outcome, TickOutcome::Started);
        assert_eq!(slot.start(|_| Ok(2u32)), TickOutcome::Busy);

        let (result, _) = slot.wait().unwrap();
        assert_eq!(result.unwrap(), 1);
        assert!(!slot.is_busy());
        assert_eq!(slot.start(|_| Ok(3u32)), TickOutcome::Started);
    }

    #[test]
    fn test_timeout_cancels_worker() {
        let observed = CancelToken::new();
        let seen = observed.clone();
        let mut slot = CycleSlot::new(Duration::from_millis(30));
        slot.start(move |cancel| {
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            seen.cancel();
            Err::<(), _>(AudienceError::Cancelled)
        });
        let (result, _) = slot.wait().unwrap();
        assert!(matches!(result, Err(AudienceError::GatewayTimeout(30))));

        // 工作线程观察到取消后退出
        let deadline = Instant::now() + Duration::from_secs(2);
        while !observed.is_cancelled() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(observed.is_cancelled());
    }

    #[test]
    fn test_poll_returns_none_until_done() {
        let mut slot = CycleSlot::new(Duration::from_secs(5));
        assert!(slot.poll().is_none());
        slot.start(|_| {
            thread::sleep(Duration::from_millis(50));
            Ok(())
        });
        assert!(slot.poll().is_none());
        thread::sleep(Duration::from_millis(150));
        let (result, elapsed) = slot.poll().unwrap();
        assert!(result.is_ok());
        assert!(elapsed >= Duration::from_millis(50));
    }

    #[test]
    fn test_cancel_frees_slot() {
        let mut slot: CycleSlot<()> = CycleSlot::new(Duration::from_secs(5));
        assert!(!slot.cancel());
        slot.start(|cancel| {
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            Err(AudienceError::Cancelled)
        });
        assert!(slot.cancel());
        assert!(!slot.is_busy());
    }
}

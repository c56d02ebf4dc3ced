// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 滑动窗口限流: 任意连续 60 秒内最多 N 条

use std::collections::VecDeque;

pub const RATE_WINDOW_SECONDS: f64 = 60.0;

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    capacity: usize,
    window: f64,
    sent: VecDeque<f64>,
}

impl SlidingWindowLimiter {
    pub fn per_minute(capacity: u32) -> Self {
        Self::new(capacity as usize, RATE_WINDOW_SECONDS)
    }

    pub fn new(capacity: usize, window: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            sent: VecDeque::with_capacity(capacity),
        }
    }

    /// 占用一个名额; 已满时返回还需等待的秒数
    pub fn try_acquire(&mut self, now: f64) -> Result<(), f64> {
        self.evict(now);
        if self.sent.len() < self.capacity {
            self.sent.push_back(now);
            return Ok(());
        }
        let oldest = self.sent.front().copied().unwrap_or(now);
        Err((oldest + self.window - now).max(0.0))
    }

    /// 当前窗口内已占用的名额
    pub fn in_window(&mut self, now: f64) -> usize {
        self.evict(now);
        self.sent.len()
    }

    fn evict(&mut self, now: f64) {
        while let Some(&t) = self.sent.front() {
            if now - t >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_capacity_in_any_window() {
        let mut limiter = SlidingWindowLimiter::per_minute(3);
        let mut granted = Vec::new();
        let mut now = 0.0;
        while now < 300.0 {
            if limiter.try_acquire(now).is_ok() {
                granted.push(now);
            }
            now += 1.5;
        }

        for (i, &start) in granted.iter().enumerate() {
            let in_window = granted[i..].iter().filter(|&&t| t - start < 60.0).count();
            assert!(in_window <= 3, "window starting at {start} has {in_window}");
        }
        assert!(granted.len() >= 15);
    }

    #[test]
    fn reports_wait_until_oldest_slot_frees() {
        let mut limiter = SlidingWindowLimiter::new(2, 60.0);
        assert!(limiter.try_acquire(0.0).is_ok());
        assert!(limiter.try_acquire(10.0).is_ok());
        assert_eq!(limiter.try_acquire(20.0), Err(40.0));
        assert!(limiter.try_acquire(60.0).is_ok());
        assert_eq!(limiter.in_window(60.0), 2);
    }
}

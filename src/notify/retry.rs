// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 重试策略 (指数退避 + 抖动) 与投递状态机
//!
//! Pending → Retrying(n) → Delivered | Failed

use std::time::Duration;

use rand::Rng;

use crate::config::NotifierConfig;
use crate::error::DeliveryError;

use super::Ack;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &NotifierConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier,
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// 第 `retry` 次重试前的等待 (retry 从 1 开始)
    pub fn backoff<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let base = (self.initial_backoff.as_secs_f64() * exp).min(self.max_backoff.as_secs_f64());
        let jitter = if self.jitter_ratio > 0.0 {
            rng.gen_range(-self.jitter_ratio..=self.jitter_ratio)
        } else {
            0.0
        };
        Duration::from_secs_f64((base * (1.0 + jitter)).max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&NotifierConfig::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    /// 已失败 n 次, 等待第 n 次重试
    Retrying(u32),
    Delivered,
    Failed,
}

/// 状态机推进结果
#[derive(Debug, PartialEq)]
pub enum Step {
    Wait(Duration),
    Done(Result<Ack, DeliveryError>),
}

/// 单条告警的投递过程
#[derive(Debug)]
pub struct Delivery<'a> {
    policy: &'a RetryPolicy,
    state: DeliveryState,
    attempts: u32,
}

impl<'a> Delivery<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            state: DeliveryState::Pending,
            attempts: 0,
        }
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// 记录一次发送结果
    pub fn record<R: Rng + ?Sized>(
        &mut self,
        outcome: Result<Option<i64>, DeliveryError>,
        rng: &mut R,
    ) -> Step {
        self.attempts += 1;
        match outcome {
            Ok(message_id) => {
                self.state = DeliveryState::Delivered;
                Step::Done(Ok(Ack {
                    message_id,
                    attempts: self.attempts,
                }))
            }
            Err(e) if e.is_transient() => {
                let retry = self.attempts;
                if retry > self.policy.max_retries {
                    self.state = DeliveryState::Failed;
                    Step::Done(Err(DeliveryError::RetriesExhausted {
                        attempts: self.attempts,
                        last: e.to_string(),
                    }))
                } else {
                    self.state = DeliveryState::Retrying(retry);
                    Step::Wait(self.policy.backoff(retry, rng))
                }
            }
            Err(e) => {
                self.state = DeliveryState::Failed;
                Step::Done(Err(e))
            }
        }
    }
}

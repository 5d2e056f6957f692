// 重试 / 补偿策略
//
// - 限流：原样重新入队，不消耗执行次数
// - 业务失败：默认只上报失败，由外部决定是否补偿；开启自动补偿后在次数内自动增加执行次数重新入队
// - 次数用尽：丢弃并上报失败

use crate::uploader::UploadTask;

/// 任务执行后的处理动作，由任务引擎统一执行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// 上传成功，无需处理
    Done,
    /// 原样重新入队（执行次数不变）
    RequeueUnchanged,
    /// 执行次数加一后重新入队
    RequeueWithIncrement,
    /// 丢弃
    Drop,
}

/// 失败后的决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureDecision {
    pub action: RetryAction,
    /// 是否需要上报失败
    pub report_failure: bool,
}

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大执行次数
    pub max_retries: u32,
    /// 是否自动补偿
    pub auto_compensate: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, auto_compensate: bool) -> Self {
        Self {
            max_retries,
            auto_compensate,
        }
    }

    /// 任务是否还能补偿
    pub fn can_compensate(&self, task: &UploadTask) -> bool {
        task.attempt < self.max_retries
    }

    /// 任务是否允许进入队列
    pub fn accepts(&self, task: &UploadTask) -> bool {
        task.attempt <= self.max_retries
    }

    /// 限流
    pub fn on_rate_limited(&self) -> RetryAction {
        RetryAction::RequeueUnchanged
    }

    /// 业务失败或传输失败
    pub fn on_failure(&self, task: &UploadTask) -> FailureDecision {
        if self.auto_compensate && self.can_compensate(task) {
            FailureDecision {
                action: RetryAction::RequeueWithIncrement,
                report_failure: false,
            }
        } else {
            FailureDecision {
                action: RetryAction::Drop,
                report_failure: true,
            }
        }
    }
}

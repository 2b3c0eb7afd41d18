//! Admission decisions and how they render at the HTTP boundary.

use serde::{Deserialize, Serialize};

use super::bucket::TimeWindow;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Status code for a rejected request.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

pub const RATE_LIMITED_CODE: &str = "rate_limited";
pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please retry after the reset time.";

/// The answer to one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the reported window resets
    pub reset_epoch_seconds: u64,
    /// Only set on rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl Decision {
    /// An admitted request.
    pub fn allow(limit: u32, remaining: u32, window: TimeWindow, unix_now: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_epoch_seconds: unix_now + window.as_secs(),
            retry_after_seconds: None,
        }
    }

    /// A request rejected by `window`; retry after one full window.
    pub fn deny(limit: u32, window: TimeWindow, unix_now: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_epoch_seconds: unix_now + window.as_secs(),
            retry_after_seconds: Some(window.as_secs()),
        }
    }

    /// HTTP status for a rejection, `None` when the request proceeds.
    pub fn rejection_status(&self) -> Option<u16> {
        (!self.allowed).then_some(STATUS_TOO_MANY_REQUESTS)
    }

    /// Response headers every response carries, plus `Retry-After` on
    /// rejection.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_epoch_seconds.to_string()),
        ];
        if let Some(retry_after) = self.retry_after_seconds {
            headers.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
        headers
    }

    /// JSON body for a rejected request.
    pub fn error_body(&self) -> Option<ErrorBody> {
        (!self.allowed).then(ErrorBody::rate_limited)
    }
}

/// `{"error":{"code":..,"message":..}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn rate_limited() -> Self {
        Self {
            error: ErrorDetail {
                code: RATE_LIMITED_CODE.to_string(),
                message: RATE_LIMITED_MESSAGE.to_string(),
            },
        }
    }
}

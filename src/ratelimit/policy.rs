//! Policy resolution: which limits apply to a request.

use serde::{Deserialize, Serialize};

use super::bucket::TimeWindow;
use crate::config::LimitsConfig;

/// Tenant-specific capacities loaded from the override store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideLimits {
    pub per_minute: u32,
    pub per_hour: u32,
}

/// The limit set a request is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Default minute and hour capacities
    Standard,
    /// Smaller minute-only capacity for the authentication endpoint
    AuthEndpoint,
    /// Standard windows with capacities from a tenant override
    TenantOverride(OverrideLimits),
}

impl Policy {
    /// Pick the policy for a request.
    ///
    /// An override wins unless the request targets the auth endpoint, which
    /// in turn wins over the standard limits.
    pub fn resolve(overrides: Option<OverrideLimits>, is_auth_endpoint: bool) -> Self {
        match (overrides, is_auth_endpoint) {
            (_, true) => Policy::AuthEndpoint,
            (Some(limits), false) => Policy::TenantOverride(limits),
            (None, false) => Policy::Standard,
        }
    }

    /// Turn the policy into concrete capacities and refill rates.
    pub fn limits(&self, defaults: &LimitsConfig) -> ResolvedLimits {
        match self {
            Policy::Standard => ResolvedLimits {
                minute: WindowLimit::new(defaults.requests_per_minute, TimeWindow::Minute),
                hour: Some(WindowLimit::new(defaults.requests_per_hour, TimeWindow::Hour)),
            },
            Policy::AuthEndpoint => ResolvedLimits {
                minute: WindowLimit::new(defaults.auth_requests_per_minute, TimeWindow::Minute),
                hour: None,
            },
            Policy::TenantOverride(limits) => ResolvedLimits {
                minute: WindowLimit::new(limits.per_minute, TimeWindow::Minute),
                hour: Some(WindowLimit::new(limits.per_hour, TimeWindow::Hour)),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Policy::Standard => "standard",
            Policy::AuthEndpoint => "auth_endpoint",
            Policy::TenantOverride(_) => "tenant_override",
        }
    }
}

/// Capacity and refill rate for one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowLimit {
    pub capacity: u32,
    /// Tokens per second
    pub refill_rate: f64,
    pub window: TimeWindow,
}

impl WindowLimit {
    pub fn new(capacity: u32, window: TimeWindow) -> Self {
        Self {
            capacity,
            refill_rate: window.refill_rate(capacity),
            window,
        }
    }
}

/// A policy resolved into per-window limits. `hour` is `None` when the
/// hour window is not evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedLimits {
    pub minute: WindowLimit,
    pub hour: Option<WindowLimit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const OVERRIDE: OverrideLimits = OverrideLimits {
        per_minute: 500,
        per_hour: 5000,
    };

    #[test]
    fn test_resolution_order() {
        assert_eq!(Policy::resolve(None, false), Policy::Standard);
        assert_eq!(Policy::resolve(None, true), Policy::AuthEndpoint);
        assert_eq!(
            Policy::resolve(Some(OVERRIDE), false),
            Policy::TenantOverride(OVERRIDE)
        );
        assert_eq!(Policy::resolve(Some(OVERRIDE), true), Policy::AuthEndpoint);
    }

    #[test]
    fn test_standard_limits() {
        let limits = Policy::Standard.limits(&LimitsConfig::default());
        assert_eq!(limits.minute.capacity, 100);
        assert_eq!(limits.hour.map(|h| h.capacity), Some(1000));
        assert!((limits.minute.refill_rate - 100.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_auth_endpoint_has_no_hour_window() {
        let limits = Policy::AuthEndpoint.limits(&LimitsConfig::default());
        assert_eq!(limits.minute.capacity, 10);
        assert!(limits.hour.is_none());
    }

    #[test]
    fn test_override_substitutes_capacities() {
        let limits = Policy::TenantOverride(OVERRIDE).limits(&LimitsConfig::default());
        assert_eq!(limits.minute.capacity, 500);
        assert_eq!(limits.hour.unwrap().capacity, 5000);
        assert_eq!(limits.hour.unwrap().window, TimeWindow::Hour);
    }
}

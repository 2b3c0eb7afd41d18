//! Rate limit key handling.

use std::fmt;

/// Identity of one quota: a credential within a tenant.
///
/// Two keys never share state, including two credentials of the same tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimitKey {
    pub tenant_id: String,
    pub credential_id: String,
}

impl RateLimitKey {
    pub fn new(tenant_id: impl Into<String>, credential_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            credential_id: credential_id.into(),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant_id
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.credential_id)
    }
}

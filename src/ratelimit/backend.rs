//! Admission-control trait for abstracting the in-process registry from
//! backends that share state across processes.

use async_trait::async_trait;

use super::decision::Decision;

/// Trait for admission-control implementations.
///
/// The routing layer talks to this trait rather than to [`Registry`]
/// directly, so a backend keeping bucket state in a shared store can take
/// its place without touching callers.
///
/// [`Registry`]: super::Registry
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    /// Decide whether a request for `(tenant_id, credential_id)` is admitted.
    async fn check_rate_limit(
        &self,
        tenant_id: &str,
        credential_id: &str,
        is_auth_endpoint: bool,
    ) -> Decision;

    /// Forget all state for a key. Returns `true` if the key had state.
    async fn clear_key(&self, tenant_id: &str, credential_id: &str) -> bool;
}

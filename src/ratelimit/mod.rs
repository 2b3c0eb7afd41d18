//! Admission control: token buckets, policies, override caching and the
//! per-key registry.

mod backend;
mod bucket;
mod clock;
mod decision;
mod evictor;
mod key;
mod overrides;
mod policy;
mod registry;
mod store;

pub use backend::AdmissionControl;
pub use bucket::{Consume, TimeWindow, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{
    Decision, ErrorBody, ErrorDetail, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER, STATUS_TOO_MANY_REQUESTS,
};
pub use evictor::{Evictor, EvictorHandle};
pub use key::RateLimitKey;
pub use overrides::{CachedOverride, FetchOutcome, OverrideCache};
pub use policy::{OverrideLimits, Policy, ResolvedLimits, WindowLimit};
pub use registry::{EntrySnapshot, Registry, SweepStats};
pub use store::{
    FileOverrideStore, InMemoryOverrideStore, NoOverrides, OverrideFile, OverrideRecord,
    OverrideStore, PER_HOUR_RANGE, PER_MINUTE_RANGE,
};

use crate::ids::ThreadId;
use crate::stream::UsageSummary;

/// Fire-and-forget usage metering port. Implementations log failures and
/// never surface them to the run loop.
pub trait UsageRecorder: Send + Sync {
    fn record(&self, thread_id: &ThreadId, usage: UsageSummary);
}

/// Discards all usage records.
pub struct NoopUsageRecorder;

impl UsageRecorder for NoopUsageRecorder {
    fn record(&self, _thread_id: &ThreadId, _usage: UsageSummary) {}
}

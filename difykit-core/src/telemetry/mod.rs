//! Telemetry hooks for API calls and event streams.
//! By default, nothing is emitted unless a sink is installed via `set_telemetry_sink`.

pub mod types;
#[cfg(test)]
pub mod test_span;

pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Implement this to receive telemetry records.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - Methods **may** be called from any thread; implementations should avoid panicking.
/// - Keep overhead minimal; `record_call` runs once per HTTP request.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record_call(&self, trace: CallTrace);

    /// One record per finished streaming call; default no-op.
    fn record_stream(&self, _trace: StreamTrace) {}
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// In tests, gate emission to only the calling test thread to avoid cross-test interference.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install a global telemetry sink. Returns `false` if a sink is already installed.
///
/// This is a write-once global for the process lifetime (backed by `OnceCell`).
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

#[inline]
fn capture_enabled() -> bool {
    #[cfg(test)]
    {
        TEST_CAPTURE.with(|c| c.get())
    }
    #[cfg(not(test))]
    {
        true
    }
}

#[inline]
pub(crate) fn emit_call(trace: CallTrace) {
    if !capture_enabled() {
        return;
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record_call(trace);
    }
}

#[inline]
pub(crate) fn emit_stream(trace: StreamTrace) {
    if !capture_enabled() {
        return;
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record_stream(trace);
    }
}

#[cfg(test)]
/// Test-only helper: enable or disable capture for the current test thread.
///
/// `#[tokio::test]` uses a current-thread runtime, so enabling capture at the
/// top of a test covers everything the test awaits.
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}

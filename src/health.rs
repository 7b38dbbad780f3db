//! Stall and failure supervision for a running capturer.
//!
//! `CaptureHealth` is the pure policy; `CaptureSession` drives a backend with
//! it, restarting the backend when frames stop arriving.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::capturer::{Callback, Capturer, DesktopCapturer};
use crate::error::CaptureResult;
use crate::frame::BasicFrame;
use crate::options::CaptureOptions;

/// What the driver should do after a capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    Continue,
    /// Tear the backend down and start it again.
    Reinitialize,
    /// The failure needs caller action, stop polling.
    Stop,
}

/// Tracks successes and failure streaks for one backend.
///
/// A zero `stall_timeout` or `failure_threshold` disables that trigger.
#[derive(Debug, Clone)]
pub struct CaptureHealth {
    stall_timeout: Duration,
    failure_threshold: u32,
    last_success: Instant,
    consecutive_failures: u32,
}

impl CaptureHealth {
    pub fn new(options: &CaptureOptions, now: Instant) -> Self {
        Self {
            stall_timeout: options.stall_timeout(),
            failure_threshold: options.failure_threshold,
            last_success: now,
            consecutive_failures: 0,
        }
    }

    pub fn record(&mut self, result: CaptureResult, now: Instant) -> HealthAction {
        match result {
            CaptureResult::Success => {
                self.last_success = now;
                self.consecutive_failures = 0;
                HealthAction::Continue
            }
            CaptureResult::ErrorPermanent => HealthAction::Stop,
            CaptureResult::ErrorTemporary => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.failure_threshold > 0 && self.consecutive_failures >= self.failure_threshold {
                    HealthAction::Reinitialize
                } else {
                    self.check_stall(now)
                }
            }
        }
    }

    /// Stall check for polls that produced no result at all.
    pub fn check_stall(&self, now: Instant) -> HealthAction {
        if self.stall_timeout.is_zero() {
            return HealthAction::Continue;
        }
        if now.saturating_duration_since(self.last_success) >= self.stall_timeout {
            HealthAction::Reinitialize
        } else {
            HealthAction::Continue
        }
    }

    /// Starts a fresh observation window, used after a reinitialization.
    pub fn reset(&mut self, now: Instant) {
        self.last_success = now;
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn since_last_success(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_success)
    }
}

// ============================================================================
// Session
// ============================================================================

/// Minimum spacing between reinitialization warnings.
const REINIT_LOG_INTERVAL: Duration = Duration::from_secs(10);

struct Relay {
    sink: Box<dyn Callback>,
    last_result: Option<CaptureResult>,
}

/// Callback handed to the backend: remembers the result, then forwards.
struct RelayCallback(Arc<Mutex<Relay>>);

impl Callback for RelayCallback {
    fn on_capture_result(&mut self, result: CaptureResult, frame: Option<BasicFrame>) {
        if let Ok(mut relay) = self.0.lock() {
            relay.last_result = Some(result);
            relay.sink.on_capture_result(result, frame);
        }
    }
}

/// Owns a backend, forwards its frames and applies the health policy.
pub struct CaptureSession<C: DesktopCapturer = Capturer> {
    capturer: C,
    health: CaptureHealth,
    relay: Arc<Mutex<Relay>>,
    running: bool,
    reinitializations: u32,
    last_reinit_log: Option<Instant>,
    suppressed_logs: u32,
}

impl<C: DesktopCapturer> CaptureSession<C> {
    pub fn new(capturer: C, options: &CaptureOptions, sink: Box<dyn Callback>) -> Self {
        Self {
            capturer,
            health: CaptureHealth::new(options, Instant::now()),
            relay: Arc::new(Mutex::new(Relay {
                sink,
                last_result: None,
            })),
            running: false,
            reinitializations: 0,
            last_reinit_log: None,
            suppressed_logs: 0,
        }
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    pub fn start_at(&mut self, now: Instant) {
        self.capturer
            .start(Box::new(RelayCallback(Arc::clone(&self.relay))));
        self.health.reset(now);
        self.running = true;
        log::info!(backend = self.capturer.backend().name(); "Capture session started");
    }

    pub fn stop(&mut self) {
        if self.running {
            self.capturer.stop();
            self.running = false;
            log::info!(backend = self.capturer.backend().name(); "Capture session stopped");
        }
    }

    /// Requests one frame and applies the policy to its outcome.
    pub fn poll(&mut self) -> HealthAction {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> HealthAction {
        if !self.running {
            return HealthAction::Stop;
        }

        if let Ok(mut relay) = self.relay.lock() {
            relay.last_result = None;
        }
        self.capturer.capture_frame();
        let result = self.relay.lock().ok().and_then(|relay| relay.last_result);

        let action = match result {
            Some(result) => self.health.record(result, now),
            None => self.health.check_stall(now),
        };

        match action {
            HealthAction::Continue => {}
            HealthAction::Reinitialize => {
                let failures = self.health.consecutive_failures();
                let stalled_ms = self.health.since_last_success(now).as_millis() as u64;
                if self.take_reinit_log_slot(now) {
                    log::warn!(
                        backend = self.capturer.backend().name(),
                        failures = failures,
                        stalled_ms = stalled_ms,
                        suppressed = self.suppressed_logs;
                        "Capture stalled, reinitializing backend"
                    );
                    self.suppressed_logs = 0;
                } else {
                    log::debug!(failures = failures, stalled_ms = stalled_ms; "Reinitializing backend");
                }
                self.capturer.stop();
                self.start_at(now);
                self.reinitializations = self.reinitializations.saturating_add(1);
            }
            HealthAction::Stop => {
                let reason = self
                    .capturer
                    .last_error()
                    .map(|err| err.to_string())
                    .unwrap_or_default();
                log::error!(
                    backend = self.capturer.backend().name(),
                    reason = reason.as_str();
                    "Capture failed permanently, stopping session"
                );
                self.capturer.stop();
                self.running = false;
            }
        }
        action
    }

    /// True at most once per `REINIT_LOG_INTERVAL`; counts the calls it refuses.
    fn take_reinit_log_slot(&mut self, now: Instant) -> bool {
        let due = self
            .last_reinit_log
            .map_or(true, |last| now.saturating_duration_since(last) >= REINIT_LOG_INTERVAL);
        if due {
            self.last_reinit_log = Some(now);
        } else {
            self.suppressed_logs = self.suppressed_logs.saturating_add(1);
        }
        due
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn reinitializations(&self) -> u32 {
        self.reinitializations
    }

    pub fn capturer(&self) -> &C {
        &self.capturer
    }

    pub fn capturer_mut(&mut self) -> &mut C {
        &mut self.capturer
    }

    pub fn into_inner(mut self) -> C {
        self.stop();
        self.capturer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capturer::{CaptureBackend, Source, SourceId};
    use crate::error::CaptureError;
    use crate::geometry::Size;
    use std::collections::VecDeque;

    fn options(threshold: u32, stall_ms: u64) -> CaptureOptions {
        CaptureOptions {
            failure_threshold: threshold,
            stall_timeout_ms: stall_ms,
            ..CaptureOptions::default()
        }
    }

    #[test]
    fn test_threshold_triggers_reinitialize() {
        let start = Instant::now();
        let mut health = CaptureHealth::new(&options(3, 60_000), start);
        assert_eq!(health.record(CaptureResult::ErrorTemporary, start), HealthAction::Continue);
        assert_eq!(health.record(CaptureResult::ErrorTemporary, start), HealthAction::Continue);
        assert_eq!(health.record(CaptureResult::ErrorTemporary, start), HealthAction::Reinitialize);
    }

    #[test]
    fn test_success_resets_streak() {
        let start = Instant::now();
        let mut health = CaptureHealth::new(&options(2, 60_000), start);
        health.record(CaptureResult::ErrorTemporary, start);
        assert_eq!(health.record(CaptureResult::Success, start), HealthAction::Continue);
        assert_eq!(health.consecutive_failures(), 0);
        assert_eq!(health.record(CaptureResult::ErrorTemporary, start), HealthAction::Continue);
    }

    #[test]
    fn test_stall_triggers_reinitialize() {
        let start = Instant::now();
        let mut health = CaptureHealth::new(&options(0, 5000), start);
        let later = start + Duration::from_millis(4999);
        assert_eq!(health.record(CaptureResult::ErrorTemporary, later), HealthAction::Continue);
        let stalled = start + Duration::from_millis(5000);
        assert_eq!(health.check_stall(stalled), HealthAction::Reinitialize);
        assert_eq!(health.record(CaptureResult::ErrorTemporary, stalled), HealthAction::Reinitialize);

        health.reset(stalled);
        assert_eq!(health.check_stall(stalled + Duration::from_millis(10)), HealthAction::Continue);
    }

    #[test]
    fn test_zero_stall_timeout_disables_stall_check() {
        let start = Instant::now();
        let health = CaptureHealth::new(&options(3, 0), start);
        assert_eq!(health.check_stall(start + Duration::from_secs(3600)), HealthAction::Continue);
    }

    #[test]
    fn test_permanent_stops() {
        let start = Instant::now();
        let mut health = CaptureHealth::new(&CaptureOptions::default(), start);
        assert_eq!(health.record(CaptureResult::ErrorPermanent, start), HealthAction::Stop);
    }

    /// Backend that replays a fixed list of outcomes.
    struct ScriptedCapturer {
        script: VecDeque<CaptureResult>,
        callback: Option<Box<dyn Callback>>,
        starts: u32,
        stops: u32,
    }

    impl ScriptedCapturer {
        fn new(script: &[CaptureResult]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                callback: None,
                starts: 0,
                stops: 0,
            }
        }
    }

    impl DesktopCapturer for ScriptedCapturer {
        fn start(&mut self, callback: Box<dyn Callback>) {
            self.callback = Some(callback);
            self.starts += 1;
        }

        fn stop(&mut self) {
            self.callback = None;
            self.stops += 1;
        }

        fn capture_frame(&mut self) {
            let Some(callback) = self.callback.as_mut() else {
                return;
            };
            let result = self.script.pop_front().unwrap_or(CaptureResult::Success);
            let frame = result
                .is_success()
                .then(|| BasicFrame::new(Size::new(2, 2)));
            callback.on_capture_result(result, frame);
        }

        fn get_source_list(&mut self, _sources: &mut Vec<Source>) -> bool {
            true
        }

        fn select_source(&mut self, _id: SourceId) -> bool {
            true
        }

        fn is_source_valid(&mut self, _id: SourceId) -> bool {
            true
        }

        fn selected_source(&self) -> SourceId {
            SourceId::NONE
        }

        fn backend(&self) -> CaptureBackend {
            CaptureBackend::Unknown
        }

        fn last_error(&self) -> Option<CaptureError> {
            None
        }
    }

    fn counting_sink() -> (Box<dyn Callback>, Arc<Mutex<Vec<CaptureResult>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = move |result: CaptureResult, _frame: Option<BasicFrame>| {
            sink.lock().unwrap().push(result);
        };
        (Box::new(callback), seen)
    }

    #[test]
    fn test_session_reinitializes_after_failure_streak() {
        use CaptureResult::*;
        let capturer = ScriptedCapturer::new(&[ErrorTemporary, ErrorTemporary, Success]);
        let (sink, seen) = counting_sink();
        let mut session = CaptureSession::new(capturer, &options(2, 60_000), sink);

        let now = Instant::now();
        session.start_at(now);
        assert_eq!(session.poll_at(now), HealthAction::Continue);
        assert_eq!(session.poll_at(now), HealthAction::Reinitialize);
        assert_eq!(session.poll_at(now), HealthAction::Continue);

        assert_eq!(session.reinitializations(), 1);
        assert_eq!(session.capturer().starts, 2);
        assert_eq!(session.capturer().stops, 1);
        assert!(session.is_running());
        // Results keep flowing to the sink across the restart.
        assert_eq!(*seen.lock().unwrap(), vec![ErrorTemporary, ErrorTemporary, Success]);
    }

    #[test]
    fn test_reinitialize_warnings_are_rate_limited() {
        let (sink, _seen) = counting_sink();
        let mut session = CaptureSession::new(ScriptedCapturer::new(&[]), &options(1, 60_000), sink);
        let now = Instant::now();

        assert!(session.take_reinit_log_slot(now));
        assert!(!session.take_reinit_log_slot(now + Duration::from_secs(1)));
        assert!(!session.take_reinit_log_slot(now + Duration::from_secs(9)));
        assert_eq!(session.suppressed_logs, 2);
        assert!(session.take_reinit_log_slot(now + REINIT_LOG_INTERVAL));
    }

    #[test]
    fn test_session_stops_on_permanent_error() {
        let capturer = ScriptedCapturer::new(&[CaptureResult::ErrorPermanent]);
        let (sink, seen) = counting_sink();
        let mut session = CaptureSession::new(capturer, &CaptureOptions::default(), sink);

        session.start();
        assert_eq!(session.poll(), HealthAction::Stop);
        assert!(!session.is_running());
        // Stopped sessions do not touch the backend again.
        assert_eq!(session.poll(), HealthAction::Stop);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(session.capturer().stops, 1);
    }

    #[test]
    fn test_session_detects_silent_stall() {
        let capturer = ScriptedCapturer::new(&[]);
        let (sink, _seen) = counting_sink();
        let mut session = CaptureSession::new(capturer, &options(0, 100), sink);

        let now = Instant::now();
        session.start_at(now);
        // A backend that never answers: drop its callback behind the session's back.
        session.capturer_mut().callback = None;
        assert_eq!(session.poll_at(now + Duration::from_millis(50)), HealthAction::Continue);
        assert_eq!(
            session.poll_at(now + Duration::from_millis(150)),
            HealthAction::Reinitialize
        );
    }

    #[test]
    fn test_into_inner_stops_backend() {
        let capturer = ScriptedCapturer::new(&[]);
        let (sink, _seen) = counting_sink();
        let mut session = CaptureSession::new(capturer, &CaptureOptions::default(), sink);
        session.start();
        let capturer = session.into_inner();
        assert_eq!(capturer.stops, 1);
        assert!(capturer.callback.is_none());
    }
}

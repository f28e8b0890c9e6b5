use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::consts::PROGRESS_TOTAL;

use super::types::{NoOpReporter, ProgressReporter, RegistrationStage};

/// Shared cooperative cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything a stage needs to report on itself: the cancel flag, the
/// status sink the controller polls, and an optional external reporter.
///
/// Stage progress is only forwarded inside a span set with
/// [`in_span`](Self::in_span). It is rescaled to `0..PROGRESS_TOTAL` for the
/// whole job and never moves backwards.
#[derive(Clone)]
pub struct JobContext {
    pub cancel: CancelToken,
    pub reporter: Arc<dyn ProgressReporter>,
    status: Arc<RwLock<String>>,
    span: Option<Range<usize>>,
    reported: Arc<AtomicUsize>,
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new(CancelToken::new(), Arc::new(NoOpReporter))
    }
}

impl JobContext {
    pub fn new(cancel: CancelToken, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            cancel,
            reporter,
            status: Arc::new(RwLock::new(String::new())),
            span: None,
            reported: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Context whose status writes land in `status`.
    pub(crate) fn with_status(
        cancel: CancelToken,
        reporter: Arc<dyn ProgressReporter>,
        status: Arc<RwLock<String>>,
    ) -> Self {
        Self {
            cancel,
            reporter,
            status,
            span: None,
            reported: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A context whose stage progress fills `span` of the job total.
    pub fn in_span(&self, span: Range<usize>) -> Self {
        Self {
            span: Some(span.start.min(PROGRESS_TOTAL)..span.end.min(PROGRESS_TOTAL)),
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.reporter.is_cancelled()
    }

    pub fn set_stage(&self, stage: RegistrationStage) {
        self.set_status(stage.status());
    }

    pub fn set_status(&self, text: &str) {
        if let Ok(mut status) = self.status.write() {
            status.clear();
            status.push_str(text);
        }
        self.reporter.set_status_text(text);
    }

    pub fn status(&self) -> String {
        self.status.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Forward raw progress to the reporter.
    pub fn report_progress(&self, current: usize, total: usize) {
        self.reporter.report_progress(current, total);
    }

    /// `current` of `total` steps of the running stage are done. Reported
    /// as a position within the job; a no-op outside a span.
    pub fn report_stage_progress(&self, current: usize, total: usize) {
        let Some(span) = &self.span else {
            return;
        };
        if total == 0 {
            return;
        }
        let width = span.end.saturating_sub(span.start);
        let position = span.start + width * current.min(total) / total;
        if self.reported.fetch_max(position, Ordering::AcqRel) < position {
            self.reporter.report_progress(position, PROGRESS_TOTAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        texts: Mutex<Vec<String>>,
        progress: Mutex<Vec<(usize, usize)>>,
    }

    impl ProgressReporter for Recorder {
        fn report_progress(&self, current: usize, total: usize) {
            self.progress.lock().unwrap().push((current, total));
        }

        fn set_status_text(&self, text: &str) {
            self.texts.lock().unwrap().push(text.to_string());
        }

        fn is_cancelled(&self) -> bool {
            self.texts.lock().unwrap().len() > 1
        }
    }

    #[test]
    fn test_cancel_token_shared() {
        let a = CancelToken::new();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
        a.reset();
        assert!(!b.is_cancelled());
    }

    #[test]
    fn test_status_flows_to_reporter() {
        let recorder = Arc::new(Recorder::default());
        let ctx = JobContext::new(CancelToken::new(), recorder.clone());
        ctx.set_stage(RegistrationStage::Linear);
        assert_eq!(ctx.status(), "linear registration");
        assert!(!ctx.is_cancelled());
        ctx.set_stage(RegistrationStage::Nonlinear);
        // The reporter can request cancellation too.
        assert!(ctx.is_cancelled());
        assert_eq!(recorder.texts.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_stage_progress_spans_the_job() {
        let recorder = Arc::new(Recorder::default());
        let ctx = JobContext::new(CancelToken::new(), recorder.clone());
        // Outside a span nothing is forwarded.
        ctx.report_stage_progress(1, 2);
        assert!(recorder.progress.lock().unwrap().is_empty());

        let first = ctx.in_span(0..300);
        first.report_stage_progress(1, 2);
        first.report_stage_progress(2, 2);
        let second = ctx.in_span(300..PROGRESS_TOTAL);
        second.report_stage_progress(1, 7);
        second.report_stage_progress(7, 7);

        let progress = recorder.progress.lock().unwrap().clone();
        assert_eq!(progress, vec![(150, 1000), (300, 1000), (400, 1000), (1000, 1000)]);
    }

    #[test]
    fn test_stage_progress_never_moves_backwards() {
        let recorder = Arc::new(Recorder::default());
        let ctx = JobContext::new(CancelToken::new(), recorder.clone()).in_span(0..100);
        ctx.report_stage_progress(3, 4);
        // A restarted counter below the high-water mark is dropped.
        ctx.report_stage_progress(1, 4);
        ctx.report_stage_progress(4, 4);
        let positions: Vec<usize> = recorder.progress.lock().unwrap().iter().map(|p| p.0).collect();
        assert_eq!(positions, vec![75, 100]);
    }
}

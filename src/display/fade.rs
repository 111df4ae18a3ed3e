//! Opacity fades for one laid-out phrase.
//!
//! A fade runs on its own short-lived thread that the caller joins, so
//! `fade` blocks until the fade completes or is interrupted. Progress is
//! resumable: starting from a partial alpha continues from that alpha.

use crate::clock::Clock;
use crate::display::canvas::{Color, Position, RenderedLine, SharedCanvas};
use crate::display::layout::TextBlock;
use crate::error::AppError;
use crate::stop::StopFlag;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{Span, debug};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    In,
    Out,
}

impl FadeDirection {
    fn target(self) -> f64 {
        match self {
            Self::In => 1.0,
            Self::Out => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeOutcome {
    Completed,
    /// Stopped mid-flight; alpha keeps its last drawn value.
    Interrupted,
    AlreadyAtTarget,
    /// Another fade on this animator was in flight; nothing was done.
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
    #[serde(skip)]
    Custom(fn(f64) -> f64),
}

/// Bisection steps when inverting a curve; well below one frame of error.
const INVERSE_STEPS: u32 = 48;

impl Easing {
    pub fn apply(self, t: f64) -> f64 {
        match self {
            Easing::Linear => t,
            Easing::EaseIn => t * t,
            Easing::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Easing::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Easing::Custom(curve) => curve(t),
        }
    }

    /// Progress at which the curve reaches `value`. Curves are expected to
    /// be non-decreasing on `0..=1`.
    pub fn progress_for(self, value: f64) -> f64 {
        let value = value.clamp(0.0, 1.0);
        if matches!(self, Easing::Linear) {
            return value;
        }
        let (mut low, mut high) = (0.0, 1.0);
        for _ in 0..INVERSE_STEPS {
            let mid = (low + high) / 2.0;
            if self.apply(mid) < value {
                low = mid;
            } else {
                high = mid;
            }
        }
        (low + high) / 2.0
    }
}

pub struct FadeAnimator {
    lines: Vec<RenderedLine>,
    position: Position,
    background: Color,
    easing: Easing,
    canvas: SharedCanvas,
    clock: Arc<dyn Clock>,
    alpha: AtomicU64,
    in_flight: AtomicBool,
    stop: StopFlag,
    span: Span,
}

impl FadeAnimator {
    pub fn new(
        block: TextBlock,
        position: Position,
        canvas: SharedCanvas,
        clock: Arc<dyn Clock>,
        span: Span,
    ) -> Self {
        Self {
            lines: block.lines,
            position,
            background: Color::BLACK,
            easing: Easing::Linear,
            canvas,
            clock,
            alpha: AtomicU64::new(0.0_f64.to_bits()),
            in_flight: AtomicBool::new(false),
            stop: StopFlag::new(),
            span,
        }
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }

    pub fn alpha(&self) -> f64 {
        f64::from_bits(self.alpha.load(Ordering::SeqCst))
    }

    fn set_alpha(&self, alpha: f64) {
        self.alpha.store(alpha.to_bits(), Ordering::SeqCst);
    }

    pub fn lines(&self) -> &[RenderedLine] {
        &self.lines
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn is_fading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Ask an in-flight fade to return at its next frame.
    pub fn stop(&self) {
        debug!(parent: &self.span, "Fade stop requested");
        self.stop.request();
    }

    pub fn stop_handle(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn fade_in(&self, duration: Duration) -> Result<FadeOutcome, AppError> {
        self.fade(FadeDirection::In, duration)
    }

    pub fn fade_out(&self, duration: Duration) -> Result<FadeOutcome, AppError> {
        self.fade(FadeDirection::Out, duration)
    }

    pub fn fade(&self, direction: FadeDirection, duration: Duration) -> Result<FadeOutcome, AppError> {
        self.fade_until(direction, duration, None)
    }

    /// Like [`fade`](Self::fade), additionally interrupted when `cancel` is set.
    pub fn fade_until(
        &self,
        direction: FadeDirection,
        duration: Duration,
        cancel: Option<&StopFlag>,
    ) -> Result<FadeOutcome, AppError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(parent: &self.span, ?direction, "Fade already in flight");
            return Ok(FadeOutcome::AlreadyRunning);
        }
        let _in_flight = InFlight(&self.in_flight);

        std::thread::scope(|scope| {
            scope
                .spawn(|| self.run_fade(direction, duration, cancel))
                .join()
                .map_err(|_| AppError::ThreadPanic("fade"))?
        })
    }

    fn run_fade(
        &self,
        direction: FadeDirection,
        duration: Duration,
        cancel: Option<&StopFlag>,
    ) -> Result<FadeOutcome, AppError> {
        let start_alpha = self.alpha();
        let at_target = match direction {
            FadeDirection::In => start_alpha >= 1.0,
            FadeDirection::Out => start_alpha <= 0.0,
        };
        if at_target {
            return Ok(FadeOutcome::AlreadyAtTarget);
        }

        self.stop.reset();
        let total = duration.as_secs_f64();
        if total <= 0.0 {
            self.set_alpha(direction.target());
            self.draw(direction.target())?;
            return Ok(FadeOutcome::Completed);
        }

        // Pretend the fade started earlier so progress picks up at the current alpha.
        let resume_progress = match direction {
            FadeDirection::In => self.easing.progress_for(start_alpha),
            FadeDirection::Out => self.easing.progress_for(1.0 - start_alpha),
        };
        let resume_offset = resume_progress * total;
        let started = self.clock.now();
        let mut alpha = start_alpha;

        loop {
            if self.stop.is_set() || cancel.is_some_and(StopFlag::is_set) {
                debug!(parent: &self.span, ?direction, alpha, "Fade interrupted");
                return Ok(FadeOutcome::Interrupted);
            }

            let elapsed = self.clock.now().saturating_sub(started).as_secs_f64() + resume_offset;
            let progress = (elapsed / total).clamp(0.0, 1.0);
            let eased = self.easing.apply(progress).clamp(0.0, 1.0);
            alpha = match direction {
                FadeDirection::In => eased.max(alpha),
                FadeDirection::Out => (1.0 - eased).min(alpha),
            };
            self.set_alpha(alpha);
            self.draw(alpha)?;

            if progress >= 1.0 {
                break;
            }
        }

        self.set_alpha(direction.target());
        Ok(FadeOutcome::Completed)
    }

    fn draw(&self, alpha: f64) -> Result<(), AppError> {
        let mut canvas = self.canvas.lock().map_err(|_| AppError::Lock("canvas"))?;
        canvas.clear(self.background);
        for line in &self.lines {
            canvas.draw_line(line, self.position, alpha);
        }
        canvas.present()
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::display::canvas::{Canvas, RecordingCanvas, Size};
    use crate::display::font::BitmapFont;
    use crate::display::layout::{LayoutOptions, layout_text};
    use std::sync::Mutex;
    use std::sync::mpsc;

    const STEP: Duration = Duration::from_millis(10);

    fn block(text: &str) -> TextBlock {
        layout_text(
            text,
            Size::new(200, 100),
            &BitmapFont::new(1),
            &LayoutOptions::default(),
        )
    }

    fn recording_animator() -> (FadeAnimator, Arc<Mutex<RecordingCanvas>>) {
        let recording = Arc::new(Mutex::new(RecordingCanvas::new(Size::new(200, 100))));
        let canvas: SharedCanvas = recording.clone();
        let animator = FadeAnimator::new(
            block("boo"),
            Position::new(10, 10),
            canvas,
            Arc::new(ManualClock::with_auto_advance(STEP)),
            Span::none(),
        );
        (animator, recording)
    }

    fn alphas(recording: &Arc<Mutex<RecordingCanvas>>) -> Vec<f64> {
        recording.lock().map(|canvas| canvas.alphas()).unwrap_or_default()
    }

    #[test]
    fn fade_in_rises_monotonically_to_one() -> Result<(), AppError> {
        let (animator, recording) = recording_animator();

        let outcome = animator.fade_in(Duration::from_secs(1))?;

        assert_eq!(outcome, FadeOutcome::Completed);
        assert_eq!(animator.alpha(), 1.0);
        let alphas = alphas(&recording);
        assert!(alphas.len() > 10);
        assert!(alphas.windows(2).all(|pair| pair[1] >= pair[0]));
        assert!((alphas[alphas.len() - 1] - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn fades_at_target_return_immediately() -> Result<(), AppError> {
        let (animator, recording) = recording_animator();

        assert_eq!(animator.fade_out(Duration::from_secs(1))?, FadeOutcome::AlreadyAtTarget);
        animator.fade_in(Duration::from_secs(1))?;
        let frames = alphas(&recording).len();
        assert_eq!(animator.fade_in(Duration::from_secs(1))?, FadeOutcome::AlreadyAtTarget);

        assert_eq!(alphas(&recording).len(), frames);
        Ok(())
    }

    /// Canvas whose first `present` blocks until the test releases it.
    struct GateCanvas {
        entered: mpsc::Sender<()>,
        release: Option<mpsc::Receiver<()>>,
    }

    impl Canvas for GateCanvas {
        fn viewport_size(&self) -> Size {
            Size::new(200, 100)
        }

        fn clear(&mut self, _color: Color) {}

        fn draw_line(&mut self, _line: &RenderedLine, _origin: Position, _alpha: f64) {}

        fn present(&mut self) -> Result<(), AppError> {
            if let Some(release) = self.release.take() {
                let _ = self.entered.send(());
                let _ = release.recv();
            }
            Ok(())
        }
    }

    #[test]
    fn reentrant_fade_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let canvas: SharedCanvas = Arc::new(Mutex::new(GateCanvas {
            entered: entered_tx,
            release: Some(release_rx),
        }));
        let animator = Arc::new(FadeAnimator::new(
            block("boo"),
            Position::default(),
            canvas,
            Arc::new(ManualClock::with_auto_advance(STEP)),
            Span::none(),
        ));

        let first = {
            let animator = Arc::clone(&animator);
            std::thread::spawn(move || animator.fade_in(Duration::from_secs(1)))
        };
        entered_rx.recv_timeout(Duration::from_secs(5))?;

        assert!(animator.is_fading());
        assert_eq!(
            animator.fade_in(Duration::from_secs(1))?,
            FadeOutcome::AlreadyRunning
        );

        release_tx.send(())?;
        let outcome = first.join().map_err(|_| "fade thread panicked")??;
        assert_eq!(outcome, FadeOutcome::Completed);
        assert!(!animator.is_fading());
        Ok(())
    }

    /// Canvas that requests a stop once a frame at or below `threshold` is drawn.
    struct StopBelow {
        inner: RecordingCanvas,
        stop: StopFlag,
        threshold: f64,
    }

    impl Canvas for StopBelow {
        fn viewport_size(&self) -> Size {
            self.inner.viewport_size()
        }

        fn clear(&mut self, color: Color) {
            self.inner.clear(color);
        }

        fn draw_line(&mut self, line: &RenderedLine, origin: Position, alpha: f64) {
            if alpha <= self.threshold {
                self.stop.request();
            }
            self.inner.draw_line(line, origin, alpha);
        }

        fn present(&mut self) -> Result<(), AppError> {
            self.inner.present()
        }
    }

    #[test]
    fn interrupted_fade_out_resumes_from_current_alpha() -> Result<(), Box<dyn std::error::Error>> {
        let stop = StopFlag::new();
        let gate = Arc::new(Mutex::new(StopBelow {
            inner: RecordingCanvas::new(Size::new(200, 100)),
            stop: stop.clone(),
            threshold: 0.6,
        }));
        let canvas: SharedCanvas = gate.clone();
        let animator = FadeAnimator::new(
            block("boo"),
            Position::default(),
            canvas,
            Arc::new(ManualClock::with_auto_advance(STEP)),
            Span::none(),
        );

        animator.fade_in(Duration::from_secs(1))?;
        // the fade-in frames crossed the threshold too
        stop.reset();

        let outcome = animator.fade_until(FadeDirection::Out, Duration::from_secs(10), Some(&stop))?;
        let interrupted_at = animator.alpha();
        assert_eq!(outcome, FadeOutcome::Interrupted);
        assert!((interrupted_at - 0.6).abs() < 0.01, "stopped at {interrupted_at}");

        let before = gate.lock().map_err(|_| "canvas poisoned")?.inner.draws.len();
        gate.lock().map_err(|_| "canvas poisoned")?.threshold = -1.0;
        let outcome = animator.fade_out(Duration::from_secs(10))?;
        assert_eq!(outcome, FadeOutcome::Completed);

        let resumed: Vec<f64> = gate.lock().map_err(|_| "canvas poisoned")?.inner.alphas()[before..].to_vec();
        assert!((resumed[0] - interrupted_at).abs() < 0.01, "resumed at {}", resumed[0]);
        assert!(resumed.windows(2).all(|pair| pair[1] <= pair[0]));
        assert_eq!(animator.alpha(), 0.0);
        Ok(())
    }

    #[test]
    fn stop_leaves_alpha_where_it_was() -> Result<(), AppError> {
        let (animator, _recording) = recording_animator();
        let stop = animator.stop_handle();
        stop.request();
        // a fresh fade clears a stale stop request
        assert_eq!(animator.fade_in(Duration::from_secs(1))?, FadeOutcome::Completed);

        let cancel = StopFlag::new();
        cancel.request();
        let outcome = animator.fade_until(FadeDirection::Out, Duration::from_secs(1), Some(&cancel))?;
        assert_eq!(outcome, FadeOutcome::Interrupted);
        assert_eq!(animator.alpha(), 1.0);
        Ok(())
    }

    #[test]
    fn eased_fade_resumes_without_a_jump() -> Result<(), AppError> {
        for (direction, start) in [(FadeDirection::In, 0.8), (FadeDirection::In, 0.3), (FadeDirection::Out, 0.8)] {
            let (animator, recording) = recording_animator();
            let animator = animator.with_easing(Easing::EaseInOut);
            animator.set_alpha(start);

            animator.fade(direction, Duration::from_secs(10))?;

            let alphas = alphas(&recording);
            assert!((alphas[0] - start).abs() < 0.02, "{direction:?} from {start} began at {}", alphas[0]);
            // the curve keeps moving from the first frame rather than holding at the start value
            assert!((alphas[5] - alphas[0]).abs() > 1e-6);
        }
        Ok(())
    }

    #[test]
    fn progress_for_inverts_each_curve() {
        for easing in [Easing::Linear, Easing::EaseIn, Easing::EaseOut, Easing::EaseInOut] {
            for value in [0.0, 0.1, 0.5, 0.8, 1.0] {
                let t = easing.progress_for(value);
                assert!((easing.apply(t) - value).abs() < 1e-9, "{easing:?} at {value}");
            }
        }
    }

    #[test]
    fn easing_curves_hit_endpoints() {
        for easing in [Easing::Linear, Easing::EaseIn, Easing::EaseOut, Easing::EaseInOut] {
            assert_eq!(easing.apply(0.0), 0.0);
            assert!((easing.apply(1.0) - 1.0).abs() < 1e-12);
        }
        assert_eq!(Easing::Custom(|t| t.sqrt()).apply(0.25), 0.5);
    }
}

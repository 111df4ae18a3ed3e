//! Endless phrase rotation: fade in, hold, fade out, next.

pub mod phrases;

use crate::activation::Presenter;
use crate::clock::Clock;
use crate::display::canvas::{Color, SharedCanvas};
use crate::display::fade::{Easing, FadeAnimator, FadeDirection};
use crate::display::font::Font;
use crate::display::layout::{LayoutOptions, Placement, layout_text, place};
use crate::error::AppError;
use crate::state::{ActivePhrase, MirrorState};
use crate::stop::StopFlag;
use phrases::{Phrase, PhraseStore};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{Span, debug, debug_span, error, info, warn};

#[derive(Debug, Clone)]
pub struct PresentationSettings {
    pub fade_in: Duration,
    pub fade_out: Duration,
    /// Fade applied to whatever is on screen when the rotation is stopped.
    pub stop_fade: Duration,
    pub hold_poll: Duration,
    pub layout: LayoutOptions,
    pub placement: Placement,
    pub easing: Easing,
    pub background: Color,
    pub shuffle_seed: Option<u64>,
}

impl Default for PresentationSettings {
    fn default() -> Self {
        Self {
            fade_in: Duration::from_secs(3),
            fade_out: Duration::from_secs(2),
            stop_fade: Duration::from_secs(1),
            hold_poll: Duration::from_millis(50),
            layout: LayoutOptions::default(),
            placement: Placement::default(),
            easing: Easing::default(),
            background: Color::BLACK,
            shuffle_seed: None,
        }
    }
}

pub struct PresentationScheduler {
    store: PhraseStore,
    settings: PresentationSettings,
    canvas: SharedCanvas,
    fonts: Vec<Arc<dyn Font>>,
    clock: Arc<dyn Clock>,
    state: Option<Arc<MirrorState>>,
    phrases: Arc<Vec<Phrase>>,
    stop: StopFlag,
    handle: Option<JoinHandle<Result<(), AppError>>>,
    span: Span,
}

impl PresentationScheduler {
    pub fn new(
        store: PhraseStore,
        settings: PresentationSettings,
        canvas: SharedCanvas,
        fonts: Vec<Arc<dyn Font>>,
        clock: Arc<dyn Clock>,
        span: Span,
    ) -> Self {
        Self {
            store,
            settings,
            canvas,
            fonts,
            clock,
            state: None,
            phrases: Arc::new(Vec::new()),
            stop: StopFlag::new(),
            handle: None,
            span,
        }
    }

    pub fn with_state(mut self, state: Arc<MirrorState>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Phrases in the order of the current (or last) run.
    pub fn phrases(&self) -> &[Phrase] {
        &self.phrases
    }

    /// Load and shuffle the phrases, then start rotating them on a
    /// background thread. Does nothing while a rotation is running.
    pub fn start(&mut self) -> Result<(), AppError> {
        if self.handle.as_ref().is_some_and(|handle| handle.is_finished()) {
            // the previous rotation ended on its own; collect it before starting over
            self.join();
        }
        if self.handle.is_some() {
            debug!(parent: &self.span, "Presentation already running");
            return Ok(());
        }
        if self.fonts.is_empty() {
            return Err(AppError::Display("no fonts configured".to_string()));
        }

        let mut phrases = self.store.load()?;
        let mut rng = match self.settings.shuffle_seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        rng.shuffle(&mut phrases);
        self.phrases = Arc::new(phrases);
        self.stop.reset();

        let rotation = Rotation {
            phrases: Arc::clone(&self.phrases),
            settings: self.settings.clone(),
            canvas: Arc::clone(&self.canvas),
            fonts: self.fonts.clone(),
            clock: Arc::clone(&self.clock),
            state: self.state.clone(),
            stop: self.stop.clone(),
            rng,
        };
        let span = self.span.clone();
        self.handle = Some(std::thread::spawn(move || {
            let _enter = span.enter();
            let result = rotation.run();
            if let Err(ref err) = result {
                error!(error = %err, "Presentation stopped on error");
            }
            result
        }));
        info!(parent: &self.span, phrases = self.phrases.len(), "Presentation started");
        Ok(())
    }

    /// Stop the rotation, waiting for the on-screen phrase to fade away.
    pub fn stop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        self.stop.request();
        self.join();
    }

    fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match handle.join() {
            Ok(Ok(())) => info!(parent: &self.span, "Presentation stopped"),
            Ok(Err(err)) => warn!(parent: &self.span, error = %err, "Presentation ended with error"),
            Err(_) => warn!(parent: &self.span, "Presentation thread panicked"),
        }
    }
}

impl Presenter for PresentationScheduler {
    fn start(&mut self) -> Result<(), AppError> {
        PresentationScheduler::start(self)
    }

    fn stop(&mut self) {
        PresentationScheduler::stop(self);
    }
}

impl Drop for PresentationScheduler {
    fn drop(&mut self) {
        PresentationScheduler::stop(self);
    }
}

/// State owned by the rotation thread.
struct Rotation {
    phrases: Arc<Vec<Phrase>>,
    settings: PresentationSettings,
    canvas: SharedCanvas,
    fonts: Vec<Arc<dyn Font>>,
    clock: Arc<dyn Clock>,
    state: Option<Arc<MirrorState>>,
    stop: StopFlag,
    rng: fastrand::Rng,
}

impl Rotation {
    fn run(mut self) -> Result<(), AppError> {
        let mut animator = self.animator_for(0)?;
        let rotated = self.rotate(&mut animator);

        // abandon whatever fade was in flight, then clear the screen
        animator.stop();
        let cleared = animator
            .fade(FadeDirection::Out, self.settings.stop_fade)
            .map(|_| ());
        self.publish(None);
        rotated.and(cleared)
    }

    fn rotate(&mut self, animator: &mut FadeAnimator) -> Result<(), AppError> {
        let mut index = 0;
        loop {
            let phrase = &self.phrases[index];
            self.publish(Some(ActivePhrase {
                index,
                text: phrase.text.clone(),
            }));
            debug!(index, text = %phrase.text, "Showing phrase");

            let started = self.clock.now();
            animator.fade_until(FadeDirection::In, self.settings.fade_in, Some(&self.stop))?;

            let hold_until = started + phrase.duration();
            let remaining = hold_until.saturating_sub(self.clock.now());
            if self
                .stop
                .sleep_in_steps(self.clock.as_ref(), remaining, self.settings.hold_poll)
            {
                return Ok(());
            }

            animator.fade_until(FadeDirection::Out, self.settings.fade_out, Some(&self.stop))?;
            if self.stop.is_set() {
                return Ok(());
            }

            // wraps without reshuffling; the same phrase can repeat across the boundary
            index = (index + 1) % self.phrases.len();
            *animator = self.animator_for(index)?;
        }
    }

    fn animator_for(&mut self, index: usize) -> Result<FadeAnimator, AppError> {
        let phrase = self
            .phrases
            .get(index)
            .ok_or_else(|| AppError::Display(format!("no phrase at index {index}")))?;
        let font = &self.fonts[self.rng.usize(..self.fonts.len())];
        let viewport = self
            .canvas
            .lock()
            .map_err(|_| AppError::Lock("canvas"))?
            .viewport_size();

        let block = layout_text(&phrase.text, viewport, font.as_ref(), &self.settings.layout);
        let position = place(block.size, viewport, self.settings.placement, &mut self.rng);
        Ok(FadeAnimator::new(
            block,
            position,
            Arc::clone(&self.canvas),
            Arc::clone(&self.clock),
            debug_span!("fade", index),
        )
        .with_easing(self.settings.easing)
        .with_background(self.settings.background))
    }

    fn publish(&self, phrase: Option<ActivePhrase>) {
        if let Some(state) = &self.state {
            state.set_phrase(phrase);
        }
    }
}

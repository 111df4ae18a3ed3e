//! Debounced Idle/Active state machine that sequences the audio, relay and
//! presentation collaborators.

use crate::audio::AudioPlayer;
use crate::bus::relay::{RelayController, RelayId, disengage_all};
use crate::clock::Clock;
use crate::error::AppError;
use crate::state::{ActivationSnapshot, ActivationState, MirrorState};
use crate::stop::StopFlag;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Span, debug, error, info, warn};

/// Smoothed "someone is in front of the mirror" signal.
pub trait RangeSignal {
    fn in_range(&self) -> bool;

    /// Error once the signal source has failed for good.
    fn health(&mut self) -> Result<(), AppError> {
        Ok(())
    }

    fn stop(&mut self) {}
}

pub trait Presenter {
    fn start(&mut self) -> Result<(), AppError>;
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationTiming {
    pub poll_interval: Duration,
    pub debounce: Duration,
    /// Audio start to relay engage.
    pub audio_lead: Duration,
    /// Relay engage to presentation start.
    pub relay_lead: Duration,
    /// Presentation stop to audio stop.
    pub deactivate_delay: Duration,
    pub audio_fade: Duration,
    pub shutdown_audio_fade: Duration,
}

impl Default for ActivationTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            debounce: Duration::from_millis(250),
            audio_lead: Duration::from_millis(1500),
            relay_lead: Duration::from_secs(2),
            deactivate_delay: Duration::from_millis(1500),
            audio_fade: Duration::from_secs(3),
            shutdown_audio_fade: Duration::from_millis(100),
        }
    }
}

/// Shared manual override switch; read by the controller on each poll.
#[derive(Debug, Clone, Default)]
pub struct OverrideHandle {
    inner: Arc<AtomicBool>,
}

impl OverrideHandle {
    pub fn set(&self, enabled: bool) {
        self.inner.store(enabled, Ordering::SeqCst);
    }

    /// Flip the override and return the new value.
    pub fn toggle(&self) -> bool {
        !self.inner.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn get(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

pub struct Collaborators {
    pub signal: Box<dyn RangeSignal + Send>,
    pub audio: Box<dyn AudioPlayer + Send>,
    pub relays: Box<dyn RelayController + Send>,
    pub presenter: Box<dyn Presenter + Send>,
}

pub struct ActivationController {
    collab: Collaborators,
    relay: RelayId,
    timing: ActivationTiming,
    clock: Arc<dyn Clock>,
    state: ActivationState,
    manual_override: OverrideHandle,
    published: Option<ActivationSnapshot>,
    mirror: Option<Arc<MirrorState>>,
    shut_down: bool,
    span: Span,
}

impl ActivationController {
    pub fn new(
        collab: Collaborators,
        relay: RelayId,
        timing: ActivationTiming,
        clock: Arc<dyn Clock>,
        span: Span,
    ) -> Self {
        Self {
            collab,
            relay,
            timing,
            clock,
            state: ActivationState::Idle,
            manual_override: OverrideHandle::default(),
            published: None,
            mirror: None,
            shut_down: false,
            span,
        }
    }

    pub fn with_state(mut self, mirror: Arc<MirrorState>) -> Self {
        self.mirror = Some(mirror);
        self.publish();
        self
    }

    pub fn state(&self) -> ActivationState {
        self.state
    }

    pub fn override_handle(&self) -> OverrideHandle {
        self.manual_override.clone()
    }

    /// Takes effect on the next poll; still subject to the debounce.
    pub fn set_override(&self, enabled: bool) {
        self.manual_override.set(enabled);
    }

    fn effective_signal(&self) -> bool {
        self.manual_override.get() || self.collab.signal.in_range()
    }

    /// One poll tick. A change in the signal is committed only if it still
    /// holds after the debounce interval; the transition sequence runs to
    /// completion before this returns.
    pub fn poll(&mut self) -> Result<ActivationState, AppError> {
        self.collab.signal.health()?;
        self.publish();

        let observed = ActivationState::from_signal(self.effective_signal());
        if observed == self.state {
            return Ok(self.state);
        }

        self.clock.sleep(self.timing.debounce);
        let confirmed = ActivationState::from_signal(self.effective_signal());
        if confirmed == self.state {
            debug!(parent: &self.span, candidate = ?observed, "Signal change did not survive debounce");
            return Ok(self.state);
        }

        info!(parent: &self.span, from = ?self.state, to = ?confirmed, "Activation state changed");
        self.state = confirmed;
        self.publish();
        self.on_state_changed(confirmed);
        Ok(self.state)
    }

    fn on_state_changed(&mut self, state: ActivationState) {
        match state {
            ActivationState::Active => self.activate(),
            ActivationState::Idle => self.deactivate(),
        }
    }

    fn activate(&mut self) {
        if self.collab.audio.is_busy() {
            info!(parent: &self.span, "Audio already playing");
        } else if let Err(err) = self.collab.audio.play() {
            warn!(parent: &self.span, error = %err, "Failed to start audio");
        }

        self.clock.sleep(self.timing.audio_lead);
        if let Err(err) = self.collab.relays.engage(self.relay) {
            warn!(parent: &self.span, relay = self.relay, error = %err, "Failed to engage relay");
        }

        self.clock.sleep(self.timing.relay_lead);
        if let Err(err) = self.collab.presenter.start() {
            error!(parent: &self.span, error = %err, "Failed to start presentation");
        }
    }

    fn deactivate(&mut self) {
        self.collab.presenter.stop();

        self.clock.sleep(self.timing.deactivate_delay);
        if let Err(err) = self.collab.audio.stop(self.timing.audio_fade) {
            warn!(parent: &self.span, error = %err, "Failed to stop audio");
        }

        if let Err(err) = self.collab.relays.disengage(self.relay) {
            warn!(parent: &self.span, relay = self.relay, error = %err, "Failed to disengage relay");
        }
    }

    /// Poll until `stop` is requested or the signal fails. Shutdown runs on
    /// every exit.
    pub fn run(&mut self, stop: &StopFlag) -> Result<(), AppError> {
        info!(parent: &self.span, relay = self.relay, "Activation loop started");
        let result = self.run_loop(stop);
        if let Err(ref err) = result {
            error!(parent: &self.span, error = %err, "Activation loop failed");
        }
        self.shutdown();
        result
    }

    fn run_loop(&mut self, stop: &StopFlag) -> Result<(), AppError> {
        while !stop.is_set() {
            self.poll()?;
            stop.sleep(self.clock.as_ref(), self.timing.poll_interval);
        }
        Ok(())
    }

    /// Stop everything and release the relay, whatever state we were in.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.collab.presenter.stop();
        if let Err(err) = self.collab.audio.stop(self.timing.shutdown_audio_fade) {
            warn!(parent: &self.span, error = %err, "Failed to stop audio");
        }
        if let Err(err) = self.collab.relays.disengage(self.relay) {
            warn!(parent: &self.span, relay = self.relay, error = %err, "Failed to disengage relay");
            if let Err(err) = disengage_all(&mut self.collab.relays) {
                error!(parent: &self.span, error = %err, "Relays may still be engaged");
            }
        }
        self.collab.signal.stop();

        self.state = ActivationState::Idle;
        self.publish();
        info!(parent: &self.span, "Activation controller shut down");
    }

    fn publish(&mut self) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let snapshot = ActivationSnapshot {
            state: self.state,
            manual_override: self.manual_override.get(),
        };
        if self.published != Some(snapshot) {
            mirror.set_activation(snapshot);
            self.published = Some(snapshot);
        }
    }
}

impl Drop for ActivationController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::VecDeque;
    use std::sync::{Mutex, OnceLock};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Play,
        AudioStop(Duration),
        Engage(RelayId),
        Disengage(RelayId),
        PresenterStart,
        PresenterStop,
        SignalStop,
    }

    #[derive(Clone)]
    struct EventLog {
        clock: Arc<ManualClock>,
        events: Arc<Mutex<Vec<(Duration, Event)>>>,
    }

    impl EventLog {
        fn record(&self, event: Event) {
            if let Ok(mut events) = self.events.lock() {
                events.push((self.clock.peek(), event));
            }
        }

        fn events(&self) -> Vec<Event> {
            self.timed().into_iter().map(|(_, event)| event).collect()
        }

        fn timed(&self) -> Vec<(Duration, Event)> {
            self.events
                .lock()
                .map(|events| events.clone())
                .unwrap_or_default()
        }

        fn clear(&self) {
            if let Ok(mut events) = self.events.lock() {
                events.clear();
            }
        }
    }

    /// Replays `script` one read at a time, then holds `level`.
    struct FakeSignal {
        script: Mutex<VecDeque<bool>>,
        level: Arc<AtomicBool>,
        reads: Arc<AtomicUsize>,
        failed: Arc<AtomicBool>,
        log: EventLog,
    }

    impl RangeSignal for FakeSignal {
        fn in_range(&self) -> bool {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let scripted = self.script.lock().ok().and_then(|mut script| script.pop_front());
            scripted.unwrap_or_else(|| self.level.load(Ordering::SeqCst))
        }

        fn health(&mut self) -> Result<(), AppError> {
            if self.failed.load(Ordering::SeqCst) {
                Err(AppError::SensorUnavailable("i2c read failed".to_string()))
            } else {
                Ok(())
            }
        }

        fn stop(&mut self) {
            self.log.record(Event::SignalStop);
        }
    }

    struct FakeAudio {
        busy: Arc<AtomicBool>,
        log: EventLog,
    }

    impl AudioPlayer for FakeAudio {
        fn play(&mut self) -> Result<(), AppError> {
            self.log.record(Event::Play);
            self.busy.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self, fade: Duration) -> Result<(), AppError> {
            self.log.record(Event::AudioStop(fade));
            self.busy.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_busy(&mut self) -> bool {
            self.busy.load(Ordering::SeqCst)
        }
    }

    struct FakeRelays {
        log: EventLog,
    }

    impl RelayController for FakeRelays {
        fn engage(&mut self, relay: RelayId) -> Result<(), AppError> {
            self.log.record(Event::Engage(relay));
            Ok(())
        }

        fn disengage(&mut self, relay: RelayId) -> Result<(), AppError> {
            self.log.record(Event::Disengage(relay));
            Ok(())
        }

        fn relay_ids(&self) -> Vec<RelayId> {
            vec![1, 2]
        }
    }

    struct FakePresenter {
        fail_start: bool,
        log: EventLog,
    }

    impl Presenter for FakePresenter {
        fn start(&mut self) -> Result<(), AppError> {
            self.log.record(Event::PresenterStart);
            if self.fail_start {
                Err(AppError::Display("no fonts configured".to_string()))
            } else {
                Ok(())
            }
        }

        fn stop(&mut self) {
            self.log.record(Event::PresenterStop);
        }
    }

    struct Rig {
        controller: ActivationController,
        log: EventLog,
        clock: Arc<ManualClock>,
        level: Arc<AtomicBool>,
        reads: Arc<AtomicUsize>,
        failed: Arc<AtomicBool>,
        busy: Arc<AtomicBool>,
    }

    fn rig(script: &[bool], fail_start: bool) -> Rig {
        rig_with_clock(script, fail_start, |clock| clock as Arc<dyn Clock>)
    }

    fn rig_with_clock(
        script: &[bool],
        fail_start: bool,
        controller_clock: impl FnOnce(Arc<ManualClock>) -> Arc<dyn Clock>,
    ) -> Rig {
        let clock = Arc::new(ManualClock::new());
        let log = EventLog {
            clock: Arc::clone(&clock),
            events: Arc::new(Mutex::new(Vec::new())),
        };
        let level = Arc::new(AtomicBool::new(false));
        let reads = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicBool::new(false));
        let busy = Arc::new(AtomicBool::new(false));
        let collab = Collaborators {
            signal: Box::new(FakeSignal {
                script: Mutex::new(script.iter().copied().collect()),
                level: Arc::clone(&level),
                reads: Arc::clone(&reads),
                failed: Arc::clone(&failed),
                log: log.clone(),
            }),
            audio: Box::new(FakeAudio {
                busy: Arc::clone(&busy),
                log: log.clone(),
            }),
            relays: Box::new(FakeRelays { log: log.clone() }),
            presenter: Box::new(FakePresenter {
                fail_start,
                log: log.clone(),
            }),
        };
        let controller = ActivationController::new(
            collab,
            1,
            ActivationTiming::default(),
            controller_clock(Arc::clone(&clock)),
            Span::none(),
        );
        Rig {
            controller,
            log,
            clock,
            level,
            reads,
            failed,
            busy,
        }
    }

    #[test]
    fn activation_runs_audio_relay_presentation_in_order() -> Result<(), AppError> {
        let mut rig = rig(&[], false);
        rig.level.store(true, Ordering::SeqCst);

        let state = rig.controller.poll()?;

        assert_eq!(state, ActivationState::Active);
        assert_eq!(
            rig.log.timed(),
            vec![
                (Duration::from_millis(250), Event::Play),
                (Duration::from_millis(1750), Event::Engage(1)),
                (Duration::from_millis(3750), Event::PresenterStart),
            ]
        );
        Ok(())
    }

    #[test]
    fn glitch_shorter_than_debounce_is_ignored() -> Result<(), AppError> {
        let mut rig = rig(&[true, false], false);

        assert_eq!(rig.controller.poll()?, ActivationState::Idle);

        assert!(rig.log.events().is_empty());
        assert_eq!(rig.reads.load(Ordering::SeqCst), 2);
        assert_eq!(rig.clock.peek(), Duration::from_millis(250));
        Ok(())
    }

    #[test]
    fn deactivation_stops_presentation_then_audio_then_relay() -> Result<(), AppError> {
        let mut rig = rig(&[], false);
        rig.level.store(true, Ordering::SeqCst);
        rig.controller.poll()?;
        rig.log.clear();
        let left_at = rig.clock.peek();

        rig.level.store(false, Ordering::SeqCst);
        assert_eq!(rig.controller.poll()?, ActivationState::Idle);

        let at = |ms| left_at + Duration::from_millis(ms);
        assert_eq!(
            rig.log.timed(),
            vec![
                (at(250), Event::PresenterStop),
                (at(1750), Event::AudioStop(Duration::from_secs(3))),
                (at(1750), Event::Disengage(1)),
            ]
        );
        Ok(())
    }

    #[test]
    fn steady_signal_does_nothing() -> Result<(), AppError> {
        let mut rig = rig(&[], false);

        for _ in 0..5 {
            rig.controller.poll()?;
        }

        assert!(rig.log.events().is_empty());
        assert_eq!(rig.clock.peek(), Duration::ZERO);
        Ok(())
    }

    #[test]
    fn override_activates_without_reading_the_sensor() -> Result<(), AppError> {
        let mut rig = rig(&[], false);
        let handle = rig.controller.override_handle();

        assert!(handle.toggle());
        assert_eq!(rig.controller.poll()?, ActivationState::Active);
        assert_eq!(rig.reads.load(Ordering::SeqCst), 0);

        rig.controller.set_override(false);
        assert_eq!(rig.controller.poll()?, ActivationState::Idle);
        assert!(rig.reads.load(Ordering::SeqCst) > 0);
        Ok(())
    }

    /// Clears the override on its first sleep, which is the debounce wait.
    struct ReleasingClock {
        inner: Arc<ManualClock>,
        manual_override: Arc<OnceLock<OverrideHandle>>,
    }

    impl Clock for ReleasingClock {
        fn now(&self) -> Duration {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            if let Some(handle) = self.manual_override.get() {
                handle.set(false);
            }
            self.inner.sleep(duration);
        }
    }

    #[test]
    fn override_shorter_than_debounce_is_ignored() -> Result<(), AppError> {
        let released = Arc::new(OnceLock::new());
        let mut rig = {
            let released = Arc::clone(&released);
            rig_with_clock(&[], false, move |inner| {
                Arc::new(ReleasingClock {
                    inner,
                    manual_override: released,
                }) as Arc<dyn Clock>
            })
        };
        let handle = rig.controller.override_handle();
        let _ = released.set(handle.clone());

        handle.set(true);
        assert_eq!(rig.controller.poll()?, ActivationState::Idle);

        assert!(rig.log.events().is_empty());
        assert!(!handle.get());
        // the override masked the first read; only the confirming read hit the sensor
        assert_eq!(rig.reads.load(Ordering::SeqCst), 1);
        assert_eq!(rig.clock.peek(), Duration::from_millis(250));
        assert_eq!(rig.controller.state(), ActivationState::Idle);
        Ok(())
    }

    #[test]
    fn busy_audio_is_not_restarted() -> Result<(), AppError> {
        let mut rig = rig(&[], false);
        rig.busy.store(true, Ordering::SeqCst);
        rig.level.store(true, Ordering::SeqCst);

        rig.controller.poll()?;

        assert_eq!(rig.log.events(), vec![Event::Engage(1), Event::PresenterStart]);
        Ok(())
    }

    #[test]
    fn presenter_failure_leaves_controller_active() -> Result<(), AppError> {
        let mut rig = rig(&[], true);
        rig.level.store(true, Ordering::SeqCst);

        assert_eq!(rig.controller.poll()?, ActivationState::Active);
        assert_eq!(rig.controller.poll()?, ActivationState::Active);
        assert_eq!(
            rig.log.events(),
            vec![Event::Play, Event::Engage(1), Event::PresenterStart]
        );
        Ok(())
    }

    #[test]
    fn shutdown_from_idle_releases_everything_once() {
        let mut rig = rig(&[], false);

        rig.controller.shutdown();
        rig.controller.shutdown();

        assert_eq!(
            rig.log.events(),
            vec![
                Event::PresenterStop,
                Event::AudioStop(Duration::from_millis(100)),
                Event::Disengage(1),
                Event::SignalStop,
            ]
        );
    }

    #[test]
    fn sensor_failure_ends_run_with_cleanup() {
        let mut rig = rig(&[], false);
        rig.level.store(true, Ordering::SeqCst);
        rig.controller.poll().ok();
        rig.log.clear();
        rig.failed.store(true, Ordering::SeqCst);

        let result = rig.controller.run(&StopFlag::new());

        assert!(matches!(result, Err(AppError::SensorUnavailable(_))));
        assert_eq!(rig.controller.state(), ActivationState::Idle);
        assert!(rig.log.events().contains(&Event::Disengage(1)));
        assert_eq!(rig.log.events().last(), Some(&Event::SignalStop));
    }

    #[test]
    fn published_snapshot_tracks_state_and_override() -> Result<(), AppError> {
        let mut rig = rig(&[], false);
        let mirror = Arc::new(MirrorState::new());
        rig.controller = rig.controller.with_state(Arc::clone(&mirror));

        rig.controller.set_override(true);
        rig.controller.poll()?;

        assert_eq!(
            mirror.activation(),
            ActivationSnapshot {
                state: ActivationState::Active,
                manual_override: true,
            }
        );
        Ok(())
    }
}

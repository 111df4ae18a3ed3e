use haunted_mirror::activation::{ActivationController, Collaborators};
#[cfg(not(feature = "window"))]
use haunted_mirror::activation::OverrideHandle;
use haunted_mirror::audio::CommandAudioPlayer;
use haunted_mirror::bus::relay::{RelayController, SimulatedRelays, run_self_test};
use haunted_mirror::clock::{Clock, SystemClock};
use haunted_mirror::config::{self, Config};
use haunted_mirror::display::canvas::{FramebufferCanvas, SharedCanvas};
use haunted_mirror::display::font::{BitmapFont, Font};
use haunted_mirror::error::AppError;
use haunted_mirror::presentation::PresentationScheduler;
use haunted_mirror::presentation::phrases::PhraseStore;
use haunted_mirror::proximity::{ProximityDetector, ProximitySampler, SharedDetector, spawn_sampler};
use haunted_mirror::sensor::mock::MockSensor;
use haunted_mirror::sensor::vl53l1x::Vl53l1xSensor;
use haunted_mirror::state::MirrorState;
use haunted_mirror::stop::StopFlag;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{info, info_span, warn};

fn init_tracing(level: &str) {
    let level = level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(&config.logging.level);
    info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        name = %config.app.name,
        "haunted-mirror starting"
    );

    let state = Arc::new(MirrorState::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    let detector = ProximityDetector::new(
        config.sample_count(),
        config.distance_threshold_mm(),
        info_span!("proximity"),
    )
    .shared();
    let sampler = start_sampler(&config, detector, &clock, &state);
    let relays = open_relays(&config, clock.as_ref());
    let audio = CommandAudioPlayer::new(
        config.audio_settings(),
        Arc::clone(&clock),
        info_span!("audio"),
    );

    let size = config.display_size();
    #[cfg(feature = "window")]
    let (frame_tx, frame_rx) = std::sync::mpsc::sync_channel(1);
    #[cfg(feature = "window")]
    let canvas: SharedCanvas = Arc::new(Mutex::new(FramebufferCanvas::new(size).with_sink(frame_tx)));
    #[cfg(not(feature = "window"))]
    let canvas: SharedCanvas = Arc::new(Mutex::new(FramebufferCanvas::new(size)));

    let fonts: Vec<Arc<dyn Font>> = config
        .font_scales()
        .into_iter()
        .map(|scale| Arc::new(BitmapFont::new(scale)) as Arc<dyn Font>)
        .collect();
    let scheduler = PresentationScheduler::new(
        PhraseStore::File(config.phrases_path()),
        config.presentation_settings(),
        canvas,
        fonts,
        Arc::clone(&clock),
        info_span!("presentation"),
    )
    .with_state(Arc::clone(&state));

    let controller = ActivationController::new(
        Collaborators {
            signal: Box::new(sampler),
            audio: Box::new(audio),
            relays,
            presenter: Box::new(scheduler),
        },
        config.relay_id(),
        config.activation_timing(),
        Arc::clone(&clock),
        info_span!("activation"),
    )
    .with_state(Arc::clone(&state));
    let manual_override = controller.override_handle();

    tokio::spawn(log_state_changes(Arc::clone(&state)));

    let stop = StopFlag::new();
    let done = spawn_controller(controller, stop.clone());

    #[cfg(feature = "window")]
    {
        use haunted_mirror::display::window::MirrorWindow;

        let ctrl_c_stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received");
                ctrl_c_stop.request();
            }
        });
        let mut window = MirrorWindow::open(&config.app.name, size, frame_rx);
        let shown = match window.as_mut() {
            Ok(window) => tokio::task::block_in_place(|| window.run(&manual_override, &stop)),
            Err(err) => {
                stop.request();
                Err(AppError::Display(err.to_string()))
            }
        };
        // frames presented after this point are discarded
        drop(window);
        let result = done.await;
        shown?;
        return finish(result);
    }

    #[cfg(not(feature = "window"))]
    {
        spawn_override_reader(manual_override);
        let mut done = done;
        let finished = wait_for_shutdown(&mut done).await;
        let result = match finished {
            Some(result) => Ok(result),
            None => {
                stop.request();
                done.await
            }
        };
        finish(result)
    }
}

fn finish(
    result: Result<Result<(), AppError>, oneshot::error::RecvError>,
) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Ok(Ok(())) => {
            info!("haunted-mirror stopped");
            Ok(())
        }
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(AppError::ThreadPanic("activation controller").into()),
    }
}

fn start_sampler(
    config: &Config,
    detector: SharedDetector,
    clock: &Arc<dyn Clock>,
    state: &Arc<MirrorState>,
) -> ProximitySampler {
    let settings = config.sampler_settings();
    let span = info_span!("sampler");
    match Vl53l1xSensor::open() {
        Ok(sensor) => spawn_sampler(
            sensor,
            detector,
            settings,
            Arc::clone(clock),
            Some(Arc::clone(state)),
            span,
        ),
        Err(err) => {
            warn!(error = %err, "Distance sensor unavailable - simulating an empty room");
            spawn_sampler(
                MockSensor::constant(settings.far_distance_mm),
                detector,
                settings,
                Arc::clone(clock),
                Some(Arc::clone(state)),
                span,
            )
        }
    }
}

fn open_relays(config: &Config, clock: &dyn Clock) -> Box<dyn RelayController + Send> {
    let mut relays =
        hardware_relays(config).unwrap_or_else(|| Box::new(SimulatedRelays::new(&config.relays)));
    if config.relay_self_test() {
        if let Err(err) = run_self_test(&mut relays, clock) {
            warn!(error = %err, "Relay self test failed");
        }
    }
    relays
}

#[cfg(target_os = "linux")]
fn hardware_relays(config: &Config) -> Option<Box<dyn RelayController + Send>> {
    use haunted_mirror::bus::relay::RppalRelayController;

    match RppalRelayController::new(&config.relays, config.relays_active_high()) {
        Ok(relays) => Some(Box::new(relays)),
        Err(err) => {
            warn!(error = %err, "Failed to initialize GPIO relays - simulating");
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn hardware_relays(config: &Config) -> Option<Box<dyn RelayController + Send>> {
    let _ = config;
    warn!("GPIO relays require Linux/Raspberry Pi - simulating");
    None
}

/// Run the controller on its own thread; the receiver resolves when it exits.
fn spawn_controller(
    mut controller: ActivationController,
    stop: StopFlag,
) -> oneshot::Receiver<Result<(), AppError>> {
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::spawn(move || {
        let result = controller.run(&stop);
        drop(controller);
        stop.request();
        let _ = done_tx.send(result);
    });
    done_rx
}

/// Each line read from stdin toggles the manual override.
#[cfg(not(feature = "window"))]
fn spawn_override_reader(manual_override: OverrideHandle) {
    std::thread::spawn(move || {
        info!("Press Enter to toggle the manual override, Ctrl-C to quit");
        for line in std::io::stdin().lines() {
            if line.is_err() {
                break;
            }
            let enabled = manual_override.toggle();
            info!(enabled, "Manual override toggled");
        }
    });
}

/// Wait for Ctrl-C or for the controller to exit on its own.
///
/// Returns the controller's result if it exited first.
#[cfg(not(feature = "window"))]
async fn wait_for_shutdown(
    done: &mut oneshot::Receiver<Result<(), AppError>>,
) -> Option<Result<(), AppError>> {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = %err, "Failed to listen for Ctrl-C");
            }
            info!("Shutting down");
            None
        }
        result = done => {
            Some(result.unwrap_or(Err(AppError::ThreadPanic("activation controller"))))
        }
    }
}

async fn log_state_changes(state: Arc<MirrorState>) {
    let mut activation = state.subscribe_activation();
    let mut phrase = state.subscribe_phrase();
    loop {
        tokio::select! {
            changed = activation.changed() => {
                if changed.is_err() {
                    return;
                }
                let snapshot = *activation.borrow_and_update();
                info!(
                    state = ?snapshot.state,
                    manual_override = snapshot.manual_override,
                    "Activation updated"
                );
            }
            changed = phrase.changed() => {
                if changed.is_err() {
                    return;
                }
                if let Some(shown) = phrase.borrow_and_update().clone() {
                    info!(index = shown.index, text = %shown.text, "Phrase shown");
                }
            }
        }
    }
}

//! Soundtrack playback through an external command-line player.

use crate::clock::Clock;
use crate::error::AppError;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Span, info, warn};

pub const MUTE_LOCK_FILE: &str = "mute_audio.lock";
const FADE_STEPS: u32 = 10;

pub trait AudioPlayer {
    fn play(&mut self) -> Result<(), AppError>;
    /// Fade out over `fade`, then stop playback.
    fn stop(&mut self, fade: Duration) -> Result<(), AppError>;
    fn is_busy(&mut self) -> bool;
}

impl AudioPlayer for Box<dyn AudioPlayer + Send> {
    fn play(&mut self) -> Result<(), AppError> {
        (**self).play()
    }
    fn stop(&mut self, fade: Duration) -> Result<(), AppError> {
        (**self).stop(fade)
    }
    fn is_busy(&mut self) -> bool {
        (**self).is_busy()
    }
}

#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub dir: PathBuf,
    pub player: String,
    pub player_args: Vec<String>,
    pub mixer_control: String,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/audio"),
            player: "mpg123".to_string(),
            player_args: vec!["-q".to_string(), "--loop".to_string(), "-1".to_string()],
            mixer_control: "PCM".to_string(),
        }
    }
}

/// Plays a random track from the audio directory on loop until stopped.
pub struct CommandAudioPlayer {
    settings: AudioSettings,
    child: Option<Child>,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl CommandAudioPlayer {
    pub fn new(settings: AudioSettings, clock: Arc<dyn Clock>, span: Span) -> Self {
        Self {
            settings,
            child: None,
            clock,
            span,
        }
    }

    fn set_volume(&self, percent: u32) {
        let status = Command::new("amixer")
            .args(["-q", "sset", self.settings.mixer_control.as_str()])
            .arg(format!("{percent}%"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(parent: &self.span, %status, "amixer exited with failure"),
            Err(err) => warn!(parent: &self.span, error = %err, "Failed to run amixer"),
        }
    }
}

/// List playable tracks. The directory is re-read on every call so new files
/// are picked up without a restart.
pub fn load_library(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|err| AppError::Audio(format!("{}: {err}", dir.display())))?;
    let mut tracks: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"))
        })
        .collect();
    tracks.sort();
    Ok(tracks)
}

pub fn is_muted(dir: &Path) -> bool {
    dir.join(MUTE_LOCK_FILE).is_file()
}

impl AudioPlayer for CommandAudioPlayer {
    fn play(&mut self) -> Result<(), AppError> {
        let library = load_library(&self.settings.dir)?;
        info!(parent: &self.span, tracks = library.len(), "Loaded audio library");
        if library.is_empty() {
            return Ok(());
        }
        if is_muted(&self.settings.dir) {
            info!(parent: &self.span, "Audio muted by lock file");
            return Ok(());
        }

        let track = &library[fastrand::usize(..library.len())];
        self.set_volume(100);
        let child = Command::new(&self.settings.player)
            .args(&self.settings.player_args)
            .arg(track)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| AppError::Audio(format!("{}: {err}", self.settings.player)))?;
        info!(parent: &self.span, track = %track.display(), "Playback started");
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self, fade: Duration) -> Result<(), AppError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let step = fade / FADE_STEPS;
        for remaining in (0..FADE_STEPS).rev() {
            self.set_volume(100 * remaining / FADE_STEPS);
            self.clock.sleep(step);
        }

        let killed = child.kill();
        let _ = child.wait();
        self.set_volume(100);
        killed.map_err(|err| AppError::Audio(format!("stop player: {err}")))?;
        info!(parent: &self.span, fade_ms = fade.as_millis(), "Playback stopped");
        Ok(())
    }

    fn is_busy(&mut self) -> bool {
        match self.child.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_))) | Some(Err(_)) => {
                self.child = None;
                false
            }
            None => false,
        }
    }
}

//! Desktop window that shows frames presented by a [`FramebufferCanvas`].
//!
//! [`FramebufferCanvas`]: crate::display::canvas::FramebufferCanvas

use crate::activation::OverrideHandle;
use crate::display::canvas::{Color, Size};
use crate::error::AppError;
use crate::stop::StopFlag;
use minifb::{Key, KeyRepeat, Window, WindowOptions};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;
use tracing::{info, warn};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

pub struct MirrorWindow {
    window: Window,
    buffer: Vec<u32>,
    size: Size,
    frames: Receiver<Vec<u32>>,
}

impl MirrorWindow {
    pub fn open(title: &str, size: Size, frames: Receiver<Vec<u32>>) -> Result<Self, AppError> {
        let mut window = Window::new(
            title,
            size.width as usize,
            size.height as usize,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )
        .map_err(|err| AppError::Display(err.to_string()))?;
        window.limit_update_rate(Some(FRAME_INTERVAL));

        Ok(Self {
            window,
            buffer: vec![Color::BLACK.to_argb(); (size.width * size.height) as usize],
            size,
            frames,
        })
    }

    /// Show frames until the window closes, Esc/Q is pressed or `stop` is set.
    /// Space toggles the manual override. Requests `stop` on the way out.
    pub fn run(&mut self, manual_override: &OverrideHandle, stop: &StopFlag) -> Result<(), AppError> {
        let result = self.pump(manual_override, stop);
        stop.request();
        result
    }

    fn pump(&mut self, manual_override: &OverrideHandle, stop: &StopFlag) -> Result<(), AppError> {
        while self.window.is_open() && !stop.is_set() {
            if self.window.is_key_pressed(Key::Escape, KeyRepeat::No)
                || self.window.is_key_pressed(Key::Q, KeyRepeat::No)
            {
                info!("Quit requested from window");
                return Ok(());
            }
            if self.window.is_key_pressed(Key::Space, KeyRepeat::No) {
                let enabled = manual_override.toggle();
                info!(enabled, "Manual override toggled");
            }

            self.take_latest_frame();
            self.window
                .update_with_buffer(&self.buffer, self.size.width as usize, self.size.height as usize)
                .map_err(|err| AppError::Display(err.to_string()))?;
        }
        Ok(())
    }

    fn take_latest_frame(&mut self) {
        loop {
            match self.frames.try_recv() {
                Ok(frame) if frame.len() == self.buffer.len() => self.buffer = frame,
                Ok(frame) => warn!(len = frame.len(), "Dropping frame with wrong size"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            }
        }
    }
}

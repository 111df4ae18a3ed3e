use crate::presentation::phrases::PhraseStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),
    #[error("average requested before any sample was recorded")]
    EmptyBuffer,
    #[error(transparent)]
    PhraseStore(#[from] PhraseStoreError),
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("audio error: {0}")]
    Audio(String),
    #[error("display error: {0}")]
    Display(String),
    #[error("{0} lock poisoned")]
    Lock(&'static str),
    #[error("{0} thread panicked")]
    ThreadPanic(&'static str),
}

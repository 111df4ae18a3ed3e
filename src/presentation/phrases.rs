//! Static phrase list, read once per scheduler run.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};
use thiserror::Error;

pub const DEFAULT_PHRASES_PATH: &str = "data/phrases.json";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Phrase {
    pub text: String,
    #[serde(alias = "duration")]
    pub duration_seconds: f64,
}

impl Phrase {
    pub fn new(text: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            text: text.into(),
            duration_seconds,
        }
    }

    /// Hold time measured from the start of the fade-in.
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_seconds).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Deserialize)]
struct PhraseFile {
    phrases: Vec<Phrase>,
}

#[derive(Debug, Error)]
pub enum PhraseStoreError {
    #[error("phrase store missing: {0}")]
    Missing(#[from] io::Error),
    #[error("phrase store malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("phrase store invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub enum PhraseStore {
    File(PathBuf),
    Static(Vec<Phrase>),
}

impl PhraseStore {
    pub fn load(&self) -> Result<Vec<Phrase>, PhraseStoreError> {
        match self {
            PhraseStore::File(path) => load_phrases_from_path(path),
            PhraseStore::Static(phrases) => validate(phrases.clone()),
        }
    }
}

pub fn load_phrases_from_path(path: impl AsRef<Path>) -> Result<Vec<Phrase>, PhraseStoreError> {
    let contents = fs::read_to_string(path)?;
    let file: PhraseFile = serde_json::from_str(&contents)?;
    validate(file.phrases)
}

fn validate(phrases: Vec<Phrase>) -> Result<Vec<Phrase>, PhraseStoreError> {
    if phrases.is_empty() {
        return Err(PhraseStoreError::Invalid("no phrases".to_string()));
    }
    if let Some(bad) = phrases
        .iter()
        .find(|phrase| !phrase.duration_seconds.is_finite() || phrase.duration_seconds < 0.0)
    {
        return Err(PhraseStoreError::Invalid(format!(
            "bad duration {} for {:?}",
            bad.duration_seconds, bad.text
        )));
    }
    Ok(phrases)
}

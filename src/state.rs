use tokio::sync::watch;

/// Derived view of the proximity buffer; never stored by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProximityState {
    pub average: Option<f64>,
    pub ready: bool,
    pub in_range: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationState {
    #[default]
    Idle,
    Active,
}

impl ActivationState {
    pub fn from_signal(active: bool) -> Self {
        if active { Self::Active } else { Self::Idle }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivationSnapshot {
    pub state: ActivationState,
    pub manual_override: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivePhrase {
    pub index: usize,
    pub text: String,
}

/// Latest published values from the sampler, controller and scheduler.
#[derive(Debug)]
pub struct MirrorState {
    proximity_tx: watch::Sender<ProximityState>,
    activation_tx: watch::Sender<ActivationSnapshot>,
    phrase_tx: watch::Sender<Option<ActivePhrase>>,
}

impl MirrorState {
    pub fn new() -> Self {
        let (proximity_tx, _proximity_rx) = watch::channel(ProximityState::default());
        let (activation_tx, _activation_rx) = watch::channel(ActivationSnapshot::default());
        let (phrase_tx, _phrase_rx) = watch::channel(None);
        Self {
            proximity_tx,
            activation_tx,
            phrase_tx,
        }
    }

    pub fn proximity(&self) -> ProximityState {
        *self.proximity_tx.borrow()
    }

    pub fn subscribe_proximity(&self) -> watch::Receiver<ProximityState> {
        self.proximity_tx.subscribe()
    }

    pub fn set_proximity(&self, proximity: ProximityState) {
        self.proximity_tx.send_if_modified(|current| {
            if *current == proximity {
                false
            } else {
                *current = proximity;
                true
            }
        });
    }

    pub fn activation(&self) -> ActivationSnapshot {
        *self.activation_tx.borrow()
    }

    pub fn subscribe_activation(&self) -> watch::Receiver<ActivationSnapshot> {
        self.activation_tx.subscribe()
    }

    pub fn set_activation(&self, activation: ActivationSnapshot) {
        self.activation_tx.send_replace(activation);
    }

    pub fn phrase(&self) -> Option<ActivePhrase> {
        self.phrase_tx.borrow().clone()
    }

    pub fn subscribe_phrase(&self) -> watch::Receiver<Option<ActivePhrase>> {
        self.phrase_tx.subscribe()
    }

    pub fn set_phrase(&self, phrase: Option<ActivePhrase>) {
        self.phrase_tx.send_replace(phrase);
    }
}

impl Default for MirrorState {
    fn default() -> Self {
        Self::new()
    }
}

use crate::clock::Clock;
use crate::error::AppError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

pub type RelayId = u8;

const SELF_TEST_STEP: Duration = Duration::from_millis(250);
const SELF_TEST_ALL_ON: Duration = Duration::from_secs(1);

/// Maps a logical relay id to the BCM pin that drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RelayPin {
    pub id: RelayId,
    pub pin: u8,
}

pub trait RelayController {
    fn engage(&mut self, relay: RelayId) -> Result<(), AppError>;
    fn disengage(&mut self, relay: RelayId) -> Result<(), AppError>;
    fn relay_ids(&self) -> Vec<RelayId>;
}

impl RelayController for Box<dyn RelayController + Send> {
    fn engage(&mut self, relay: RelayId) -> Result<(), AppError> {
        (**self).engage(relay)
    }
    fn disengage(&mut self, relay: RelayId) -> Result<(), AppError> {
        (**self).disengage(relay)
    }
    fn relay_ids(&self) -> Vec<RelayId> {
        (**self).relay_ids()
    }
}

/// Power-on check: click each relay in turn, then all together, then leave all off.
pub fn run_self_test<R>(relays: &mut R, clock: &dyn Clock) -> Result<(), AppError>
where
    R: RelayController + ?Sized,
{
    let ids = relays.relay_ids();
    info!(count = ids.len(), "Running relay self test");

    for id in &ids {
        relays.engage(*id)?;
        clock.sleep(SELF_TEST_STEP);
        relays.disengage(*id)?;
        debug!(relay = id, "Relay cycled");
    }

    for id in &ids {
        relays.engage(*id)?;
    }
    clock.sleep(SELF_TEST_ALL_ON);
    disengage_all(relays)
}

pub fn disengage_all<R>(relays: &mut R) -> Result<(), AppError>
where
    R: RelayController + ?Sized,
{
    for id in relays.relay_ids() {
        relays.disengage(id)?;
    }
    Ok(())
}

/// Relay bank without hardware; tracks which relays would be closed.
#[derive(Debug, Default)]
pub struct SimulatedRelays {
    ids: Vec<RelayId>,
    engaged: BTreeSet<RelayId>,
}

impl SimulatedRelays {
    pub fn new(relays: &[RelayPin]) -> Self {
        Self {
            ids: relays.iter().map(|relay| relay.id).collect(),
            engaged: BTreeSet::new(),
        }
    }

    pub fn is_engaged(&self, relay: RelayId) -> bool {
        self.engaged.contains(&relay)
    }
}

impl RelayController for SimulatedRelays {
    fn engage(&mut self, relay: RelayId) -> Result<(), AppError> {
        if !self.ids.contains(&relay) {
            return Err(AppError::Gpio(format!("unknown relay {relay}")));
        }
        info!(relay, "Relay engaged (simulated)");
        self.engaged.insert(relay);
        Ok(())
    }

    fn disengage(&mut self, relay: RelayId) -> Result<(), AppError> {
        if !self.ids.contains(&relay) {
            return Err(AppError::Gpio(format!("unknown relay {relay}")));
        }
        if self.engaged.remove(&relay) {
            info!(relay, "Relay disengaged (simulated)");
        }
        Ok(())
    }

    fn relay_ids(&self) -> Vec<RelayId> {
        self.ids.clone()
    }
}

#[cfg(target_os = "linux")]
pub struct RppalRelayController {
    pins: std::collections::BTreeMap<RelayId, rppal::gpio::OutputPin>,
    active_high: bool,
}

#[cfg(target_os = "linux")]
impl RppalRelayController {
    /// Claim every relay pin as an output and drive it to the released level.
    pub fn new(relays: &[RelayPin], active_high: bool) -> Result<Self, AppError> {
        let gpio = rppal::gpio::Gpio::new().map_err(|err| AppError::Gpio(err.to_string()))?;
        let mut pins = std::collections::BTreeMap::new();
        for relay in relays {
            let output = gpio
                .get(relay.pin)
                .map_err(|err| AppError::Gpio(err.to_string()))?
                .into_output();
            pins.insert(relay.id, output);
        }
        let mut controller = Self { pins, active_high };
        disengage_all(&mut controller)?;
        Ok(controller)
    }

    fn output(&mut self, relay: RelayId) -> Result<&mut rppal::gpio::OutputPin, AppError> {
        self.pins
            .get_mut(&relay)
            .ok_or_else(|| AppError::Gpio(format!("missing relay {relay}")))
    }
}

#[cfg(target_os = "linux")]
impl RelayController for RppalRelayController {
    fn engage(&mut self, relay: RelayId) -> Result<(), AppError> {
        let active_high = self.active_high;
        let output = self.output(relay)?;
        if active_high {
            output.set_high();
        } else {
            output.set_low();
        }
        Ok(())
    }

    fn disengage(&mut self, relay: RelayId) -> Result<(), AppError> {
        let active_high = self.active_high;
        let output = self.output(relay)?;
        if active_high {
            output.set_low();
        } else {
            output.set_high();
        }
        Ok(())
    }

    fn relay_ids(&self) -> Vec<RelayId> {
        self.pins.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Default)]
    struct MockRelays {
        actions: Vec<String>,
    }

    impl RelayController for MockRelays {
        fn engage(&mut self, relay: RelayId) -> Result<(), AppError> {
            self.actions.push(format!("on:{relay}"));
            Ok(())
        }

        fn disengage(&mut self, relay: RelayId) -> Result<(), AppError> {
            self.actions.push(format!("off:{relay}"));
            Ok(())
        }

        fn relay_ids(&self) -> Vec<RelayId> {
            vec![1, 2]
        }
    }

    #[test]
    fn self_test_cycles_each_relay_then_all() -> Result<(), AppError> {
        let mut relays = MockRelays::default();
        let clock = ManualClock::new();

        run_self_test(&mut relays, &clock)?;

        assert_eq!(
            relays.actions,
            vec!["on:1", "off:1", "on:2", "off:2", "on:1", "on:2", "off:1", "off:2"]
        );
        assert_eq!(clock.now(), Duration::from_millis(1500));
        Ok(())
    }

    #[test]
    fn simulated_relays_track_state() -> Result<(), AppError> {
        let mut relays = SimulatedRelays::new(&[RelayPin { id: 1, pin: 5 }]);

        relays.engage(1)?;
        assert!(relays.is_engaged(1));
        relays.disengage(1)?;
        assert!(!relays.is_engaged(1));
        assert!(matches!(relays.engage(7), Err(AppError::Gpio(_))));
        Ok(())
    }
}

//! Bluetooth radio availability
//! Process-wide view of whether the radio can be used, shared by both sessions.

use std::fmt;

use log::info;
use serde::Serialize;
use tokio::sync::watch;

/// Power/authorization state of the local Bluetooth radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RadioState {
    Unknown,
    Off,
    On,
    Unauthorized,
    Unsupported,
    Resetting,
}

impl RadioState {
    /// Only a powered, authorized radio can scan, connect or advertise
    pub fn is_usable(&self) -> bool {
        matches!(self, RadioState::On)
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RadioState::Unknown => "unknown",
            RadioState::Off => "Bluetooth OFF",
            RadioState::On => "Bluetooth ON",
            RadioState::Unauthorized => "Bluetooth permissions denied",
            RadioState::Unsupported => "Bluetooth unsupported",
            RadioState::Resetting => "Bluetooth resetting",
        };
        f.write_str(text)
    }
}

/// Publishes radio state changes to every session
#[derive(Debug, Clone)]
pub struct RadioAvailabilityMonitor {
    sender: watch::Sender<RadioState>,
}

impl RadioAvailabilityMonitor {
    pub fn new(initial: RadioState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Records a new state reported by the platform. Repeated reports of the
    /// same state do not wake subscribers.
    pub fn update(&self, state: RadioState) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!("Radio state changed: {}", state);
        }
    }

    pub fn current(&self) -> RadioState {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RadioState> {
        self.sender.subscribe()
    }
}

impl Default for RadioAvailabilityMonitor {
    fn default() -> Self {
        Self::new(RadioState::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_on_is_usable() {
        assert!(RadioState::On.is_usable());
        for state in [
            RadioState::Unknown,
            RadioState::Off,
            RadioState::Unauthorized,
            RadioState::Unsupported,
            RadioState::Resetting,
        ] {
            assert!(!state.is_usable());
        }
    }

    #[tokio::test]
    async fn test_subscribers_see_changes_only() {
        let monitor = RadioAvailabilityMonitor::new(RadioState::Off);
        let mut rx = monitor.subscribe();

        monitor.update(RadioState::Off);
        assert!(!rx.has_changed().unwrap());

        monitor.update(RadioState::On);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), RadioState::On);
        assert_eq!(monitor.current(), RadioState::On);
    }
}

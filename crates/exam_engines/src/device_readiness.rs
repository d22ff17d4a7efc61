#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use exam_kernel_contracts::device::{DeviceTestName, DeviceTestSnapshot, KEYBOARD_MIN_TYPED_CHARS};

/// Accumulates "has the candidate ever demonstrated this capability" evidence.
///
/// No operation clears a flag; a failed re-run after a pass keeps the pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReadinessTracker {
    results: BTreeMap<DeviceTestName, bool>,
}

impl Default for DeviceReadinessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceReadinessTracker {
    pub fn new() -> Self {
        Self {
            results: DeviceTestName::ALL
                .into_iter()
                .map(|test| (test, false))
                .collect(),
        }
    }

    /// Returns true only when this call flipped the flag from false to true.
    pub fn record_result(&mut self, test: DeviceTestName, passed: bool) -> bool {
        if !passed {
            return false;
        }
        let flag = self.results.entry(test).or_insert(false);
        if *flag {
            return false;
        }
        *flag = true;
        tracing::info!(test = test.as_str(), "device test passed");
        true
    }

    pub fn record_keyboard_length(&mut self, typed_chars: usize) -> bool {
        self.record_result(
            DeviceTestName::Keyboard,
            typed_chars >= KEYBOARD_MIN_TYPED_CHARS,
        )
    }

    /// Counts Unicode scalar values, not bytes.
    pub fn record_keyboard_input(&mut self, typed: &str) -> bool {
        self.record_keyboard_length(typed.chars().count())
    }

    pub fn is_passed(&self, test: DeviceTestName) -> bool {
        self.results.get(&test).copied().unwrap_or(false)
    }

    pub fn all_passed(&self, required: &BTreeSet<DeviceTestName>) -> bool {
        required.iter().all(|test| self.is_passed(*test))
    }

    pub fn snapshot(&self) -> DeviceTestSnapshot {
        DeviceTestSnapshot {
            playback: self.is_passed(DeviceTestName::Playback),
            microphone: self.is_passed(DeviceTestName::Microphone),
            keyboard: self.is_passed(DeviceTestName::Keyboard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_readiness_01_all_passed_is_and_over_required_set_only() {
        let mut tracker = DeviceReadinessTracker::new();
        let pair = DeviceTestName::audio_pair();
        let full = DeviceTestName::full_set();
        assert!(!tracker.all_passed(&pair));
        tracker.record_result(DeviceTestName::Playback, true);
        assert!(!tracker.all_passed(&pair));
        tracker.record_result(DeviceTestName::Microphone, true);
        assert!(tracker.all_passed(&pair));
        assert!(!tracker.all_passed(&full));
        tracker.record_keyboard_length(12);
        assert!(tracker.all_passed(&full));
    }

    #[test]
    fn at_readiness_02_later_failure_never_erases_a_pass() {
        let mut tracker = DeviceReadinessTracker::new();
        assert!(tracker.record_result(DeviceTestName::Microphone, true));
        assert!(!tracker.record_result(DeviceTestName::Microphone, false));
        assert!(!tracker.record_result(DeviceTestName::Microphone, true));
        assert!(tracker.is_passed(DeviceTestName::Microphone));
    }

    #[test]
    fn at_readiness_03_keyboard_threshold_is_ten_characters() {
        let mut tracker = DeviceReadinessTracker::new();
        assert!(!tracker.record_keyboard_length(9));
        assert!(!tracker.is_passed(DeviceTestName::Keyboard));
        assert!(tracker.record_keyboard_length(10));
        assert!(tracker.is_passed(DeviceTestName::Keyboard));
    }

    #[test]
    fn at_readiness_04_keyboard_counts_characters_not_bytes() {
        let mut tracker = DeviceReadinessTracker::new();
        // Nine scalar values, 27 bytes.
        assert!(!tracker.record_keyboard_input("मराठीभाषा"));
        assert!(tracker.record_keyboard_input("मराठी भाषेत"));
    }

    #[test]
    fn at_readiness_05_snapshot_mirrors_flags() {
        let mut tracker = DeviceReadinessTracker::new();
        tracker.record_result(DeviceTestName::Playback, true);
        assert_eq!(
            tracker.snapshot(),
            DeviceTestSnapshot {
                playback: true,
                microphone: false,
                keyboard: false
            }
        );
    }
}

//! Self-tuning auto-moderation.
//!
//! `chaos` is an abuse-pressure signal. The message pipeline raises it (bursts,
//! filtered words, kicks); the decay tick lowers it by one per run and uses it
//! to move the filter level and the kick-for-shouting switch.

use lobby_core::errors::Violation;
use lobby_settings::{AutoModSettings, BadWords};
use serde::Serialize;

use crate::filter;

/// Highest filter level.
pub const MAX_FILTER_LEVEL: u8 = 3;
/// Similarity tolerance used when the configured one is 0.
pub const FALLBACK_FILTER_TOLERANCE: u32 = 50;

/// What [`AutoModState::moderate`] decided for one escaped message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Deliver this (possibly masked) text.
    Pass(String),
    /// Warn the sender and drop. `kick` also disconnects them.
    Reject { violation: Violation, kick: bool },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AutoModState {
    pub enabled: bool,
    pub chaos: u32,
    pub cap_percent_threshold: u32,
    pub kick_on_cap_violation: bool,
    pub filter_level: u8,
    pub filter_tolerance: u32,
    /// Chaos at or above which the filter level steps up.
    pub filter_level_escalation: u32,
    /// Chaos above which shouting gets the sender kicked.
    pub kick_escalation: u32,
}

impl AutoModState {
    pub fn from_settings(settings: &AutoModSettings) -> Self {
        Self {
            enabled: settings.on,
            chaos: settings.chaos,
            cap_percent_threshold: settings.cap_percent_threshold,
            kick_on_cap_violation: settings.kick_on_cap_violation,
            filter_level: settings.filter_level.min(MAX_FILTER_LEVEL),
            filter_tolerance: match settings.filter_tolerance {
                0 => FALLBACK_FILTER_TOLERANCE,
                t => t,
            },
            filter_level_escalation: settings.escalation.filter_level,
            kick_escalation: settings.escalation.kick_on_cap,
        }
    }

    pub fn bump_chaos(&mut self, by: u32) {
        self.chaos = self.chaos.saturating_add(by);
    }

    /// Shouting check, word scan, and level filter, in that order.
    pub fn moderate(&mut self, text: &str, words: &BadWords) -> Verdict {
        if self.cap_percent_threshold > 0
            && filter::cap_percent(text) >= f64::from(self.cap_percent_threshold)
        {
            return Verdict::Reject {
                violation: Violation::Shouting,
                kick: self.kick_on_cap_violation,
            };
        }

        // Runs at every level, on top of whatever the level itself counts.
        self.bump_chaos(filter::count_contained(text, words));

        match self.filter_level {
            1 => {
                let (masked, hits) = filter::mask_tokens(text, words);
                self.bump_chaos(hits);
                Verdict::Pass(masked)
            }
            2 => {
                let (masked, hits) = filter::mask_letters(text, words);
                self.bump_chaos(hits);
                Verdict::Pass(masked)
            }
            3 if filter::resembles_any(text, words, self.filter_tolerance) => Verdict::Reject {
                violation: Violation::Similarity,
                kick: true,
            },
            _ => Verdict::Pass(text.to_string()),
        }
    }

    /// Chaos half of the decay tick. `below_ceiling` is whether capacity is
    /// still short of the ceiling after this tick's recovery step.
    pub fn decay(&mut self, below_ceiling: bool) {
        if below_ceiling {
            self.bump_chaos(2);
        }

        if self.chaos >= self.filter_level_escalation {
            if self.filter_level < MAX_FILTER_LEVEL {
                self.filter_level += 1;
            }
        } else if self.chaos == 0 {
            self.filter_level = self.filter_level.saturating_sub(1);
        }

        self.kick_on_cap_violation = self.chaos > self.kick_escalation;
        self.chaos = self.chaos.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(level: u8) -> AutoModState {
        let mut s = AutoModState::from_settings(&AutoModSettings::default());
        s.filter_level = level;
        s
    }

    fn words() -> BadWords {
        BadWords::new(["duck"])
    }

    #[test]
    fn shouting_rejected_at_threshold() {
        let mut s = state(0);
        assert_eq!(
            s.moderate("HELLO", &words()),
            Verdict::Reject {
                violation: Violation::Shouting,
                kick: false
            }
        );
        assert_eq!(s.moderate("Hello", &words()), Verdict::Pass("Hello".into()));
    }

    #[test]
    fn shouting_kicks_when_switched_on() {
        let mut s = state(0);
        s.kick_on_cap_violation = true;
        assert_eq!(
            s.moderate("STOP IT", &words()),
            Verdict::Reject {
                violation: Violation::Shouting,
                kick: true
            }
        );
    }

    #[test]
    fn zero_threshold_disables_shouting_check() {
        let mut s = state(0);
        s.cap_percent_threshold = 0;
        assert_eq!(s.moderate("HELLO", &words()), Verdict::Pass("HELLO".into()));
    }

    #[test]
    fn level_one_masks_tokens_and_counts_chaos() {
        let mut s = state(1);
        assert_eq!(s.moderate("duck you", &words()), Verdict::Pass("#### you".into()));
        // one from the scan, one from the replacement
        assert_eq!(s.chaos, 2);

        let mut s = state(1);
        assert_eq!(s.moderate("ducking", &words()), Verdict::Pass("ducking".into()));
        // the scan still sees it
        assert_eq!(s.chaos, 1);
    }

    #[test]
    fn level_two_masks_embedded_words() {
        let mut s = state(2);
        assert_eq!(s.moderate("ducking", &words()), Verdict::Pass("####ing".into()));
        assert_eq!(s.chaos, 2);
    }

    #[test]
    fn level_three_rejects_similar_words() {
        let mut s = state(3);
        assert_eq!(
            s.moderate("you dusk", &words()),
            Verdict::Reject {
                violation: Violation::Similarity,
                kick: true
            }
        );
        assert_eq!(s.moderate("nice day", &words()), Verdict::Pass("nice day".into()));
    }

    #[test]
    fn zero_tolerance_falls_back_to_fifty() {
        let settings = AutoModSettings {
            filter_level: 3,
            filter_tolerance: 0,
            ..AutoModSettings::default()
        };
        let mut s = AutoModState::from_settings(&settings);
        assert_eq!(s.filter_tolerance, FALLBACK_FILTER_TOLERANCE);
        assert_eq!(
            s.moderate("hello there friend", &words()),
            Verdict::Pass("hello there friend".into())
        );
        // "dock" matches "duck" at three of four positions
        assert!(matches!(
            s.moderate("nice dock", &words()),
            Verdict::Reject {
                violation: Violation::Similarity,
                ..
            }
        ));
    }

    #[test]
    fn level_zero_passes_through_but_scans() {
        let mut s = state(0);
        assert_eq!(s.moderate("duck", &words()), Verdict::Pass("duck".into()));
        assert_eq!(s.chaos, 1);
    }

    #[test]
    fn decay_escalates_when_chaos_high() {
        let mut s = state(2);
        s.chaos = 20;
        s.decay(false);
        assert_eq!(s.filter_level, 3);
        assert!(s.kick_on_cap_violation);
        assert_eq!(s.chaos, 19);

        // capped at 3
        s.decay(false);
        assert_eq!(s.filter_level, 3);
    }

    #[test]
    fn decay_relaxes_when_calm() {
        let mut s = state(2);
        s.chaos = 0;
        s.decay(false);
        assert_eq!(s.filter_level, 1);
        assert!(!s.kick_on_cap_violation);
        assert_eq!(s.chaos, 0);

        s.decay(false);
        s.decay(false);
        assert_eq!(s.filter_level, 0);
    }

    #[test]
    fn decay_holds_level_between_zero_and_threshold() {
        let mut s = state(2);
        s.chaos = 2;
        s.decay(false);
        assert_eq!(s.filter_level, 2);
        assert_eq!(s.chaos, 1);
    }

    #[test]
    fn decay_adds_pressure_while_below_ceiling() {
        let mut s = state(1);
        s.chaos = 1;
        s.decay(true);
        // 1 + 2 = 3 reaches the default escalation threshold, then decays by one
        assert_eq!(s.filter_level, 2);
        assert_eq!(s.chaos, 2);
    }

    #[test]
    fn kick_switch_turns_off_again() {
        let mut s = state(3);
        s.chaos = 16;
        s.decay(false);
        assert!(s.kick_on_cap_violation);
        s.chaos = 15;
        s.decay(false);
        assert!(!s.kick_on_cap_violation);
    }
}

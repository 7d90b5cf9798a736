//! Persisted configuration. Key names match the on-disk `config.json`.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LobbySettings {
    /// Flipped to false after the first run that finds it set.
    pub first_time_run: bool,
    /// Log connects and disconnects at debug level.
    pub be_verbose: bool,
    /// The server refuses to start until the operator sets this.
    pub config_ready: bool,
    pub port: u16,
    /// Longest accepted chat message, in characters.
    pub max_message_length: usize,
    pub max_chat_history: usize,
    /// Milliseconds without an accepted message before a session is evicted.
    pub max_idle_time: u64,
    /// Heartbeat interval advertised to clients, in milliseconds.
    pub pulse_time: u64,
    /// Hard capacity limit.
    pub client_ceiling: usize,
    #[serde(rename = "maxClientsPerIPA")]
    pub max_clients_per_ipa: usize,
    /// Kicks before an address is banned.
    pub ipa_max_kicks: u32,
    /// Ban duration in milliseconds.
    pub ipa_block_time: u64,
    /// How long an unbanned address record is kept, in milliseconds.
    pub ipa_store_time: u64,
    pub auto_mod: AutoModSettings,
    /// Path to the bad-word list.
    pub bad_text_file: String,
    /// Seeded into the history buffer at startup. Empty disables it.
    pub welcome_message: String,
    /// SQLite file for the moderation audit trail. Empty disables it.
    pub audit_log_file: String,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            first_time_run: true,
            be_verbose: false,
            config_ready: false,
            port: 1234,
            max_message_length: 512,
            max_chat_history: 20,
            max_idle_time: 60_000,
            pulse_time: 20_000,
            client_ceiling: 20,
            max_clients_per_ipa: 2,
            ipa_max_kicks: 4,
            ipa_block_time: 200_000,
            ipa_store_time: 100_000,
            auto_mod: AutoModSettings::default(),
            bad_text_file: "badtext.json".to_string(),
            welcome_message: "Hello, send a nice message :-)".to_string(),
            audit_log_file: String::new(),
        }
    }
}

/// Auto-moderation block (`autoMod`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoModSettings {
    pub on: bool,
    /// Starting chaos level.
    pub chaos: u32,
    /// Uppercase percentage at or above which a message counts as shouting. 0 disables.
    #[serde(rename = "capCap")]
    pub cap_percent_threshold: u32,
    #[serde(rename = "kickForCap")]
    pub kick_on_cap_violation: bool,
    #[serde(rename = "chatFilterLevel")]
    pub filter_level: u8,
    /// Similarity percentage that trips the level 3 filter.
    #[serde(rename = "chatFilterTolerance")]
    pub filter_tolerance: u32,
    #[serde(rename = "chaosCap")]
    pub escalation: EscalationThresholds,
}

impl Default for AutoModSettings {
    fn default() -> Self {
        Self {
            on: true,
            chaos: 0,
            cap_percent_threshold: 80,
            kick_on_cap_violation: false,
            filter_level: 2,
            filter_tolerance: 75,
            escalation: EscalationThresholds::default(),
        }
    }
}

/// Chaos levels at which the decay tick escalates (`autoMod.chaosCap`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationThresholds {
    #[serde(rename = "chatFilterLevel")]
    pub filter_level: u32,
    #[serde(rename = "kickForCap")]
    pub kick_on_cap: u32,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            filter_level: 3,
            kick_on_cap: 15,
        }
    }
}

impl LobbySettings {
    /// Clamp out-of-range values. Returns a description of each change.
    pub fn normalize(&mut self) -> Vec<String> {
        let mut changes = Vec::new();
        if self.auto_mod.filter_level > 3 {
            changes.push(format!(
                "autoMod.chatFilterLevel {} clamped to 3",
                self.auto_mod.filter_level
            ));
            self.auto_mod.filter_level = 3;
        }
        if self.auto_mod.cap_percent_threshold > 100 {
            changes.push(format!(
                "autoMod.capCap {} clamped to 100",
                self.auto_mod.cap_percent_threshold
            ));
            self.auto_mod.cap_percent_threshold = 100;
        }
        if self.auto_mod.filter_tolerance > 100 {
            changes.push(format!(
                "autoMod.chatFilterTolerance {} clamped to 100",
                self.auto_mod.filter_tolerance
            ));
            self.auto_mod.filter_tolerance = 100;
        }
        if self.client_ceiling == 0 {
            changes.push("clientCeiling 0 raised to 1".to_string());
            self.client_ceiling = 1;
        }
        if self.pulse_time == 0 {
            changes.push("pulseTime 0 reset to 20000".to_string());
            self.pulse_time = 20_000;
        }
        if self.max_idle_time == 0 {
            changes.push("maxIdleTime 0 reset to 60000".to_string());
            self.max_idle_time = 60_000;
        }
        changes
    }

    /// Period of the heartbeat/idle sweep: the shorter of idle and pulse time.
    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.max_idle_time.min(self.pulse_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = LobbySettings::default();
        assert_eq!(s.max_message_length, 512);
        assert_eq!(s.max_chat_history, 20);
        assert_eq!(s.max_idle_time, 60_000);
        assert_eq!(s.pulse_time, 20_000);
        assert_eq!(s.client_ceiling, 20);
        assert_eq!(s.max_clients_per_ipa, 2);
        assert_eq!(s.ipa_max_kicks, 4);
        assert_eq!(s.ipa_block_time, 200_000);
        assert_eq!(s.ipa_store_time, 100_000);
        assert!(s.auto_mod.on);
        assert_eq!(s.auto_mod.cap_percent_threshold, 80);
        assert_eq!(s.auto_mod.filter_level, 2);
        assert_eq!(s.auto_mod.filter_tolerance, 75);
        assert_eq!(s.auto_mod.escalation.filter_level, 3);
        assert_eq!(s.auto_mod.escalation.kick_on_cap, 15);
    }

    #[test]
    fn serializes_with_persisted_key_names() {
        let json = serde_json::to_value(LobbySettings::default()).unwrap();
        assert_eq!(json["maxClientsPerIPA"], 2);
        assert_eq!(json["ipaMaxKicks"], 4);
        assert_eq!(json["beVerbose"], false);
        assert_eq!(json["autoMod"]["capCap"], 80);
        assert_eq!(json["autoMod"]["kickForCap"], false);
        assert_eq!(json["autoMod"]["chaosCap"]["chatFilterLevel"], 3);
        assert_eq!(json["badTextFile"], "badtext.json");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: LobbySettings =
            serde_json::from_str(r#"{"port": 8080, "autoMod": {"chatFilterLevel": 1}}"#).unwrap();
        assert_eq!(s.port, 8080);
        assert_eq!(s.auto_mod.filter_level, 1);
        assert!(s.auto_mod.on);
        assert_eq!(s.max_chat_history, 20);
    }

    #[test]
    fn normalize_clamps() {
        let mut s = LobbySettings::default();
        s.auto_mod.filter_level = 9;
        s.auto_mod.filter_tolerance = 150;
        s.client_ceiling = 0;
        let changes = s.normalize();
        assert_eq!(changes.len(), 3);
        assert_eq!(s.auto_mod.filter_level, 3);
        assert_eq!(s.auto_mod.filter_tolerance, 100);
        assert_eq!(s.client_ceiling, 1);
    }

    #[test]
    fn normalize_leaves_defaults_alone() {
        let mut s = LobbySettings::default();
        assert!(s.normalize().is_empty());
        assert_eq!(s, LobbySettings::default());
    }

    #[test]
    fn heartbeat_interval_is_shorter_of_two() {
        let mut s = LobbySettings::default();
        assert_eq!(s.heartbeat_interval_ms(), 20_000);
        s.max_idle_time = 5_000;
        assert_eq!(s.heartbeat_interval_ms(), 5_000);
    }
}

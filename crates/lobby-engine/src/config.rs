use lobby_core::ids::SESSION_ID_RANGE;
use lobby_settings::{AutoModSettings, LobbySettings};

/// Messages closer together than this (from one session) are dropped as a burst.
pub const MESSAGE_BURST_MS: i64 = 1_000;
/// Repeats of the previous message inside this window are dropped.
pub const DUPLICATE_WINDOW_MS: i64 = 2_000;
/// Admissions closer together than this shrink capacity.
pub const ADMISSION_BURST_MS: i64 = 50;
pub const ADMISSION_BURST_PENALTY: usize = 3;
/// Slack on top of the pulse interval before a silent client is dropped.
pub const PULSE_GRACE_MS: i64 = 5_000;
/// Capacity/chaos decay period.
pub const DECAY_INTERVAL_MS: u64 = 10_000;

pub const WELCOME_SENDER: &str = "Server";

/// Room parameters, derived once from [`LobbySettings`].
#[derive(Clone, Debug)]
pub struct RoomConfig {
    pub max_message_length: usize,
    pub max_chat_history: usize,
    pub max_idle_ms: i64,
    pub pulse_ms: i64,
    pub client_ceiling: usize,
    pub max_clients_per_address: usize,
    pub max_kicks: u32,
    pub ban_window_ms: i64,
    pub store_window_ms: i64,
    pub welcome_message: String,
    pub auto_mod: AutoModSettings,
}

impl RoomConfig {
    pub fn from_settings(settings: &LobbySettings) -> Self {
        Self {
            max_message_length: settings.max_message_length,
            max_chat_history: settings.max_chat_history,
            max_idle_ms: to_ms(settings.max_idle_time),
            pulse_ms: to_ms(settings.pulse_time),
            client_ceiling: settings.client_ceiling.clamp(1, SESSION_ID_RANGE as usize),
            max_clients_per_address: settings.max_clients_per_ipa,
            max_kicks: settings.ipa_max_kicks,
            ban_window_ms: to_ms(settings.ipa_block_time),
            store_window_ms: to_ms(settings.ipa_store_time),
            welcome_message: settings.welcome_message.clone(),
            auto_mod: settings.auto_mod.clone(),
        }
    }

    /// Heartbeat tick period. Short enough to catch idle clients on time.
    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.max_idle_ms.min(self.pulse_ms).max(1) as u64
    }

    /// Keep-alive period advertised to clients in `p`.
    pub fn pulse_interval_ms(&self) -> u64 {
        self.pulse_ms.max(1) as u64
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self::from_settings(&LobbySettings::default())
    }
}

fn to_ms(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

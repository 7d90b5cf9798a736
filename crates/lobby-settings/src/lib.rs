//! # lobby-settings
//!
//! Configuration for the lobby server.
//!
//! Settings live in `config.json` (working directory by default). The file is
//! self-healing: missing keys are filled from [`LobbySettings::default()`],
//! unknown keys are stripped, and the repaired file is written back. Env vars
//! (`PORT`, `LOBBY_PORT`, `LOBBY_VERBOSE`) override the file for one run.
//!
//! The bad-word list is a separate JSON file named by `badTextFile`; failing
//! to load it is the one fatal startup error.

pub mod errors;
pub mod loader;
pub mod types;
pub mod wordlist;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_or_repair, settings_path, Loaded, RepairReport};
pub use types::{AutoModSettings, EscalationThresholds, LobbySettings};
pub use wordlist::{load_bad_words, BadWords};

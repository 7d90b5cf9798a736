pub mod errors;
pub mod ids;
pub mod messages;
pub mod transport;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

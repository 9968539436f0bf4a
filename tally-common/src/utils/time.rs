/// Returns the current UNIX timestamp in milliseconds.
///
/// Every deadline in the consensus engine (election timeout, heartbeat,
/// proof expiration, gossip liveness) is expressed on this clock.
pub fn current_time_millis() -> u64 {
    let millis = chrono::Utc::now().timestamp_millis();
    u64::try_from(millis).unwrap_or(0)
}

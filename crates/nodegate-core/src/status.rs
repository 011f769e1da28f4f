//! Session status codes.
//!
//! Every message carries the sender's status byte. Values `0..=7` are
//! handshake progress and only move forward until a reset. The high values
//! are error pseudo-states reported on top of the progress value.

/// Nothing received from the peer yet.
pub const UNCONNECTED: u8 = 0;
/// The peer's `INITIAL` has been accepted.
pub const PEER_UNKNOWN: u8 = 1;
/// Both sides hold each other's `INITIAL`.
pub const SETTINGS_EXCHANGED: u8 = 2;
/// Our stream seed has been sent, the peer's has not arrived.
pub const ESTABLISHING_STREAM: u8 = 3;
/// The peer's stream seed has been accepted and the decrypter built.
pub const STREAM_ESTABLISHED: u8 = 4;
/// Both streams are up; signatures are in flight.
pub const SIGNING: u8 = 5;
/// The peer's current key verified; waiting for proof with its old key.
pub const CONFIRM_OLD: u8 = 6;
/// The peer's signature verified; the channel is signed.
pub const ESTABLISHED: u8 = 7;

/// Signature verification or stream desync.
pub const CONFIRM_ERROR: u8 = 252;
/// Identity mismatch or operator-forced error.
pub const BASIC_ERROR: u8 = 253;
/// The embedding application declared the peer timed out.
pub const TIMEOUT_ERROR: u8 = 254;
/// The peer reported a hard error and expects a confirmation.
pub const PERMANENT_ERROR: u8 = 255;

/// Returns true for handshake progress values (not error pseudo-states).
pub fn is_progress(status: u8) -> bool {
    status <= ESTABLISHED
}

/// Human readable status name for logs.
pub fn describe(status: u8) -> &'static str {
    match status {
        UNCONNECTED => "unconnected",
        PEER_UNKNOWN => "peer-unknown",
        SETTINGS_EXCHANGED => "settings-exchanged",
        ESTABLISHING_STREAM => "establishing-stream",
        STREAM_ESTABLISHED => "stream-established",
        SIGNING => "signing",
        CONFIRM_OLD => "confirm-old",
        ESTABLISHED => "established",
        CONFIRM_ERROR => "confirm-error",
        BASIC_ERROR => "basic-error",
        TIMEOUT_ERROR => "timeout-error",
        PERMANENT_ERROR => "permanent-error",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_values_are_ordered() {
        let ladder = [
            UNCONNECTED,
            PEER_UNKNOWN,
            SETTINGS_EXCHANGED,
            ESTABLISHING_STREAM,
            STREAM_ESTABLISHED,
            SIGNING,
            CONFIRM_OLD,
            ESTABLISHED,
        ];
        assert!(ladder.windows(2).all(|w| w[0] < w[1]));
        assert!(ladder.iter().all(|s| is_progress(*s)));
    }

    #[test]
    fn error_values_are_not_progress() {
        for status in [CONFIRM_ERROR, BASIC_ERROR, TIMEOUT_ERROR, PERMANENT_ERROR] {
            assert!(!is_progress(status));
        }
        assert_eq!(describe(PERMANENT_ERROR), "permanent-error");
        assert_eq!(describe(42), "unknown");
    }
}

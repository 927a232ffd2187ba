//! Transport Position: the timebase client's view of playback position.
//! Each cycle's post-process step rotates `current_time` into
//! `pending_time` and back, preserving every field but the two the engine
//! itself owns (`usecs`, `frame_rate`) — see the open question in the
//! design notes on why this rotation exists at all.

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransportPosition {
    pub frame: u64,
    pub usecs: u64,
    pub frame_rate: u32,
    pub bar: u32,
    pub beat: u32,
    pub tick: u32,
    pub valid: bool,
}

impl TransportPosition {
    /// Roll `current` forward: the engine overwrites `frame`/`usecs`/
    /// `frame_rate`; every other field is carried over so that a timebase
    /// client writing to `pending_time` between cycles is not clobbered.
    pub fn rotate(current: &TransportPosition, frame: u64, usecs: u64, frame_rate: u32) -> TransportPosition {
        TransportPosition {
            frame,
            usecs,
            frame_rate,
            bar: current.bar,
            beat: current.beat,
            tick: current.tick,
            valid: current.valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_preserves_transport_fields_not_owned_by_engine() {
        let current = TransportPosition {
            frame: 10,
            usecs: 100,
            frame_rate: 48_000,
            bar: 2,
            beat: 3,
            tick: 480,
            valid: true,
        };
        let next = TransportPosition::rotate(&current, 266, 5_333, 48_000);
        assert_eq!(next.frame, 266);
        assert_eq!(next.usecs, 5_333);
        assert_eq!(next.bar, 2);
        assert_eq!(next.beat, 3);
        assert_eq!(next.tick, 480);
        assert!(next.valid);
    }
}

//! Media playback clocks.

use std::time::Instant;

/// Playback position of the media the overlay sits on.
pub trait PlaybackClock {
    /// Current position in seconds.
    fn position(&self) -> f64;

    fn is_paused(&self) -> bool;

    fn is_ended(&self) -> bool;

    fn is_playing(&self) -> bool {
        !self.is_paused() && !self.is_ended()
    }

    fn seek(&mut self, position: f64);

    /// Length learned after the fact (e.g. from the analyzed timeline) for
    /// media that did not report one.
    fn set_duration_hint(&mut self, _duration: f64) {}
}

/// Pausable, seekable clock advancing with wall time scaled by a playback rate.
#[derive(Clone, Debug)]
pub struct MediaClock {
    anchor_position: f64,
    playing_since: Option<Instant>,
    rate: f64,
    duration: Option<f64>,
}

impl MediaClock {
    /// A paused clock at position zero.
    pub fn new(rate: f64) -> Self {
        Self {
            anchor_position: 0.0,
            playing_since: None,
            rate: if rate.is_finite() && rate > 0.0 { rate } else { 1.0 },
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration.max(0.0));
        self
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn play(&mut self) {
        self.play_at(Instant::now());
    }

    pub fn play_at(&mut self, now: Instant) {
        if self.playing_since.is_none() {
            self.playing_since = Some(now);
        }
    }

    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn pause_at(&mut self, now: Instant) {
        self.anchor_position = self.position_at(now);
        self.playing_since = None;
    }

    pub fn position_at(&self, now: Instant) -> f64 {
        let raw = match self.playing_since {
            Some(since) => {
                self.anchor_position + now.saturating_duration_since(since).as_secs_f64() * self.rate
            }
            None => self.anchor_position,
        };
        match self.duration {
            Some(duration) => raw.min(duration),
            None => raw,
        }
    }

    fn seek_at(&mut self, position: f64, now: Instant) {
        let mut position = position.max(0.0);
        if let Some(duration) = self.duration {
            position = position.min(duration);
        }
        self.anchor_position = position;
        if self.playing_since.is_some() {
            self.playing_since = Some(now);
        }
    }
}

impl PlaybackClock for MediaClock {
    fn position(&self) -> f64 {
        self.position_at(Instant::now())
    }

    fn is_paused(&self) -> bool {
        self.playing_since.is_none()
    }

    fn is_ended(&self) -> bool {
        self.duration
            .map_or(false, |duration| self.position() >= duration)
    }

    fn seek(&mut self, position: f64) {
        self.seek_at(position, Instant::now());
    }

    fn set_duration_hint(&mut self, duration: f64) {
        if self.duration.is_none() && duration.is_finite() {
            self.duration = Some(duration.max(0.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn advances_only_while_playing() {
        let start = Instant::now();
        let mut clock = MediaClock::new(2.0);
        assert!(clock.is_paused());
        assert_eq!(clock.position_at(start + Duration::from_secs(5)), 0.0);

        clock.play_at(start);
        assert_eq!(clock.position_at(start + Duration::from_millis(500)), 1.0);

        clock.pause_at(start + Duration::from_secs(1));
        assert_eq!(clock.position_at(start + Duration::from_secs(10)), 2.0);
    }

    #[test]
    fn seek_and_duration_clamp() {
        let start = Instant::now();
        let mut clock = MediaClock::new(1.0).with_duration(3.0);
        clock.seek_at(10.0, start);
        assert_eq!(clock.position_at(start), 3.0);
        assert!(clock.is_ended());
        assert!(!clock.is_playing());

        clock.seek_at(-1.0, start);
        assert_eq!(clock.position_at(start), 0.0);
        assert!(!clock.is_ended());
    }

    #[test]
    fn duration_hint_only_fills_unknown_length() {
        let mut clock = MediaClock::new(1.0);
        clock.set_duration_hint(4.0);
        assert_eq!(clock.duration(), Some(4.0));
        clock.set_duration_hint(9.0);
        assert_eq!(clock.duration(), Some(4.0));
    }

    #[test]
    fn invalid_rate_falls_back_to_realtime() {
        assert_eq!(MediaClock::new(0.0).rate(), 1.0);
        assert_eq!(MediaClock::new(f64::NAN).rate(), 1.0);
    }
}

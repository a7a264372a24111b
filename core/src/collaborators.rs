//! Host-side services the survey driver calls into.
//!
//! The mobile shell implements these over the platform's location and audio
//! APIs. The stock implementations here cover headless use and tests.

use chrono::{Local, NaiveDateTime};

use crate::models::GpsFix;

pub trait LocationProvider {
    /// Latest fix, or `None` when location is unavailable or not permitted.
    fn current_fix(&mut self) -> Option<GpsFix>;
}

/// Audio feedback for the operator. Failures never affect acquisition.
pub trait CuePlayer {
    /// Start the excitation tone for the phone signal generator.
    fn play_tone(&mut self, frequency_hz: u32) -> Result<(), String>;
    fn stop_tone(&mut self) -> Result<(), String>;
    /// Short beep after a successful measurement.
    fn confirm(&mut self) -> Result<(), String>;
}

pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn current_fix(&mut self) -> Option<GpsFix> {
        None
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedLocation(pub GpsFix);

impl LocationProvider for FixedLocation {
    fn current_fix(&mut self) -> Option<GpsFix> {
        Some(self.0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SilentCues;

impl CuePlayer for SilentCues {
    fn play_tone(&mut self, _frequency_hz: u32) -> Result<(), String> {
        Ok(())
    }

    fn stop_tone(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn confirm(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Records every cue request; optionally fails tone playback.
#[derive(Clone, Debug, Default)]
pub struct RecordingCues {
    pub events: Vec<String>,
    pub fail_tones: bool,
}

impl CuePlayer for RecordingCues {
    fn play_tone(&mut self, frequency_hz: u32) -> Result<(), String> {
        self.events.push(format!("tone {frequency_hz}"));
        if self.fail_tones {
            return Err(format!("no audio asset for {frequency_hz} Hz"));
        }
        Ok(())
    }

    fn stop_tone(&mut self) -> Result<(), String> {
        self.events.push("stop".to_string());
        Ok(())
    }

    fn confirm(&mut self) -> Result<(), String> {
        self.events.push("beep".to_string());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

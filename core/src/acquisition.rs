//! Station acquisition state machine.
//!
//! [`Acquisition`] is a plain value. Every operator action or device outcome
//! is a method taking `&self` and returning a [`Transition`]: the next state
//! plus the [`Effect`]s a driver must carry out (connect, exchange, persist,
//! cue playback, disconnect). Outcomes of those effects come back in through
//! [`Acquisition::connected`], [`Acquisition::exchanged`] and
//! [`Acquisition::persisted`]. Rejected actions return an error and leave the
//! caller holding the unchanged state.
//!
//! # Flow
//!
//! ```text
//! Setup --start/resume--> Acquiring(station, index)
//!   fetch (no link)  -> Connect            -> connected(..)
//!   fetch (link up)  -> [PlayTone] Exchange -> exchanged(..) -> [StopTone] [ConfirmationCue]
//!   complete_station -> Persist            -> persisted(..)  -> Acquiring(station + 1, 0)
//!   finish           -> StopTone Disconnect -> Finished
//! ```

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::calc;
use crate::error::{CalcError, LinkError, RepositoryError, SurveyError, ValidationError};
use crate::link::SensorReading;
use crate::models::{
    GpsFix, Measurement, Project, SetupForm, StationNumber, SurveyConstants, FREQUENCIES_HZ,
    NO_COORDINATE,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Back,
}

/// What the operator's sensor indicator shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorStatus {
    Idle,
    Connecting,
    Loading,
    Success,
    Error,
}

/// Where a finished station goes in the repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveTarget {
    Append,
    Replace(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StationCursor {
    pub station: StationNumber,
    /// Index into [`FREQUENCIES_HZ`]; always in bounds.
    pub frequency_index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Acquiring(StationCursor),
    Finished,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Acquiring(_) => "acquisition",
            Phase::Finished => "finished survey",
        }
    }
}

/// The device or storage operation awaiting its outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pending {
    Connect,
    Exchange { frequency_hz: u32 },
    Persist,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Discover the sensor among bonded devices and open a session.
    Connect,
    PlayTone { frequency_hz: u32 },
    StopTone,
    Exchange { frequency_hz: u32 },
    ConfirmationCue,
    Persist {
        target: SaveTarget,
        station: StationNumber,
        project: Project,
    },
    Disconnect,
}

/// A sensor reading together with where and when it was taken.
#[derive(Clone, Debug, PartialEq)]
pub struct Capture {
    pub reading: SensorReading,
    pub position: Option<GpsFix>,
    pub captured_at: NaiveDateTime,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub state: Acquisition,
    pub effects: Vec<Effect>,
    /// Set when an effect outcome failed; the state already reflects recovery.
    pub failure: Option<SurveyError>,
}

impl Transition {
    fn to(state: Acquisition) -> Self {
        Self {
            state,
            effects: Vec::new(),
            failure: None,
        }
    }

    fn with(state: Acquisition, effects: Vec<Effect>) -> Self {
        Self {
            state,
            effects,
            failure: None,
        }
    }

    fn failed(state: Acquisition, effects: Vec<Effect>, failure: SurveyError) -> Self {
        Self {
            state,
            effects,
            failure: Some(failure),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Acquisition {
    phase: Phase,
    project: Option<Project>,
    target: SaveTarget,
    readings: BTreeMap<u32, Measurement>,
    pending: Option<Pending>,
    link_connected: bool,
    sensor: SensorStatus,
    tone_enabled: bool,
}

impl Default for Acquisition {
    fn default() -> Self {
        Self::new()
    }
}

impl Acquisition {
    pub fn new() -> Self {
        Self {
            phase: Phase::Setup,
            project: None,
            target: SaveTarget::Append,
            readings: BTreeMap::new(),
            pending: None,
            link_connected: false,
            sensor: SensorStatus::Idle,
            tone_enabled: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn save_target(&self) -> SaveTarget {
        self.target
    }

    pub fn pending(&self) -> Option<Pending> {
        self.pending
    }

    pub fn sensor_status(&self) -> SensorStatus {
        self.sensor
    }

    pub fn link_connected(&self) -> bool {
        self.link_connected
    }

    pub fn tone_enabled(&self) -> bool {
        self.tone_enabled
    }

    pub fn cursor(&self) -> Option<StationCursor> {
        match self.phase {
            Phase::Acquiring(cursor) => Some(cursor),
            _ => None,
        }
    }

    pub fn station(&self) -> Option<StationNumber> {
        self.cursor().map(|c| c.station)
    }

    pub fn current_frequency(&self) -> Option<u32> {
        self.cursor().map(|c| FREQUENCIES_HZ[c.frequency_index])
    }

    /// One-based position in the frequency list and the list length.
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.cursor()
            .map(|c| (c.frequency_index + 1, FREQUENCIES_HZ.len()))
    }

    pub fn measurement(&self, frequency_hz: u32) -> Option<&Measurement> {
        self.readings.get(&frequency_hz)
    }

    pub fn recorded_frequencies(&self) -> Vec<u32> {
        FREQUENCIES_HZ
            .iter()
            .copied()
            .filter(|f| self.readings.contains_key(f))
            .collect()
    }

    pub fn missing_frequencies(&self) -> Vec<u32> {
        FREQUENCIES_HZ
            .iter()
            .copied()
            .filter(|f| !self.readings.contains_key(f))
            .collect()
    }

    /// Validate the setup form and begin at the transect's first station.
    pub fn start(&self, form: &SetupForm, gps: Option<GpsFix>) -> Result<Transition, SurveyError> {
        self.require_setup("start")?;
        let (name, constants) = form.validate()?;
        let cursor = StationCursor {
            station: constants.first_station()?,
            frequency_index: 0,
        };

        let mut next = self.clone();
        next.project = Some(Project::new(name, constants, gps));
        next.phase = Phase::Acquiring(cursor);
        next.target = SaveTarget::Append;
        next.readings.clear();
        Ok(Transition::to(next))
    }

    /// Re-enter acquisition for `station` of a stored project. The station is
    /// acquired from scratch and will replace the record at `index`.
    pub fn resume(
        &self,
        project: Project,
        index: usize,
        station: StationNumber,
    ) -> Result<Transition, SurveyError> {
        self.require_setup("resume")?;
        let first = project.constants.first_station()?;
        if station.next().is_none() {
            return Err(ValidationError::NoNextStation { station: station.0 }.into());
        }
        if station < first {
            return Err(ValidationError::StationOutOfRange {
                station: station.0,
                first: first.0,
            }
            .into());
        }

        let mut next = self.clone();
        next.project = Some(project);
        next.phase = Phase::Acquiring(StationCursor {
            station,
            frequency_index: 0,
        });
        next.target = SaveTarget::Replace(index);
        next.readings.clear();
        Ok(Transition::to(next))
    }

    /// Correct the constants before anything depends on them. Once a reading
    /// has been captured or a station stored they are frozen.
    pub fn amend_constants(&self, constants: SurveyConstants) -> Result<Transition, SurveyError> {
        let cursor = self.active_cursor("amend constants")?;
        let project = self.project.as_ref().ok_or(SurveyError::WrongPhase {
            operation: "amend constants",
            phase: self.phase.name(),
        })?;
        if self.pending.is_some() || !self.readings.is_empty() || !project.stations.is_empty() {
            return Err(ValidationError::ConstantsFrozen.into());
        }

        let mut next = self.clone();
        let station = constants.first_station()?;
        if let Some(p) = next.project.as_mut() {
            p.constants = constants;
        }
        next.phase = Phase::Acquiring(StationCursor {
            station,
            frequency_index: cursor.frequency_index,
        });
        Ok(Transition::to(next))
    }

    pub fn set_tone_enabled(&self, enabled: bool) -> Transition {
        let mut next = self.clone();
        next.tone_enabled = enabled;
        if self.tone_enabled && !enabled {
            Transition::with(next, vec![Effect::StopTone])
        } else {
            Transition::to(next)
        }
    }

    /// Acquire the current frequency, connecting first if there is no link.
    /// A successful connect does not take a reading; fetch again for that.
    pub fn fetch(&self) -> Result<Transition, SurveyError> {
        let cursor = self.active_cursor("fetch")?;
        if self.pending.is_some() {
            return Err(SurveyError::FetchInProgress);
        }

        let mut next = self.clone();
        if !self.link_connected {
            next.pending = Some(Pending::Connect);
            next.sensor = SensorStatus::Connecting;
            return Ok(Transition::with(next, vec![Effect::Connect]));
        }

        let frequency_hz = FREQUENCIES_HZ[cursor.frequency_index];
        next.pending = Some(Pending::Exchange { frequency_hz });
        next.sensor = SensorStatus::Loading;
        let mut effects = Vec::with_capacity(2);
        if self.tone_enabled {
            effects.push(Effect::PlayTone { frequency_hz });
        }
        effects.push(Effect::Exchange { frequency_hz });
        Ok(Transition::with(next, effects))
    }

    /// Step through the frequency list, clamped at both ends.
    pub fn advance(&self, direction: Direction) -> Result<Transition, SurveyError> {
        let cursor = self.active_cursor("advance")?;
        let last = FREQUENCIES_HZ.len() - 1;
        let frequency_index = match direction {
            Direction::Forward => (cursor.frequency_index + 1).min(last),
            Direction::Back => cursor.frequency_index.saturating_sub(1),
        };

        let mut next = self.clone();
        next.phase = Phase::Acquiring(StationCursor {
            frequency_index,
            ..cursor
        });
        Ok(Transition::to(next))
    }

    /// Request persistence of the current station. Requires a reading for
    /// every frequency; otherwise nothing changes.
    pub fn complete_station(&self) -> Result<Transition, SurveyError> {
        let cursor = self.active_cursor("complete station")?;
        if self.pending.is_some() {
            return Err(SurveyError::FetchInProgress);
        }
        let missing = self.missing_frequencies();
        if !missing.is_empty() {
            return Err(ValidationError::IncompleteStation { missing }.into());
        }
        let project = self.project_with_current_station(cursor.station)?;

        let mut next = self.clone();
        next.pending = Some(Pending::Persist);
        Ok(Transition::with(
            next,
            vec![Effect::Persist {
                target: self.target,
                station: cursor.station,
                project,
            }],
        ))
    }

    /// Leave acquisition. Unsaved readings for the current station are dropped.
    pub fn finish(&self) -> Result<Transition, SurveyError> {
        self.active_cursor("finish")?;
        if self.pending.is_some() {
            return Err(SurveyError::FetchInProgress);
        }

        let mut next = self.clone();
        next.phase = Phase::Finished;
        next.readings.clear();
        next.link_connected = false;
        next.sensor = SensorStatus::Idle;
        Ok(Transition::with(
            next,
            vec![Effect::StopTone, Effect::Disconnect],
        ))
    }

    pub fn connected(&self, outcome: Result<(), LinkError>) -> Transition {
        let mut next = self.clone();
        if self.pending == Some(Pending::Connect) {
            next.pending = None;
        }
        match outcome {
            Ok(()) => {
                next.link_connected = true;
                next.sensor = SensorStatus::Success;
                Transition::to(next)
            }
            Err(e) => {
                next.link_connected = false;
                next.sensor = SensorStatus::Error;
                Transition::failed(next, Vec::new(), e.into())
            }
        }
    }

    /// Record the outcome of an exchange under the frequency it was issued
    /// for, overwriting any earlier reading of that frequency.
    pub fn exchanged(&self, outcome: Result<Capture, LinkError>) -> Transition {
        let mut next = self.clone();
        let (Some(Pending::Exchange { frequency_hz }), Phase::Acquiring(cursor)) =
            (self.pending, self.phase)
        else {
            return Transition::failed(
                next,
                Vec::new(),
                SurveyError::WrongPhase {
                    operation: "record exchange",
                    phase: self.phase.name(),
                },
            );
        };
        next.pending = None;

        let mut effects = Vec::new();
        if self.tone_enabled {
            effects.push(Effect::StopTone);
        }

        let capture = match outcome {
            Ok(capture) => capture,
            Err(e) => {
                next.link_connected = false;
                next.sensor = SensorStatus::Error;
                return Transition::failed(next, effects, e.into());
            }
        };

        let constants = match self.project.as_ref() {
            Some(project) => &project.constants,
            None => {
                next.sensor = SensorStatus::Error;
                return Transition::failed(
                    next,
                    effects,
                    SurveyError::WrongPhase {
                        operation: "record exchange",
                        phase: self.phase.name(),
                    },
                );
            }
        };

        match measure(frequency_hz, &capture, constants, cursor.station) {
            Ok(measurement) => {
                next.readings.insert(frequency_hz, measurement);
                next.sensor = SensorStatus::Success;
                effects.push(Effect::ConfirmationCue);
                Transition::with(next, effects)
            }
            Err(e) => {
                next.sensor = SensorStatus::Error;
                Transition::failed(next, effects, e.into())
            }
        }
    }

    /// On success the station becomes part of the project and acquisition
    /// moves to the next station. On failure the readings are kept so the
    /// save can be retried.
    pub fn persisted(&self, outcome: Result<usize, RepositoryError>) -> Transition {
        let mut next = self.clone();
        if self.pending == Some(Pending::Persist) {
            next.pending = None;
        }

        let index = match outcome {
            Ok(index) => index,
            Err(e) => return Transition::failed(next, Vec::new(), e.into()),
        };
        let Phase::Acquiring(cursor) = self.phase else {
            return Transition::to(next);
        };

        match self.project_with_current_station(cursor.station) {
            Ok(project) => next.project = Some(project),
            Err(e) => return Transition::failed(next, Vec::new(), e),
        }
        next.target = SaveTarget::Replace(index);
        next.readings.clear();
        let Some(station) = cursor.station.next() else {
            next.phase = Phase::Acquiring(StationCursor {
                frequency_index: 0,
                ..cursor
            });
            let failure = ValidationError::NoNextStation {
                station: cursor.station.0,
            };
            return Transition::failed(next, Vec::new(), failure.into());
        };
        next.phase = Phase::Acquiring(StationCursor {
            station,
            frequency_index: 0,
        });
        Transition::to(next)
    }

    fn require_setup(&self, operation: &'static str) -> Result<(), SurveyError> {
        match self.phase {
            Phase::Setup => Ok(()),
            phase => Err(SurveyError::WrongPhase {
                operation,
                phase: phase.name(),
            }),
        }
    }

    /// The cursor, or the error `operation` gets outside acquisition.
    pub fn active_cursor(&self, operation: &'static str) -> Result<StationCursor, SurveyError> {
        match self.phase {
            Phase::Acquiring(cursor) => Ok(cursor),
            phase => Err(SurveyError::WrongPhase {
                operation,
                phase: phase.name(),
            }),
        }
    }

    fn project_with_current_station(&self, station: StationNumber) -> Result<Project, SurveyError> {
        let project = self.project.as_ref().ok_or(SurveyError::WrongPhase {
            operation: "complete station",
            phase: self.phase.name(),
        })?;
        let mut measurements = Vec::with_capacity(FREQUENCIES_HZ.len());
        for frequency_hz in FREQUENCIES_HZ {
            match self.readings.get(&frequency_hz) {
                Some(m) => measurements.push(m.clone()),
                None => {
                    return Err(ValidationError::IncompleteStation {
                        missing: self.missing_frequencies(),
                    }
                    .into())
                }
            }
        }
        Ok(project.with_station(station, measurements))
    }
}

/// Build the stored measurement for one capture. The calculation runs on the
/// rounded values that end up in the record.
pub fn measure(
    frequency_hz: u32,
    capture: &Capture,
    constants: &SurveyConstants,
    station: StationNumber,
) -> Result<Measurement, CalcError> {
    let tx_current = to_fixed(capture.reading.current, 2);
    let rx_voltage = to_fixed(capture.reading.voltage * 1000.0, 2);
    let current_amps = tx_current.parse().unwrap_or(capture.reading.current);
    let voltage_mv = rx_voltage.parse().unwrap_or(capture.reading.voltage * 1000.0);

    let readings = calc::derive_checked(
        frequency_hz,
        current_amps,
        voltage_mv,
        constants.inter_coil_m,
        constants.average_resistivity,
    )?;

    let coordinate = |value: Option<f64>| {
        value
            .map(|v| to_fixed(v, 6))
            .unwrap_or_else(|| NO_COORDINATE.to_string())
    };

    Ok(Measurement {
        frequency: frequency_hz,
        tx_current,
        rx_voltage,
        latitude: coordinate(capture.position.map(|p| p.latitude)),
        longitude: coordinate(capture.position.map(|p| p.longitude)),
        distance: constants.distance_of(station),
        calculated_depth: readings.depth,
        calculated_conductivity: readings.conductivity,
        calculated_resistivity: readings.resistivity,
        date: capture.captured_at.format("%-m/%-d/%Y").to_string(),
        time: capture.captured_at.format("%-I:%M:%S %p").to_string(),
    })
}

/// Fixed-point text with ties rounded away from zero, so 0.125 becomes
/// "0.13" where `{:.2}` would give "0.12".
pub fn to_fixed(value: f64, digits: usize) -> String {
    let scale = 10f64.powi(digits as i32);
    let rounded = (value * scale).round() / scale;
    if rounded.is_finite() {
        format!("{rounded:.digits$}")
    } else {
        format!("{value:.digits$}")
    }
}

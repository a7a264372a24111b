//! Drives an [`Acquisition`] against real collaborators.
//!
//! Each operator action runs the pure transition, then carries out the
//! emitted effects in order, feeding device and storage outcomes back into
//! the state machine until no effects remain. Only one action runs at a time
//! because every method takes `&mut self`.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::acquisition::{Acquisition, Capture, Direction, Effect, SaveTarget, Transition};
use crate::collaborators::{Clock, CuePlayer, LocationProvider};
use crate::error::{RepositoryError, SurveyError};
use crate::link::{LinkClient, LinkTransport};
use crate::models::{SetupForm, StationNumber, SurveyConstants};
use crate::storage::Repository;

/// What a successful [`Surveyor::fetch`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The sensor link came up; fetch again to take the reading.
    Connected,
    Recorded { frequency_hz: u32 },
}

pub struct Surveyor<T, R, L, C, K>
where
    T: LinkTransport,
    R: Repository,
    L: LocationProvider,
    C: CuePlayer,
    K: Clock,
{
    state: Acquisition,
    link: LinkClient<T>,
    repository: R,
    location: L,
    cues: C,
    clock: K,
}

impl<T, R, L, C, K> Surveyor<T, R, L, C, K>
where
    T: LinkTransport,
    R: Repository,
    L: LocationProvider,
    C: CuePlayer,
    K: Clock,
{
    pub fn new(link: LinkClient<T>, repository: R, location: L, cues: C, clock: K) -> Self {
        Self {
            state: Acquisition::new(),
            link,
            repository,
            location,
            cues,
            clock,
        }
    }

    pub fn state(&self) -> &Acquisition {
        &self.state
    }

    pub fn link(&self) -> &LinkClient<T> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut LinkClient<T> {
        &mut self.link
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn repository_mut(&mut self) -> &mut R {
        &mut self.repository
    }

    pub fn cues(&self) -> &C {
        &self.cues
    }

    pub fn start(&mut self, form: &SetupForm) -> Result<(), SurveyError> {
        let gps = self.location.current_fix();
        let transition = self.state.start(form, gps)?;
        self.apply(transition)?;
        info!(station = ?self.state.station(), "survey started");
        Ok(())
    }

    /// Reopen stored project `index` to re-acquire `station`.
    pub fn resume(&mut self, index: usize, station: StationNumber) -> Result<(), SurveyError> {
        let Some(project) = self.repository.load(index)? else {
            let len = self.repository.list()?.len();
            return Err(RepositoryError::IndexOutOfRange { index, len }.into());
        };
        let transition = self.state.resume(project, index, station)?;
        self.apply(transition)?;
        info!(index, %station, "editing stored project");
        Ok(())
    }

    pub fn amend_constants(&mut self, constants: SurveyConstants) -> Result<(), SurveyError> {
        let transition = self.state.amend_constants(constants)?;
        self.apply(transition)
    }

    pub fn set_tone_enabled(&mut self, enabled: bool) -> Result<(), SurveyError> {
        let transition = self.state.set_tone_enabled(enabled);
        self.apply(transition)
    }

    pub fn fetch(&mut self) -> Result<FetchOutcome, SurveyError> {
        let transition = self.state.fetch()?;
        let exchanged = transition.effects.iter().find_map(|e| match e {
            Effect::Exchange { frequency_hz } => Some(*frequency_hz),
            _ => None,
        });
        self.apply(transition)?;
        Ok(match exchanged {
            Some(frequency_hz) => FetchOutcome::Recorded { frequency_hz },
            None => FetchOutcome::Connected,
        })
    }

    pub fn advance(&mut self, direction: Direction) -> Result<(), SurveyError> {
        let transition = self.state.advance(direction)?;
        self.apply(transition)
    }

    /// Save the current station and move to the next one. Returns the
    /// number of the station that was saved.
    pub fn complete_station(&mut self) -> Result<StationNumber, SurveyError> {
        let cursor = self.state.active_cursor("complete station")?;
        let transition = self.state.complete_station()?;
        self.apply(transition)?;
        info!(station = %cursor.station, "station saved");
        Ok(cursor.station)
    }

    pub fn finish(&mut self) -> Result<(), SurveyError> {
        let unsaved = self.state.recorded_frequencies();
        let transition = self.state.finish()?;
        if !unsaved.is_empty() {
            warn!(?unsaved, "finishing with unsaved readings");
        }
        self.apply(transition)
    }

    /// Commit `transition`, then run effects until none remain. Returns the
    /// first failure reported along the way.
    fn apply(&mut self, transition: Transition) -> Result<(), SurveyError> {
        let mut effects: VecDeque<Effect> = VecDeque::new();
        let mut failure = None;
        self.commit(transition, &mut effects, &mut failure);

        while let Some(effect) = effects.pop_front() {
            if let Some(next) = self.perform(effect) {
                self.commit(next, &mut effects, &mut failure);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    fn commit(
        &mut self,
        transition: Transition,
        effects: &mut VecDeque<Effect>,
        failure: &mut Option<SurveyError>,
    ) {
        self.state = transition.state;
        effects.extend(transition.effects);
        if let Some(e) = transition.failure {
            warn!(error = %e, "survey step failed");
            failure.get_or_insert(e);
        }
    }

    fn perform(&mut self, effect: Effect) -> Option<Transition> {
        debug!(?effect, "performing effect");
        match effect {
            Effect::Connect => {
                let outcome = self.link.discover_and_connect().map(|_| ());
                Some(self.state.connected(outcome))
            }
            Effect::Exchange { frequency_hz } => {
                let outcome = self.link.exchange(frequency_hz).map(|reading| Capture {
                    reading,
                    position: self.location.current_fix(),
                    captured_at: self.clock.now(),
                });
                Some(self.state.exchanged(outcome))
            }
            Effect::Persist {
                target,
                station,
                project,
            } => {
                let outcome = match target {
                    SaveTarget::Append => self.repository.append(project),
                    SaveTarget::Replace(index) => {
                        self.repository.replace(index, project).map(|()| index)
                    }
                };
                if let Ok(index) = outcome {
                    debug!(%station, index, "project stored");
                }
                Some(self.state.persisted(outcome))
            }
            Effect::PlayTone { frequency_hz } => {
                if let Err(e) = self.cues.play_tone(frequency_hz) {
                    warn!(frequency_hz, error = %e, "tone playback failed");
                }
                None
            }
            Effect::StopTone => {
                if let Err(e) = self.cues.stop_tone() {
                    warn!(error = %e, "stopping tone failed");
                }
                None
            }
            Effect::ConfirmationCue => {
                if let Err(e) = self.cues.confirm() {
                    warn!(error = %e, "confirmation cue failed");
                }
                None
            }
            Effect::Disconnect => {
                self.link.disconnect();
                None
            }
        }
    }
}

impl<T, R, L, C, K> Drop for Surveyor<T, R, L, C, K>
where
    T: LinkTransport,
    R: Repository,
    L: LocationProvider,
    C: CuePlayer,
    K: Clock,
{
    fn drop(&mut self) {
        if let Err(e) = self.cues.stop_tone() {
            warn!(error = %e, "stopping tone on teardown failed");
        }
        self.link.disconnect();
    }
}

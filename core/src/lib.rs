pub mod acquisition;
pub mod calc;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod ffi;
pub mod link;
pub mod link_mock;
#[cfg(feature = "serial")]
pub mod link_serial;
pub mod logging;
pub mod models;
pub mod storage;
pub mod survey;

uniffi::include_scaffolding!("emsurvey");

pub use acquisition::{Acquisition, Capture, Direction, Effect, Phase, SaveTarget, SensorStatus};
pub use calc::Readings;
pub use config::SurveyConfig;
pub use error::{CalcError, ConfigError, LinkError, RepositoryError, SurveyError, ValidationError};
pub use ffi::{derive_readings, first_station_number, frequency_list, station_distance};
pub use link::{DeviceInfo, LinkClient, LinkState, LinkTransport, SensorReading};
pub use models::{
    GpsFix, Measurement, Project, SetupForm, StationNumber, SurveyConstants, FREQUENCIES_HZ,
};
pub use storage::{FileStore, JsonRepository, KeyValueStore, MemoryStore, Repository};
pub use survey::{FetchOutcome, Surveyor};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calc;
use crate::error::ValidationError;

/// Excitation frequencies in Hz, in acquisition order.
pub const FREQUENCIES_HZ: [u32; 8] = [813, 559, 407, 254, 203, 153, 102, 33];

/// Placeholder written for a coordinate when no fix is available.
pub const NO_COORDINATE: &str = "0.000000";

pub fn frequency_index(frequency_hz: u32) -> Option<usize> {
    FREQUENCIES_HZ.iter().position(|f| *f == frequency_hz)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationNumber(pub u32);

impl StationNumber {
    /// The following station, or `None` past the last representable number.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(StationNumber)
    }
}

impl fmt::Display for StationNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Survey geometry fixed for the lifetime of a project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyConstants {
    #[serde(alias = "transcat", deserialize_with = "lenient::number")]
    pub transect: u32,
    #[serde(rename = "interstation", deserialize_with = "lenient::real")]
    pub inter_station_m: f64,
    #[serde(deserialize_with = "lenient::real")]
    pub average_resistivity: f64,
    #[serde(rename = "intercoil", deserialize_with = "lenient::real")]
    pub inter_coil_m: f64,
}

impl SurveyConstants {
    pub fn first_station(&self) -> Result<StationNumber, ValidationError> {
        calc::first_station_number(self.transect).ok_or_else(|| ValidationError::InvalidField {
            field: "transect",
            value: self.transect.to_string(),
        })
    }

    pub fn distance_of(&self, station: StationNumber) -> f64 {
        calc::station_distance(station, self.transect, self.inter_station_m)
    }
}

/// Raw operator input from the project setup screen.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SetupForm {
    pub name: String,
    pub transect: String,
    pub inter_station: String,
    pub average_resistivity: String,
    pub inter_coil: String,
}

impl SetupForm {
    /// Check that every field is present and numeric, returning the trimmed
    /// project name and the parsed constants.
    pub fn validate(&self) -> Result<(String, SurveyConstants), ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        let transect: u32 = parse_field("transect", &self.transect)?;
        if transect > calc::MAX_TRANSECT {
            return Err(ValidationError::InvalidField {
                field: "transect",
                value: self.transect.trim().to_string(),
            });
        }
        let constants = SurveyConstants {
            transect,
            inter_station_m: parse_real("inter_station", &self.inter_station)?,
            average_resistivity: parse_real("average_resistivity", &self.average_resistivity)?,
            inter_coil_m: parse_real("inter_coil", &self.inter_coil)?,
        };
        Ok((name.to_string(), constants))
    }
}

fn parse_field<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    raw.parse().map_err(|_| ValidationError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

fn parse_real(field: &'static str, raw: &str) -> Result<f64, ValidationError> {
    let value: f64 = parse_field(field, raw)?;
    if !value.is_finite() {
        return Err(ValidationError::InvalidField {
            field,
            value: raw.trim().to_string(),
        });
    }
    Ok(value)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
}

/// One frequency's reading at one station.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub frequency: u32,
    /// Amps, two decimals.
    pub tx_current: String,
    /// Millivolts, two decimals.
    pub rx_voltage: String,
    pub latitude: String,
    pub longitude: String,
    /// Derived values are `null` in records where the calculation produced
    /// a non-finite number; those read back as NaN.
    #[serde(deserialize_with = "lenient::real")]
    pub distance: f64,
    #[serde(deserialize_with = "lenient::real")]
    pub calculated_depth: f64,
    #[serde(deserialize_with = "lenient::real")]
    pub calculated_conductivity: f64,
    #[serde(deserialize_with = "lenient::real")]
    pub calculated_resistivity: f64,
    pub date: String,
    pub time: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(alias = "common")]
    pub constants: SurveyConstants,
    #[serde(default)]
    pub stations: BTreeMap<StationNumber, Vec<Measurement>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsFix>,
}

impl Project {
    pub fn new(name: String, constants: SurveyConstants, gps: Option<GpsFix>) -> Self {
        Self {
            name,
            constants,
            stations: BTreeMap::new(),
            gps,
        }
    }

    pub fn station(&self, number: StationNumber) -> Option<&[Measurement]> {
        self.stations.get(&number).map(Vec::as_slice)
    }

    /// Copy of this project with `number` set to `measurements`, replacing
    /// any earlier readings for that station wholesale.
    pub fn with_station(&self, number: StationNumber, measurements: Vec<Measurement>) -> Self {
        let mut project = self.clone();
        project.stations.insert(number, measurements);
        project
    }
}

/// Older records stored the constants as the raw text fields.
mod lenient {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText<T> {
        Number(T),
        Text(String),
    }

    pub fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr,
        T::Err: Display,
    {
        match NumberOrText::<T>::deserialize(deserializer)? {
            NumberOrText::Number(n) => Ok(n),
            NumberOrText::Text(s) => s.trim().parse().map_err(D::Error::custom),
        }
    }

    /// A real that may also be stored as text or as `null`. Anything that is
    /// not a number reads as NaN, like the mobile app's own arithmetic did.
    pub fn real<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<NumberOrText<f64>>::deserialize(deserializer)? {
            Some(NumberOrText::Number(n)) => n,
            Some(NumberOrText::Text(s)) => s.trim().parse().unwrap_or(f64::NAN),
            None => f64::NAN,
        })
    }
}

use thiserror::Error;

/// Error type for derived-quantity calculation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalcError {
    #[error("invalid reading at {frequency_hz} Hz: {quantity} is not finite")]
    InvalidReading { frequency_hz: u32, quantity: String },
}

/// Error type for the sensor link and its transports.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("device {address} is not among the bonded devices")]
    DeviceNotFound { address: String },

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("timed out waiting for the device to respond")]
    Timeout,

    #[error("link error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("no connected session")]
    NotConnected,
}

/// Error type for the durable project collection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("index {index} out of range for {len} projects")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupt collection under key {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// Operator-facing validation failures. None of these change state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("station incomplete, missing {missing:?} Hz")]
    IncompleteStation { missing: Vec<u32> },

    #[error("survey constants are frozen once readings have been captured")]
    ConstantsFrozen,

    #[error("station {station} precedes the first station {first} of the transect")]
    StationOutOfRange { station: u32, first: u32 },

    #[error("station {station} has no following station number")]
    NoNextStation { station: u32 },
}

/// Umbrella error for survey operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurveyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Calc(#[from] CalcError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("{operation} is not allowed during {phase}")]
    WrongPhase {
        operation: &'static str,
        phase: &'static str,
    },

    #[error("a device operation is already pending")]
    FetchInProgress,
}

impl SurveyError {
    /// True when the error dropped the sensor link and a new connect is needed.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, SurveyError::Link(_))
    }
}

/// Error type for configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CalcError::InvalidReading {
            frequency_hz: 813,
            quantity: "conductivity".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid reading at 813 Hz: conductivity is not finite"
        );

        let err = RepositoryError::IndexOutOfRange { index: 4, len: 2 };
        assert_eq!(err.to_string(), "index 4 out of range for 2 projects");

        let err = ValidationError::IncompleteStation {
            missing: vec![102, 33],
        };
        assert_eq!(err.to_string(), "station incomplete, missing [102, 33] Hz");

        let err: SurveyError = LinkError::Timeout.into();
        assert_eq!(
            err.to_string(),
            "timed out waiting for the device to respond"
        );
    }

    #[test]
    fn test_link_failure_classification() {
        assert!(SurveyError::from(LinkError::NotConnected).is_link_failure());
        assert!(SurveyError::from(LinkError::MalformedResponse("x".into())).is_link_failure());
        assert!(!SurveyError::from(ValidationError::ConstantsFrozen).is_link_failure());
        assert!(!SurveyError::FetchInProgress.is_link_failure());
    }
}

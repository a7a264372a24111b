//! Plain-typed entry points exported to the mobile shell.

use crate::calc::{self, Readings};
use crate::error::CalcError;
use crate::models::{StationNumber, FREQUENCIES_HZ};

pub fn frequency_list() -> Vec<u32> {
    FREQUENCIES_HZ.to_vec()
}

/// `None` when the transect is too large to number its stations.
pub fn first_station_number(transect: u32) -> Option<u32> {
    calc::first_station_number(transect).map(|s| s.0)
}

pub fn station_distance(station: u32, transect: u32, inter_station_m: f64) -> f64 {
    calc::station_distance(StationNumber(station), transect, inter_station_m)
}

pub fn derive_readings(
    frequency_hz: u32,
    tx_current_amps: f64,
    rx_voltage_mv: f64,
    inter_coil_m: f64,
    average_resistivity: f64,
) -> Result<Readings, CalcError> {
    calc::derive_checked(
        frequency_hz,
        tx_current_amps,
        rx_voltage_mv,
        inter_coil_m,
        average_resistivity,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_list_order() {
        assert_eq!(frequency_list(), vec![813, 559, 407, 254, 203, 153, 102, 33]);
    }

    #[test]
    fn test_station_helpers() {
        assert_eq!(first_station_number(3), Some(301));
        assert_eq!(first_station_number(50_000_000), None);
        assert_eq!(station_distance(305, 3, 12.5), 50.0);
    }

    #[test]
    fn test_derive_readings_rejects_zero_coil() {
        assert!(matches!(
            derive_readings(813, 0.5, 10.0, 0.0, 100.0),
            Err(CalcError::InvalidReading { frequency_hz: 813, .. })
        ));
    }
}

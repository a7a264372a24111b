//! Derived quantities for a single frequency reading.
//!
//! Turns one transmit-current/receive-voltage pair into apparent
//! conductivity, resistivity and investigation depth using the fixed
//! low-induction-number approximation used in the field. All functions here
//! are pure; callers decide what to do with non-finite results.

use crate::error::CalcError;
use crate::models::StationNumber;

// ============================================================================
// Physical Constants
// ============================================================================

/// Field-strength scale applied to the received voltage.
const HT_SCALE: f64 = 100.0;

/// Primary-field correction numerator (per metre of coil separation).
const PRIMARY_FIELD_TERM: f64 = 0.000_002_32;

/// μ0·π, the denominator of the conductivity expression.
const MU0_PI: f64 = 0.000_003_947_8;

/// Final scaling of the conductivity expression.
const CONDUCTIVITY_SCALE: f64 = 1e8;

/// Ω·m per unit of inverse conductivity.
const RESISTIVITY_SCALE: f64 = 10_000.0;

/// Skin-depth coefficient, 503 / 5.
const DEPTH_COEFFICIENT: f64 = 503.0 / 5.0;

/// Station numbers per transect block.
const STATIONS_PER_TRANSECT: u32 = 100;

/// Largest transect whose first station number fits in a `u32`.
pub const MAX_TRANSECT: u32 = (u32::MAX - 1) / STATIONS_PER_TRANSECT;

// ============================================================================
// Public API
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings {
    pub conductivity: f64,
    pub resistivity: f64,
    /// Metres, negative below surface.
    pub depth: f64,
}

/// Derive conductivity, resistivity and depth for one reading.
///
/// `tx_current_amps` is part of the reading but does not enter the
/// approximation. A zero `inter_coil_m` or a zero conductivity produces
/// non-finite output; see [`derive_checked`].
pub fn derive(
    frequency_hz: u32,
    _tx_current_amps: f64,
    rx_voltage_millivolts: f64,
    inter_coil_m: f64,
    average_resistivity: f64,
) -> Readings {
    let frequency = f64::from(frequency_hz);
    let rx_voltage_volts = rx_voltage_millivolts / 1000.0;

    let ht = (HT_SCALE * rx_voltage_volts) / (4.0 * inter_coil_m);
    let term1 = 2.0 * ht;
    let term2 = (PRIMARY_FIELD_TERM * inter_coil_m) / inter_coil_m.powi(3);

    let conductivity =
        ((term1 - term2) / MU0_PI * frequency * inter_coil_m.powi(2)) / CONDUCTIVITY_SCALE;
    let resistivity = (1.0 / conductivity) * RESISTIVITY_SCALE;
    let depth = -DEPTH_COEFFICIENT * (average_resistivity / frequency).sqrt();

    Readings {
        conductivity,
        resistivity,
        depth,
    }
}

/// [`derive`], rejecting any non-finite output as an invalid reading.
pub fn derive_checked(
    frequency_hz: u32,
    tx_current_amps: f64,
    rx_voltage_millivolts: f64,
    inter_coil_m: f64,
    average_resistivity: f64,
) -> Result<Readings, CalcError> {
    let readings = derive(
        frequency_hz,
        tx_current_amps,
        rx_voltage_millivolts,
        inter_coil_m,
        average_resistivity,
    );
    for (quantity, value) in [
        ("conductivity", readings.conductivity),
        ("resistivity", readings.resistivity),
        ("depth", readings.depth),
    ] {
        if !value.is_finite() {
            return Err(CalcError::InvalidReading {
                frequency_hz,
                quantity: quantity.to_string(),
            });
        }
    }
    Ok(readings)
}

/// `transect * 100 + 1`, or `None` above [`MAX_TRANSECT`].
pub fn first_station_number(transect: u32) -> Option<StationNumber> {
    transect
        .checked_mul(STATIONS_PER_TRANSECT)
        .and_then(|n| n.checked_add(1))
        .map(StationNumber)
}

/// Signed distance in metres of `station` from the first station of `transect`.
pub fn station_distance(station: StationNumber, transect: u32, inter_station_m: f64) -> f64 {
    let first = i64::from(transect) * i64::from(STATIONS_PER_TRANSECT) + 1;
    let offset = i64::from(station.0) - first;
    offset as f64 * inter_station_m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FREQUENCIES_HZ;

    #[test]
    fn test_known_values_unit_coil() {
        // 0.01 V received over a 1 m coil pair with 100 Ω·m background.
        let r = derive(813, 0.5, 10.0, 1.0, 100.0);
        assert!((r.conductivity - 1.029_682_643_092_355).abs() < 1e-12);
        assert!((r.resistivity - 9_711.730_179_279_2).abs() < 1e-6);
        assert!((r.depth - -35.281_960_378_744_29).abs() < 1e-9);

        let r = derive(33, 0.5, 10.0, 1.0, 100.0);
        assert!((r.conductivity - 0.041_795_236_435_483_06).abs() < 1e-12);
        assert!((r.depth - -175.122_121_891_432).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic() {
        for f in FREQUENCIES_HZ {
            let a = derive(f, 0.37, 12.34, 1.7, 85.0);
            let b = derive(f, 0.37, 12.34, 1.7, 85.0);
            assert_eq!(a.conductivity.to_bits(), b.conductivity.to_bits());
            assert_eq!(a.resistivity.to_bits(), b.resistivity.to_bits());
            assert_eq!(a.depth.to_bits(), b.depth.to_bits());
        }
    }

    #[test]
    fn test_current_does_not_affect_result() {
        assert_eq!(derive(407, 0.1, 5.0, 2.0, 50.0), derive(407, 3.0, 5.0, 2.0, 50.0));
    }

    #[test]
    fn test_depth_deepens_with_lower_frequency() {
        let depths: Vec<f64> = FREQUENCIES_HZ
            .iter()
            .map(|f| derive(*f, 0.5, 10.0, 1.0, 100.0).depth)
            .collect();
        assert!(depths.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_zero_inter_coil_is_invalid() {
        let err = derive_checked(813, 0.5, 10.0, 0.0, 100.0).unwrap_err();
        assert!(matches!(err, CalcError::InvalidReading { frequency_hz: 813, .. }));
    }

    #[test]
    fn test_negative_resistivity_is_invalid() {
        let err = derive_checked(813, 0.5, 10.0, 1.0, -1.0).unwrap_err();
        assert_eq!(
            err,
            CalcError::InvalidReading {
                frequency_hz: 813,
                quantity: "depth".to_string()
            }
        );
    }

    #[test]
    fn test_station_numbering() {
        assert_eq!(first_station_number(3), Some(StationNumber(301)));
        assert_eq!(station_distance(StationNumber(301), 3, 5.0), 0.0);
        assert_eq!(station_distance(StationNumber(302), 3, 5.0), 5.0);
        assert_eq!(station_distance(StationNumber(300), 3, 5.0), -5.0);
    }

    #[test]
    fn test_station_numbering_upper_bound() {
        assert_eq!(
            first_station_number(MAX_TRANSECT),
            Some(StationNumber(MAX_TRANSECT * 100 + 1))
        );
        assert_eq!(first_station_number(MAX_TRANSECT + 1), None);
        assert_eq!(first_station_number(u32::MAX), None);
        assert_eq!(station_distance(StationNumber(0), u32::MAX, 1.0), -429_496_729_501.0);
    }
}

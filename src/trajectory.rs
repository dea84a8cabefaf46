use log::debug;
use nalgebra::Vector3;

use crate::state_machine::CRUISE_ALTITUDE;

/// Returns the mission trajectory: the four corners of a closed 10 m square
/// at cruise altitude, traversed counter-clockwise and ending back over the
/// start. Deterministic; altitude is up-positive.
pub fn compute_trajectory() -> Vec<Vector3<f32>> {
    debug!("calculating trajectory");
    vec![
        Vector3::new(10.0, 0.0, CRUISE_ALTITUDE),
        Vector3::new(10.0, 10.0, CRUISE_ALTITUDE),
        Vector3::new(0.0, 10.0, CRUISE_ALTITUDE),
        Vector3::new(0.0, 0.0, CRUISE_ALTITUDE),
    ]
}

//! Checks a requested charging current against the limits of the installation and the device.

use crate::error::{Error, Result};

/// Limits a new Icmax value has to respect, all in amperes.
///
/// `installation_limit` (Idefault) and `rated` (Irated) come from the device
/// and must be read right before validating, as an installer can change them
/// at any time. `minimum` comes from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentLimitBounds {
    pub minimum: f64,
    /// Idefault.
    pub installation_limit: f64,
    /// Irated.
    pub rated: f64,
    /// Icmax as configured when the bounds were read, if it was read.
    pub configured: Option<f64>,
}

impl CurrentLimitBounds {
    /// Highest current a write may request.
    pub fn ceiling(&self) -> f64 {
        self.installation_limit.min(self.rated)
    }
}

/// Accept `requested` unchanged or say which bound it violates.
///
/// The checks run in a fixed order: minimum, installation limit, rated capacity.
/// Both ceilings are checked independently so a request between a lower rated
/// current and a higher installation limit is still caught.
pub fn validate_icmax_request(requested: f64, bounds: &CurrentLimitBounds) -> Result<f64> {
    if requested.is_nan() || requested < bounds.minimum {
        return Err(Error::BelowMinimum {
            requested,
            minimum: bounds.minimum,
        });
    }
    if requested > bounds.installation_limit {
        return Err(Error::ExceedsInstallationLimit {
            requested,
            limit: bounds.installation_limit,
        });
    }
    if requested > bounds.rated {
        return Err(Error::ExceedsRatedCapacity {
            requested,
            rated: bounds.rated,
        });
    }
    Ok(requested)
}

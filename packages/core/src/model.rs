//! Reference data shared by every component: identifiers, coordinates,
//! and the externally owned pharmacy and drug records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LocatorError, LocatorResult};

/// Pharmacy identifier. Ordered so distance ties break deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PharmacyId(pub Uuid);

impl PharmacyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PharmacyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PharmacyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PharmacyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Drug identifier, owned by the external catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrugId(pub Uuid);

impl DrugId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DrugId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DrugId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for DrugId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// WGS84 point. Construction validates the range, so a `Coordinate`
/// in hand is always usable for distance math.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> LocatorResult<Self> {
        let lat_ok = latitude.is_finite() && latitude.abs() <= 90.0;
        let lon_ok = longitude.is_finite() && longitude.abs() <= 180.0;
        if !lat_ok || !lon_ok {
            return Err(LocatorError::InvalidCoordinate { latitude, longitude });
        }
        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Set by the external verification workflow; read-only here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VerificationStatus::Pending),
            "verified" => Ok(VerificationStatus::Verified),
            "rejected" => Ok(VerificationStatus::Rejected),
            other => Err(format!("unknown verification status: {}", other)),
        }
    }
}

/// The slice of a pharmacy this core cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pharmacy {
    pub id: PharmacyId,
    pub location: Coordinate,
    pub status: VerificationStatus,
    pub service_radius_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drug {
    pub id: DrugId,
    pub category_id: Option<Uuid>,
    pub name: String,
}

//! Pharmacy location index and great-circle distance.

pub mod haversine;
pub mod index;

pub use haversine::{haversine_km, EARTH_RADIUS_KM};
pub use index::{Neighbor, SpatialIndex};

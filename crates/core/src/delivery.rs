//! Delivery-zone gate.
//!
//! Two independent rules decide whether an order can be delivered:
//!
//! - [`DeliveryZone`]: great-circle distance from the shop, inclusive radius
//! - [`PostalCodeAllowlist`]: exact match against a fixed set of postal codes
//!
//! The two rules are not equivalent at the boundary and are evaluated at
//! different points of checkout, so they are kept as separate types. Both
//! fail closed: anything that cannot be evaluated is denied.

use serde::{Deserialize, Deserializer, Serialize};

/// Mean Earth radius in statute miles.
pub const EARTH_RADIUS_MILES: f64 = 3958.761;

/// Shown when the address has no postal code.
pub const MISSING_POSTAL_CODE_MESSAGE: &str = "Postal code is missing.";

/// Shown when the coordinate gate is evaluated without a usable location.
pub const MISSING_LOCATION_MESSAGE: &str = "A delivery location is required.";

/// Shown when the postal code is outside the allowlist.
pub const OUTSIDE_AREA_MESSAGE: &str =
    "We currently only deliver within the Cape Girardeau area (10-mile radius).";

/// Shown when the coordinate is beyond the delivery radius.
pub const OUTSIDE_RADIUS_MESSAGE: &str =
    "You are outside the delivery zone. Please contact us on Instagram to arrange delivery.";

/// Shown when eligibility could not be confirmed at all.
pub const ZONE_CHECK_UNAVAILABLE_MESSAGE: &str = "An unexpected error occurred on our end.";

// =============================================================================
// Coordinates
// =============================================================================

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both components are finite numbers.
    #[must_use]
    pub const fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Great-circle distance to `other` in miles.
    #[must_use]
    pub fn distance_miles(&self, other: &Self) -> f64 {
        haversine_miles(*self, *other)
    }
}

/// Great-circle distance between two points in miles (haversine formula).
#[must_use]
pub fn haversine_miles(from: Coordinate, to: Coordinate) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lng = (to.lng - from.lng).to_radians();
    let half_lat = (d_lat / 2.0).sin();
    let half_lng = (d_lng / 2.0).sin();

    let a = half_lat.mul_add(
        half_lat,
        from.lat.to_radians().cos() * to.lat.to_radians().cos() * half_lng * half_lng,
    );
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_MILES * c
}

// =============================================================================
// Results and errors
// =============================================================================

/// Outcome of a zone check. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryZoneResult {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DeliveryZoneResult {
    #[must_use]
    pub const fn allowed() -> Self {
        Self {
            allowed: true,
            message: None,
        }
    }

    #[must_use]
    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: Some(message.into()),
        }
    }
}

/// Why a zone check could not produce a positive answer.
///
/// Both variants collapse to `allowed = false` for the caller; they only
/// differ in the message shown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZoneCheckError {
    /// A required address field is missing or unusable.
    #[error("invalid address: {0}")]
    InvalidAddress(&'static str),

    /// The check itself failed (network or server error).
    #[error("zone check unavailable: {0}")]
    ZoneCheckUnavailable(String),
}

impl ZoneCheckError {
    /// Message safe to show to the customer.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidAddress(message) => *message,
            Self::ZoneCheckUnavailable(_) => ZONE_CHECK_UNAVAILABLE_MESSAGE,
        }
    }
}

impl From<ZoneCheckError> for DeliveryZoneResult {
    fn from(err: ZoneCheckError) -> Self {
        Self::denied(err.user_message())
    }
}

// =============================================================================
// Coordinate gate
// =============================================================================

/// A circular delivery area around a fixed origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryZone {
    origin: Coordinate,
    radius_miles: f64,
}

impl DeliveryZone {
    /// Ten miles around the shop in Cape Girardeau, Missouri.
    pub const CAPE_GIRARDEAU: Self = Self::new(Coordinate::new(37.3059, -89.5181), 10.0);

    #[must_use]
    pub const fn new(origin: Coordinate, radius_miles: f64) -> Self {
        Self {
            origin,
            radius_miles,
        }
    }

    #[must_use]
    pub const fn origin(&self) -> Coordinate {
        self.origin
    }

    #[must_use]
    pub const fn radius_miles(&self) -> f64 {
        self.radius_miles
    }

    /// Whether a distance from the origin is deliverable. The radius is
    /// inclusive.
    #[must_use]
    pub fn allows_distance(&self, miles: f64) -> bool {
        miles <= self.radius_miles
    }

    /// Whether `point` lies inside the zone. Non-finite points are outside.
    #[must_use]
    pub fn contains(&self, point: Coordinate) -> bool {
        point.is_finite() && self.allows_distance(haversine_miles(self.origin, point))
    }

    /// Evaluate an optional latitude/longitude pair.
    ///
    /// # Errors
    ///
    /// Returns [`ZoneCheckError::InvalidAddress`] unless both components are
    /// present and finite.
    pub fn locate(&self, lat: Option<f64>, lng: Option<f64>) -> Result<bool, ZoneCheckError> {
        match (lat, lng) {
            (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => {
                Ok(self.contains(Coordinate::new(lat, lng)))
            }
            _ => Err(ZoneCheckError::InvalidAddress(MISSING_LOCATION_MESSAGE)),
        }
    }

    /// Evaluate an optional latitude/longitude pair into a result.
    #[must_use]
    pub fn check(&self, lat: Option<f64>, lng: Option<f64>) -> DeliveryZoneResult {
        match self.locate(lat, lng) {
            Ok(true) => DeliveryZoneResult::allowed(),
            Ok(false) => DeliveryZoneResult::denied(OUTSIDE_RADIUS_MESSAGE),
            Err(err) => err.into(),
        }
    }
}

impl Default for DeliveryZone {
    fn default() -> Self {
        Self::CAPE_GIRARDEAU
    }
}

// =============================================================================
// Postal-code gate
// =============================================================================

/// Exact-match postal code allowlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostalCodeAllowlist {
    codes: Vec<String>,
}

impl PostalCodeAllowlist {
    /// Cape Girardeau postal codes.
    #[must_use]
    pub fn cape_girardeau() -> Self {
        Self::new(["63701", "63702", "63703"])
    }

    #[must_use]
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a postal code is on the list, after trimming whitespace.
    #[must_use]
    pub fn contains(&self, postal_code: &str) -> bool {
        let trimmed = postal_code.trim();
        self.codes.iter().any(|code| code == trimmed)
    }

    /// Evaluate an optional postal code.
    ///
    /// # Errors
    ///
    /// Returns [`ZoneCheckError::InvalidAddress`] if the postal code is
    /// missing or blank.
    pub fn locate(&self, postal_code: Option<&str>) -> Result<bool, ZoneCheckError> {
        match postal_code.map(str::trim) {
            Some(code) if !code.is_empty() => Ok(self.contains(code)),
            _ => Err(ZoneCheckError::InvalidAddress(MISSING_POSTAL_CODE_MESSAGE)),
        }
    }

    /// Evaluate an optional postal code into a result.
    #[must_use]
    pub fn check(&self, postal_code: Option<&str>) -> DeliveryZoneResult {
        match self.locate(postal_code) {
            Ok(true) => DeliveryZoneResult::allowed(),
            Ok(false) => DeliveryZoneResult::denied(OUTSIDE_AREA_MESSAGE),
            Err(err) => err.into(),
        }
    }
}

impl Default for PostalCodeAllowlist {
    fn default() -> Self {
        Self::cape_girardeau()
    }
}

// =============================================================================
// Address
// =============================================================================

/// A shipping address as produced by the address-collection widget.
///
/// Only the postal code and optional coordinates are read; other fields are
/// ignored. Coordinates that are not JSON numbers deserialize as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default, deserialize_with = "number_or_none")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "number_or_none")]
    pub lng: Option<f64>,
}

impl DeliveryAddress {
    #[must_use]
    pub fn with_postal_code(postal_code: impl Into<String>) -> Self {
        Self {
            postal_code: Some(postal_code.into()),
            ..Self::default()
        }
    }

    /// The coordinate, when both components are present.
    #[must_use]
    pub const fn coordinate(&self) -> Option<Coordinate> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
            _ => None,
        }
    }
}

fn number_or_none<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ORIGIN: Coordinate = Coordinate::new(37.3059, -89.5181);

    /// A point due north of the origin at the given distance.
    fn north_of_origin(miles: f64) -> Coordinate {
        Coordinate::new(ORIGIN.lat + (miles / EARTH_RADIUS_MILES).to_degrees(), ORIGIN.lng)
    }

    #[test]
    fn test_haversine_origin_to_origin_is_zero() {
        assert!(haversine_miles(ORIGIN, ORIGIN).abs() < f64::EPSILON);
    }

    #[test]
    fn test_haversine_is_symmetric() {
        let points = [
            Coordinate::new(37.2, -89.6),
            Coordinate::new(38.627, -90.199),
            Coordinate::new(-33.87, 151.21),
        ];
        for p in points {
            let there = haversine_miles(ORIGIN, p);
            let back = haversine_miles(p, ORIGIN);
            assert!((there - back).abs() < 1e-9, "{there} != {back}");
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // Cape Girardeau to St. Louis is roughly 100 miles.
        let st_louis = Coordinate::new(38.627, -90.199);
        let d = haversine_miles(ORIGIN, st_louis);
        assert!((95.0..110.0).contains(&d), "got {d}");
    }

    #[test]
    fn test_origin_is_inside_zone() {
        assert!(DeliveryZone::CAPE_GIRARDEAU.contains(ORIGIN));
    }

    #[test]
    fn test_radius_is_inclusive() {
        let zone = DeliveryZone::CAPE_GIRARDEAU;
        assert!(zone.allows_distance(10.0));
        assert!(!zone.allows_distance(10.01));

        let ten = north_of_origin(10.0);
        assert!((haversine_miles(ORIGIN, ten) - 10.0).abs() < 1e-6);
        assert!(zone.contains(north_of_origin(9.999)));
        assert!(!zone.contains(north_of_origin(10.01)));
    }

    #[test]
    fn test_check_requires_finite_coordinates() {
        let zone = DeliveryZone::CAPE_GIRARDEAU;
        assert!(!zone.check(None, Some(-89.5)).allowed);
        assert!(!zone.check(Some(37.3), None).allowed);
        assert!(!zone.check(Some(f64::NAN), Some(-89.5)).allowed);
        assert!(!zone.check(Some(37.3), Some(f64::INFINITY)).allowed);
        assert_eq!(
            zone.check(None, None).message.as_deref(),
            Some(MISSING_LOCATION_MESSAGE)
        );
    }

    #[test]
    fn test_check_outside_radius() {
        let far = north_of_origin(25.0);
        let result = DeliveryZone::CAPE_GIRARDEAU.check(Some(far.lat), Some(far.lng));
        assert_eq!(result, DeliveryZoneResult::denied(OUTSIDE_RADIUS_MESSAGE));
    }

    #[test]
    fn test_postal_allowlist_accepts_known_codes() {
        let allowlist = PostalCodeAllowlist::cape_girardeau();
        for code in ["63701", "63702", "63703"] {
            assert_eq!(allowlist.check(Some(code)), DeliveryZoneResult::allowed());
        }
    }

    #[test]
    fn test_postal_allowlist_trims_whitespace() {
        let allowlist = PostalCodeAllowlist::cape_girardeau();
        assert!(allowlist.check(Some("  63701 ")).allowed);
        assert!(!allowlist.check(Some(" 63704 ")).allowed);
    }

    #[test]
    fn test_postal_allowlist_denies_others() {
        let allowlist = PostalCodeAllowlist::cape_girardeau();
        for code in ["63704", "6370", "637011", "90210", "63701-1234"] {
            let result = allowlist.check(Some(code));
            assert_eq!(result, DeliveryZoneResult::denied(OUTSIDE_AREA_MESSAGE), "{code}");
        }
    }

    #[test]
    fn test_postal_allowlist_missing_code_is_invalid_address() {
        let allowlist = PostalCodeAllowlist::cape_girardeau();
        assert_eq!(
            allowlist.locate(None),
            Err(ZoneCheckError::InvalidAddress(MISSING_POSTAL_CODE_MESSAGE))
        );
        assert_eq!(
            allowlist.check(Some("   ")),
            DeliveryZoneResult::denied(MISSING_POSTAL_CODE_MESSAGE)
        );
    }

    #[test]
    fn test_unavailable_collapses_to_denied() {
        let result: DeliveryZoneResult =
            ZoneCheckError::ZoneCheckUnavailable("connection refused".into()).into();
        assert!(!result.allowed);
        assert_eq!(result.message.as_deref(), Some(ZONE_CHECK_UNAVAILABLE_MESSAGE));
    }

    #[test]
    fn test_address_ignores_non_numeric_coordinates() {
        let address: DeliveryAddress = serde_json::from_value(serde_json::json!({
            "line1": "1 Main St",
            "postal_code": "63701",
            "lat": "37.3",
            "lng": -89.5
        }))
        .unwrap();
        assert_eq!(address.postal_code.as_deref(), Some("63701"));
        assert_eq!(address.lat, None);
        assert_eq!(address.lng, Some(-89.5));
        assert!(address.coordinate().is_none());
    }

    #[test]
    fn test_result_serializes_without_empty_message() {
        let json = serde_json::to_value(DeliveryZoneResult::allowed()).unwrap();
        assert_eq!(json, serde_json::json!({"allowed": true}));
    }
}

//! Offline delivery-zone checks.

use amor_chai_core::{Coordinate, DeliveryZone, DeliveryZoneResult, PostalCodeAllowlist};

#[allow(clippy::print_stdout)]
fn print_result(result: &DeliveryZoneResult) {
    if result.allowed {
        println!("Deliverable");
    } else {
        println!(
            "Not deliverable: {}",
            result.message.as_deref().unwrap_or("outside the delivery area")
        );
    }
}

/// Check a postal code against the allowlist.
pub fn postal(code: &str) {
    print_result(&PostalCodeAllowlist::default().check(Some(code)));
}

/// Check a coordinate against the delivery radius.
#[allow(clippy::print_stdout)]
pub fn coords(lat: f64, lng: f64) {
    let zone = DeliveryZone::default();
    let point = Coordinate::new(lat, lng);
    if point.is_finite() {
        println!(
            "{:.2} miles from the shop (limit {:.0})",
            zone.origin().distance_miles(&point),
            zone.radius_miles()
        );
    }
    print_result(&zone.check(Some(lat), Some(lng)));
}

use crate::models::{BoundingBox, Listing, Position};
use crate::core::distance::{calculate_bounding_box, distance_between, is_within_bounding_box};

/// Area covered by a single search
#[derive(Debug, Clone, Copy)]
pub struct SearchArea {
    pub origin: Position,
    pub radius_km: f64,
    pub bounding_box: BoundingBox,
}

impl SearchArea {
    pub fn new(origin: Position, radius_km: f64) -> Self {
        Self {
            origin,
            radius_km,
            bounding_box: calculate_bounding_box(origin.latitude, origin.longitude, radius_km),
        }
    }
}

/// Claimed listings are never offered to requesters
#[inline]
pub fn is_searchable(listing: &Listing) -> bool {
    !listing.is_claimed()
}

/// Stage 1: cheap rectangular pre-filter
#[inline]
pub fn within_search_box(listing: &Listing, area: &SearchArea) -> bool {
    is_within_bounding_box(
        listing.location.latitude,
        listing.location.longitude,
        &area.bounding_box,
    )
}

/// Both stages for a bare position
#[inline]
pub fn position_within_area(position: &Position, area: &SearchArea) -> bool {
    is_within_bounding_box(position.latitude, position.longitude, &area.bounding_box)
        && distance_between(&area.origin, position) <= area.radius_km
}

/// Stage 2: exact great-circle check, returning the distance when inside
#[inline]
pub fn distance_within_radius(listing: &Listing, area: &SearchArea) -> Option<f64> {
    let distance_km = distance_between(&area.origin, &listing.location);
    (distance_km <= area.radius_km).then_some(distance_km)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListingStatus;
    use chrono::Utc;

    fn create_listing(lat: f64, lon: f64, status: ListingStatus) -> Listing {
        Listing {
            id: "entry".to_string(),
            meals_available: 10,
            location: Position::new(lat, lon),
            address: "Somewhere".to_string(),
            description: "Bread".to_string(),
            provider_id: None,
            geohash: None,
            created_at: Utc::now(),
            status,
            claimed_by_request_id: None,
            claimed_at: None,
        }
    }

    #[test]
    fn test_claimed_not_searchable() {
        assert!(is_searchable(&create_listing(40.0, -75.0, ListingStatus::Available)));
        assert!(!is_searchable(&create_listing(40.0, -75.0, ListingStatus::Claimed)));
    }

    #[test]
    fn test_radius_boundaries() {
        let listing = create_listing(40.0, -75.0, ListingStatus::Available);

        let wide = SearchArea::new(Position::new(40.05, -75.05), 10.0);
        assert!(within_search_box(&listing, &wide));
        let distance = distance_within_radius(&listing, &wide).unwrap();
        assert!(distance > 5.0 && distance < 10.0, "Expected ~7km, got {}", distance);

        let narrow = SearchArea::new(Position::new(40.05, -75.05), 5.0);
        assert!(distance_within_radius(&listing, &narrow).is_none());
    }

    #[test]
    fn test_far_listing_outside_box() {
        let listing = create_listing(45.0, -75.0, ListingStatus::Available);
        let area = SearchArea::new(Position::new(40.0, -75.0), 50.0);
        assert!(!within_search_box(&listing, &area));
    }
}

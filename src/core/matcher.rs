use crate::models::{Candidate, Listing, Position, SearchOrder};
use crate::core::filters::{distance_within_radius, is_searchable, within_search_box, SearchArea};

/// Default number of most recent listings scanned per search
pub const DEFAULT_SEARCH_WINDOW: usize = 50;

/// Default upper bound for the search radius in kilometers
pub const DEFAULT_MAX_RADIUS_KM: f64 = 50.0;

/// Result of a proximity search
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub candidates: Vec<Candidate>,
    pub total_scanned: usize,
    pub radius_km: f64,
}

impl SearchResult {
    pub fn empty(radius_km: f64) -> Self {
        Self {
            candidates: Vec::new(),
            total_scanned: 0,
            radius_km,
        }
    }
}

/// Proximity matcher - filters a window of recent listings around an origin
///
/// # Pipeline Stages
/// 1. Drop claimed listings
/// 2. Bounding box pre-filter
/// 3. Haversine radius check
/// 4. Optional distance ordering
#[derive(Debug, Clone)]
pub struct Matcher {
    order: SearchOrder,
    max_radius_km: f64,
    window: usize,
}

impl Matcher {
    pub fn new(order: SearchOrder, max_radius_km: f64, window: usize) -> Self {
        Self {
            order,
            max_radius_km,
            window,
        }
    }

    /// Number of recent listings a search should fetch
    pub fn window(&self) -> usize {
        self.window
    }

    pub fn order(&self) -> SearchOrder {
        self.order
    }

    /// Clamp a requested radius to the configured maximum
    ///
    /// Returns `None` when the radius is not positive, meaning the search
    /// must yield nothing.
    pub fn effective_radius(&self, radius_km: f64) -> Option<f64> {
        if radius_km <= 0.0 {
            None
        } else {
            Some(radius_km.min(self.max_radius_km))
        }
    }

    /// Filter `listings` (newest first) down to the candidates around `origin`
    ///
    /// Survivors keep the store's recency order unless distance ordering is
    /// configured, in which case the sort is stable so ties stay newest first.
    pub fn find_candidates(
        &self,
        origin: Position,
        radius_km: f64,
        listings: Vec<Listing>,
    ) -> SearchResult {
        let radius_km = match self.effective_radius(radius_km) {
            Some(radius) => radius,
            None => return SearchResult::empty(radius_km),
        };

        let total_scanned = listings.len();
        let area = SearchArea::new(origin, radius_km);

        let mut candidates: Vec<Candidate> = listings
            .into_iter()
            .filter(is_searchable)
            .filter(|listing| within_search_box(listing, &area))
            .filter_map(|listing| {
                distance_within_radius(&listing, &area)
                    .map(|distance_km| Candidate { listing, distance_km })
            })
            .collect();

        if self.order == SearchOrder::Distance {
            candidates.sort_by(|a, b| {
                a.distance_km
                    .partial_cmp(&b.distance_km)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        SearchResult {
            candidates,
            total_scanned,
            radius_km,
        }
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(SearchOrder::Recency, DEFAULT_MAX_RADIUS_KM, DEFAULT_SEARCH_WINDOW)
    }
}

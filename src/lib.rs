//! Food Match - matching service for surplus food
//!
//! Providers list surplus meals at a location, requesters search for nearby
//! listings and ask for one, and providers accept or decline those requests.
//! Storage is pluggable behind [`services::ListingRepository`].

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use crate::core::{MatchingWorkflow, WorkflowError, Matcher, distance::{haversine_distance, calculate_bounding_box}};
pub use models::{Candidate, Listing, ListingStatus, MatchRequest, Position, RequestStatus};
pub use services::{ListingRepository, MemoryRepository, Principal};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let bbox = calculate_bounding_box(40.7128, -74.0060, 10.0);
        assert!(bbox.min_lat < 40.7128);
        assert_eq!(haversine_distance(1.0, 2.0, 1.0, 2.0), 0.0);
    }
}

// Core algorithm exports
pub mod distance;
pub mod filters;
pub mod lifecycle;
pub mod matcher;
pub mod workflow;

pub use distance::{haversine_distance, calculate_bounding_box, is_within_bounding_box, geohash_encode};
pub use filters::SearchArea;
pub use lifecycle::{ClaimCommand, ClaimOutcome, ClaimRejection, ClaimResult};
pub use matcher::{Matcher, SearchResult};
pub use workflow::{ListingDraft, MatchingWorkflow, ShortageDraft, WorkflowError, WorkflowSettings};

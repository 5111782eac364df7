// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    BoundingBox, Candidate, DuplicateRequestPolicy, Listing, ListingPatch, ListingPrecondition,
    ListingStatus, MatchRequest, NewListing, NewMatchRequest, Position, RequestPatch,
    RequestStatus, RequesterLocation, SearchOrder, NewShortage, Shortage,
};
pub use requests::{
    AcceptRequestBody, CreateListingRequest, ReportShortageRequest, RequestListingRequest,
    SearchRequest, ShortageQuery,
};
pub use responses::{
    AcceptResponse, DashboardResponse, ErrorResponse, HealthResponse, ReconcileResponse,
    SearchResponse, ShortageListResponse,
};

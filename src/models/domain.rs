use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Latitude within [-90, 90], longitude within [-180, 180], both finite
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl From<Position> for geo::Point<f64> {
    fn from(value: Position) -> Self {
        geo::Point::new(value.longitude, value.latitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Available,
    Claimed,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Available => "available",
            ListingStatus::Claimed => "claimed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(ListingStatus::Available),
            "claimed" => Some(ListingStatus::Claimed),
            _ => None,
        }
    }
}

impl Default for ListingStatus {
    fn default() -> Self {
        ListingStatus::Available
    }
}

/// A provider's posted food-availability record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    #[serde(rename = "mealsAvailable")]
    pub meals_available: u32,
    pub location: Position,
    pub address: String,
    pub description: String,
    #[serde(rename = "providerId", default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub geohash: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ListingStatus,
    #[serde(rename = "claimedByRequestId", default)]
    pub claimed_by_request_id: Option<String>,
    #[serde(rename = "claimedAt", default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Listing {
    pub fn is_claimed(&self) -> bool {
        self.status == ListingStatus::Claimed
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        match &self.provider_id {
            Some(provider) => provider == user_id,
            // Listings posted before provider tracking carry no owner
            None => true,
        }
    }
}

/// Fields supplied by a provider when posting a listing
#[derive(Debug, Clone, PartialEq)]
pub struct NewListing {
    pub meals_available: u32,
    pub location: Position,
    pub address: String,
    pub description: String,
    pub provider_id: String,
    pub geohash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Declined => "declined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RequestStatus::Pending),
            "accepted" => Some(RequestStatus::Accepted),
            "declined" => Some(RequestStatus::Declined),
            _ => None,
        }
    }
}

impl Default for RequestStatus {
    fn default() -> Self {
        RequestStatus::Pending
    }
}

/// Where the requester wants the food delivered or picked up from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequesterLocation {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

/// A requester's claim attempt against one listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub id: String,
    #[serde(rename = "foodEntryId")]
    pub food_entry_id: String,
    #[serde(rename = "requesterId")]
    pub requester_id: String,
    #[serde(rename = "requesterLocation")]
    pub requester_location: RequesterLocation,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MatchRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMatchRequest {
    pub food_entry_id: String,
    pub requester_id: String,
    pub requester_location: RequesterLocation,
}

/// A report that meals are needed at a place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shortage {
    pub id: String,
    #[serde(rename = "mealsNeeded")]
    pub meals_needed: u32,
    pub location: Position,
    pub address: String,
    pub description: String,
    #[serde(rename = "reporterId", default)]
    pub reporter_id: Option<String>,
    #[serde(default)]
    pub geohash: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewShortage {
    pub meals_needed: u32,
    pub location: Position,
    pub address: String,
    pub description: String,
    pub reporter_id: String,
    pub geohash: String,
}

/// Partial update applied to a listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPatch {
    pub status: Option<ListingStatus>,
    /// `Some(None)` clears the claim
    pub claimed_by_request_id: Option<Option<String>>,
    pub claimed_at: Option<Option<DateTime<Utc>>>,
}

impl ListingPatch {
    pub fn claim(request_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ListingStatus::Claimed),
            claimed_by_request_id: Some(Some(request_id.to_string())),
            claimed_at: Some(Some(at)),
        }
    }

    pub fn release() -> Self {
        Self {
            status: Some(ListingStatus::Available),
            claimed_by_request_id: Some(None),
            claimed_at: Some(None),
        }
    }

    pub fn apply(&self, listing: &mut Listing) {
        if let Some(status) = self.status {
            listing.status = status;
        }
        if let Some(claimed_by) = &self.claimed_by_request_id {
            listing.claimed_by_request_id = claimed_by.clone();
        }
        if let Some(claimed_at) = self.claimed_at {
            listing.claimed_at = claimed_at;
        }
    }
}

/// Partial update applied to a match request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestPatch {
    pub status: RequestStatus,
    pub updated_at: DateTime<Utc>,
}

impl RequestPatch {
    pub fn new(status: RequestStatus, updated_at: DateTime<Utc>) -> Self {
        Self { status, updated_at }
    }

    pub fn apply(&self, request: &mut MatchRequest) {
        request.status = self.status;
        request.updated_at = Some(self.updated_at);
    }
}

/// Condition a listing must satisfy for a conditional write to apply
#[derive(Debug, Clone, PartialEq)]
pub enum ListingPrecondition {
    StatusIs(ListingStatus),
    ClaimedBy(String),
}

impl ListingPrecondition {
    pub fn holds(&self, listing: &Listing) -> bool {
        match self {
            ListingPrecondition::StatusIs(status) => listing.status == *status,
            ListingPrecondition::ClaimedBy(request_id) => {
                listing.is_claimed()
                    && listing.claimed_by_request_id.as_deref() == Some(request_id.as_str())
            }
        }
    }
}

/// A listing annotated with its distance from the search origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub listing: Listing,
    #[serde(rename = "distanceKm")]
    pub distance_km: f64,
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Order applied to search survivors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchOrder {
    /// Newest listing first, as returned by the store
    Recency,
    /// Closest listing first
    Distance,
}

impl Default for SearchOrder {
    fn default() -> Self {
        SearchOrder::Recency
    }
}

/// Whether a requester may hold several pending requests on one listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRequestPolicy {
    Allow,
    RejectPending,
}

impl Default for DuplicateRequestPolicy {
    fn default() -> Self {
        DuplicateRequestPolicy::RejectPending
    }
}

use serde::{Deserialize, Serialize};
use crate::models::domain::{Candidate, Listing, MatchRequest, Shortage};

/// Response for the search endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub candidates: Vec<Candidate>,
    #[serde(rename = "radiusKm")]
    pub radius_km: f64,
    #[serde(rename = "totalScanned")]
    pub total_scanned: usize,
}

/// Response for a successful accept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub request: MatchRequest,
    pub listing: Listing,
    #[serde(rename = "declinedRequestIds")]
    pub declined_request_ids: Vec<String>,
}

/// Provider view of their listings and incoming requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardResponse {
    pub listings: Vec<Listing>,
    pub requests: Vec<MatchRequest>,
}

/// Response for the reconcile endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResponse {
    #[serde(rename = "listingId")]
    pub listing_id: String,
    #[serde(rename = "declinedRequestIds")]
    pub declined_request_ids: Vec<String>,
}

/// Reported shortages, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortageListResponse {
    pub shortages: Vec<Shortage>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

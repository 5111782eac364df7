use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to search for nearby listings
///
/// Either coordinates or an address must be supplied; an address alone is
/// geocoded before searching.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SearchRequest {
    #[serde(default)]
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[serde(default)]
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_radius_km", alias = "radius_km", rename = "radiusKm")]
    pub radius_km: f64,
}

fn default_radius_km() -> f64 {
    10.0
}

/// Request to post a new listing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateListingRequest {
    #[serde(alias = "meals_available", rename = "mealsAvailable")]
    pub meals_available: u32,
    #[validate(length(min = 1))]
    pub address: String,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    #[serde(default)]
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[serde(default)]
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
}

/// Request to claim a listing on behalf of the caller
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RequestListingRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "food_entry_id", alias = "foodEntryId", rename = "listingId")]
    pub listing_id: String,
    #[validate(length(min = 1))]
    pub address: String,
    #[serde(default)]
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[serde(default)]
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
}

/// Body of the accept endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcceptRequestBody {
    #[validate(length(min = 1))]
    #[serde(alias = "food_entry_id", alias = "foodEntryId", rename = "listingId")]
    pub listing_id: String,
}

/// Report that meals are needed somewhere
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReportShortageRequest {
    #[serde(alias = "meals_needed", rename = "mealsNeeded")]
    #[validate(range(min = 1))]
    pub meals_needed: u32,
    #[validate(length(min = 1))]
    pub address: String,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    #[serde(default)]
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[serde(default)]
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
}

/// Query string of the shortage listing
///
/// With coordinates only shortages within `radiusKm` are returned.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShortageQuery {
    #[serde(default)]
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[serde(default)]
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    #[serde(default = "default_radius_km", rename = "radiusKm")]
    pub radius_km: f64,
    #[serde(default)]
    #[validate(range(min = 1, max = 200))]
    pub limit: Option<usize>,
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;

use crate::models::{
    Listing, ListingPatch, ListingPrecondition, ListingStatus, MatchRequest, NewListing,
    NewMatchRequest, NewShortage, Position, RequestPatch, RequestStatus, RequesterLocation,
    Shortage,
};
use crate::services::repository::{
    ensure_batch_size, ListingRepository, RepositoryError, RequestInsert, UpdateOutcome,
};

/// Page size used when draining a query
const PAGE_SIZE: usize = 100;

/// Errors that can occur when interacting with Appwrite
#[derive(Debug, Error)]
pub enum AppwriteError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("API returned error: {0}")]
    ApiError(String),

    #[error("Unauthorized: invalid API key or token")]
    Unauthorized,

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl From<AppwriteError> for RepositoryError {
    fn from(value: AppwriteError) -> Self {
        match value {
            AppwriteError::InvalidResponse(message) => RepositoryError::InvalidRecord(message),
            other => RepositoryError::Unavailable(other.to_string()),
        }
    }
}

/// Collection IDs in Appwrite
#[derive(Debug, Clone)]
pub struct AppwriteCollections {
    pub food_entries: String,
    pub food_matches: String,
    pub food_shortages: String,
}

#[derive(Debug, Deserialize)]
struct ListingDocument {
    #[serde(rename = "$id")]
    id: String,
    #[serde(rename = "$createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "mealsAvailable", default)]
    meals_available: u32,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    address: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "providerId", default)]
    provider_id: Option<String>,
    #[serde(default)]
    geohash: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(rename = "claimedByRequestId", default)]
    claimed_by_request_id: Option<String>,
    #[serde(rename = "claimedAt", default)]
    claimed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ListingDocument> for Listing {
    type Error = AppwriteError;

    fn try_from(doc: ListingDocument) -> Result<Self, Self::Error> {
        // Entries written before claims existed carry no status
        let status = match doc.status.as_deref() {
            None => ListingStatus::Available,
            Some(raw) => ListingStatus::parse(raw).ok_or_else(|| {
                AppwriteError::InvalidResponse(format!("unknown listing status '{}'", raw))
            })?,
        };

        Ok(Listing {
            id: doc.id,
            meals_available: doc.meals_available,
            location: Position::new(doc.latitude, doc.longitude),
            address: doc.address,
            description: doc.description,
            provider_id: doc.provider_id,
            geohash: doc.geohash,
            created_at: doc.created_at,
            status,
            claimed_by_request_id: doc.claimed_by_request_id,
            claimed_at: doc.claimed_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RequestDocument {
    #[serde(rename = "$id")]
    id: String,
    #[serde(rename = "$createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "foodEntryId")]
    food_entry_id: String,
    #[serde(rename = "requesterId", default)]
    requester_id: String,
    #[serde(rename = "requesterLat")]
    requester_lat: f64,
    #[serde(rename = "requesterLng")]
    requester_lng: f64,
    #[serde(rename = "requesterAddress", default)]
    requester_address: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(rename = "updatedAt", default)]
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<RequestDocument> for MatchRequest {
    type Error = AppwriteError;

    fn try_from(doc: RequestDocument) -> Result<Self, Self::Error> {
        let status = match doc.status.as_deref() {
            None => RequestStatus::Pending,
            Some(raw) => RequestStatus::parse(raw).ok_or_else(|| {
                AppwriteError::InvalidResponse(format!("unknown request status '{}'", raw))
            })?,
        };

        Ok(MatchRequest {
            id: doc.id,
            food_entry_id: doc.food_entry_id,
            requester_id: doc.requester_id,
            requester_location: RequesterLocation {
                lat: doc.requester_lat,
                lng: doc.requester_lng,
                address: doc.requester_address,
            },
            status,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ShortageDocument {
    #[serde(rename = "$id")]
    id: String,
    #[serde(rename = "$createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "mealsNeeded", default)]
    meals_needed: u32,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    address: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "reporterId", default)]
    reporter_id: Option<String>,
    #[serde(default)]
    geohash: Option<String>,
}

impl From<ShortageDocument> for Shortage {
    fn from(doc: ShortageDocument) -> Self {
        Shortage {
            id: doc.id,
            meals_needed: doc.meals_needed,
            location: Position::new(doc.latitude, doc.longitude),
            address: doc.address,
            description: doc.description,
            reporter_id: doc.reporter_id,
            geohash: doc.geohash,
            created_at: doc.created_at,
        }
    }
}

/// Appwrite document-store adapter
///
/// Appwrite has no conditional writes, so preconditions are checked with a
/// read right before the write. Two writers can still interleave between the
/// read and the write; the workflow's compensation covers the claim path.
pub struct AppwriteClient {
    base_url: String,
    api_key: String,
    project_id: String,
    database_id: String,
    client: Client,
    collections: AppwriteCollections,
}

impl AppwriteClient {
    /// Create a new Appwrite client
    pub fn new(
        base_url: String,
        api_key: String,
        project_id: String,
        database_id: String,
        collections: AppwriteCollections,
        timeout: Duration,
    ) -> Result<Self, AppwriteError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url,
            api_key,
            project_id,
            database_id,
            client,
            collections,
        })
    }

    fn documents_url(&self, collection: &str) -> String {
        format!(
            "{}/databases/{}/collections/{}/documents",
            self.base_url.trim_end_matches('/'),
            self.database_id,
            collection
        )
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.documents_url(collection), urlencoding::encode(id))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("X-Appwrite-Key", &self.api_key)
            .header("X-Appwrite-Project", &self.project_id)
    }

    async fn check_status(response: reqwest::Response, action: &str) -> Result<reqwest::Response, AppwriteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(AppwriteError::Unauthorized);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read body".to_string());
        tracing::error!("Appwrite failed to {}: {} - {}", action, status, body);
        Err(AppwriteError::ApiError(format!("Failed to {}: {}", action, status)))
    }

    /// List documents matching `queries`, at most `limit` of them
    async fn list_documents(
        &self,
        collection: &str,
        queries: &[Value],
        limit: usize,
    ) -> Result<Vec<Value>, AppwriteError> {
        let mut documents = Vec::new();

        while documents.len() < limit {
            let page_size = (limit - documents.len()).min(PAGE_SIZE);
            let mut page_queries = queries.to_vec();
            page_queries.push(json!({ "method": "limit", "values": [page_size] }));
            page_queries.push(json!({ "method": "offset", "values": [documents.len()] }));

            let query_string = page_queries
                .iter()
                .map(|q| format!("queries[]={}", urlencoding::encode(&q.to_string())))
                .collect::<Vec<_>>()
                .join("&");
            let url = format!("{}?{}", self.documents_url(collection), query_string);

            tracing::debug!("Listing documents from {}", collection);

            let response = self.authorized(self.client.get(&url)).send().await?;
            let response = Self::check_status(response, "list documents").await?;
            let json: Value = response.json().await?;

            let page = json
                .get("documents")
                .and_then(|d| d.as_array())
                .ok_or_else(|| AppwriteError::InvalidResponse("Missing documents array".into()))?;

            let fetched = page.len();
            documents.extend(page.iter().cloned());
            if fetched < page_size {
                break;
            }
        }

        Ok(documents)
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>, AppwriteError> {
        let response = self
            .authorized(self.client.get(self.document_url(collection, id)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::check_status(response, "fetch document").await?;
        Ok(Some(response.json().await?))
    }

    async fn create_document(&self, collection: &str, data: Value) -> Result<Value, AppwriteError> {
        let payload = json!({
            "documentId": uuid::Uuid::new_v4().simple().to_string(),
            "data": data,
        });

        let response = self
            .authorized(self.client.post(self.documents_url(collection)))
            .json(&payload)
            .send()
            .await?;

        let response = Self::check_status(response, "create document").await?;
        Ok(response.json().await?)
    }

    async fn patch_document(&self, collection: &str, id: &str, data: Value) -> Result<UpdateOutcome, AppwriteError> {
        let response = self
            .authorized(self.client.patch(self.document_url(collection, id)))
            .json(&json!({ "data": data }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(UpdateOutcome::NotFound);
        }

        Self::check_status(response, "update document").await?;
        Ok(UpdateOutcome::Applied)
    }

    async fn fetch_listing(&self, id: &str) -> Result<Option<Listing>, AppwriteError> {
        match self.get_document(&self.collections.food_entries, id).await? {
            Some(doc) => Ok(Some(parse_listing(doc)?)),
            None => Ok(None),
        }
    }
}

fn document_data(doc: Value) -> Value {
    match doc.get("data") {
        Some(data) if data.is_object() => data.clone(),
        _ => doc,
    }
}

fn parse_listing(doc: Value) -> Result<Listing, AppwriteError> {
    let document: ListingDocument = serde_json::from_value(document_data(doc))
        .map_err(|e| AppwriteError::InvalidResponse(format!("Failed to parse listing: {}", e)))?;
    Listing::try_from(document)
}

fn parse_request(doc: Value) -> Result<MatchRequest, AppwriteError> {
    let document: RequestDocument = serde_json::from_value(document_data(doc))
        .map_err(|e| AppwriteError::InvalidResponse(format!("Failed to parse request: {}", e)))?;
    MatchRequest::try_from(document)
}

fn parse_shortage(doc: Value) -> Result<Shortage, AppwriteError> {
    let document: ShortageDocument = serde_json::from_value(document_data(doc))
        .map_err(|e| AppwriteError::InvalidResponse(format!("Failed to parse shortage: {}", e)))?;
    Ok(Shortage::from(document))
}

fn listing_patch_data(patch: &ListingPatch) -> Value {
    let mut data = Map::new();
    if let Some(status) = patch.status {
        data.insert("status".into(), Value::String(status.as_str().into()));
    }
    if let Some(claimed_by) = &patch.claimed_by_request_id {
        data.insert("claimedByRequestId".into(), json!(claimed_by));
    }
    if let Some(claimed_at) = &patch.claimed_at {
        data.insert(
            "claimedAt".into(),
            json!(claimed_at.map(|at| at.to_rfc3339())),
        );
    }
    Value::Object(data)
}

#[async_trait]
impl ListingRepository for AppwriteClient {
    fn backend_name(&self) -> &'static str {
        "appwrite"
    }

    async fn health_check(&self) -> Result<bool, RepositoryError> {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(AppwriteError::from)?;
        Ok(response.status().is_success())
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<Listing>, RepositoryError> {
        let queries = [json!({ "method": "orderDesc", "attribute": "$createdAt" })];
        let documents = self
            .list_documents(&self.collections.food_entries, &queries, limit)
            .await?;

        let listings = documents
            .into_iter()
            .map(parse_listing)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(listings)
    }

    async fn get_listing(&self, id: &str) -> Result<Option<Listing>, RepositoryError> {
        Ok(self.fetch_listing(id).await?)
    }

    async fn create_listing(&self, listing: NewListing) -> Result<Listing, RepositoryError> {
        let data = json!({
            "mealsAvailable": listing.meals_available,
            "latitude": listing.location.latitude,
            "longitude": listing.location.longitude,
            "address": listing.address,
            "description": listing.description,
            "providerId": listing.provider_id,
            "geohash": listing.geohash,
            "status": ListingStatus::Available.as_str(),
        });

        let doc = self
            .create_document(&self.collections.food_entries, data)
            .await?;
        Ok(parse_listing(doc)?)
    }

    async fn list_listings_by_provider(
        &self,
        provider_id: &str,
    ) -> Result<Vec<Listing>, RepositoryError> {
        let queries = [
            json!({ "method": "equal", "attribute": "providerId", "values": [provider_id] }),
            json!({ "method": "orderDesc", "attribute": "$createdAt" }),
        ];
        let documents = self
            .list_documents(&self.collections.food_entries, &queries, usize::MAX)
            .await?;

        let listings = documents
            .into_iter()
            .map(parse_listing)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(listings)
    }

    async fn get_match_request(&self, id: &str) -> Result<Option<MatchRequest>, RepositoryError> {
        match self.get_document(&self.collections.food_matches, id).await? {
            Some(doc) => Ok(Some(parse_request(doc)?)),
            None => Ok(None),
        }
    }

    async fn create_match_request(
        &self,
        request: NewMatchRequest,
    ) -> Result<RequestInsert, RepositoryError> {
        // Read-then-write: a claim landing in between is caught by reconcile
        match self.fetch_listing(&request.food_entry_id).await? {
            None => return Ok(RequestInsert::ListingNotFound),
            Some(listing) if listing.is_claimed() => return Ok(RequestInsert::ListingClaimed),
            Some(_) => {}
        }

        let data = json!({
            "foodEntryId": request.food_entry_id,
            "requesterId": request.requester_id,
            "requesterLat": request.requester_location.lat,
            "requesterLng": request.requester_location.lng,
            "requesterAddress": request.requester_location.address,
            "status": RequestStatus::Pending.as_str(),
        });

        let doc = self
            .create_document(&self.collections.food_matches, data)
            .await?;
        Ok(RequestInsert::Created(parse_request(doc)?))
    }

    async fn update_listing(
        &self,
        id: &str,
        patch: ListingPatch,
        precondition: Option<ListingPrecondition>,
    ) -> Result<UpdateOutcome, RepositoryError> {
        if let Some(precondition) = &precondition {
            match self.fetch_listing(id).await? {
                None => return Ok(UpdateOutcome::NotFound),
                Some(current) if !precondition.holds(&current) => return Ok(UpdateOutcome::Conflict),
                Some(_) => {}
            }
        }

        Ok(self
            .patch_document(&self.collections.food_entries, id, listing_patch_data(&patch))
            .await?)
    }

    async fn update_match_request(
        &self,
        id: &str,
        patch: RequestPatch,
    ) -> Result<UpdateOutcome, RepositoryError> {
        let data = json!({
            "status": patch.status.as_str(),
            "updatedAt": patch.updated_at.to_rfc3339(),
        });

        Ok(self
            .patch_document(&self.collections.food_matches, id, data)
            .await?)
    }

    async fn query_requests_by_listing_ids(
        &self,
        listing_ids: &[String],
    ) -> Result<Vec<MatchRequest>, RepositoryError> {
        ensure_batch_size(listing_ids)?;
        if listing_ids.is_empty() {
            return Ok(Vec::new());
        }

        let queries = [
            json!({ "method": "equal", "attribute": "foodEntryId", "values": listing_ids }),
            json!({ "method": "orderDesc", "attribute": "$createdAt" }),
        ];
        let documents = self
            .list_documents(&self.collections.food_matches, &queries, usize::MAX)
            .await?;

        let requests = documents
            .into_iter()
            .map(parse_request)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    async fn delete_listing(
        &self,
        id: &str,
        precondition: Option<ListingPrecondition>,
    ) -> Result<UpdateOutcome, RepositoryError> {
        if let Some(precondition) = &precondition {
            match self.fetch_listing(id).await? {
                None => return Ok(UpdateOutcome::NotFound),
                Some(current) if !precondition.holds(&current) => return Ok(UpdateOutcome::Conflict),
                Some(_) => {}
            }
        }

        let response = self
            .authorized(self.client.delete(self.document_url(&self.collections.food_entries, id)))
            .send()
            .await
            .map_err(AppwriteError::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(UpdateOutcome::NotFound);
        }
        Self::check_status(response, "delete document").await?;
        Ok(UpdateOutcome::Applied)
    }

    async fn create_shortage(&self, shortage: NewShortage) -> Result<Shortage, RepositoryError> {
        let data = json!({
            "mealsNeeded": shortage.meals_needed,
            "latitude": shortage.location.latitude,
            "longitude": shortage.location.longitude,
            "address": shortage.address,
            "description": shortage.description,
            "reporterId": shortage.reporter_id,
            "geohash": shortage.geohash,
        });

        let doc = self
            .create_document(&self.collections.food_shortages, data)
            .await?;
        Ok(parse_shortage(doc)?)
    }

    async fn list_shortages(&self, limit: usize) -> Result<Vec<Shortage>, RepositoryError> {
        let queries = [json!({ "method": "orderDesc", "attribute": "$createdAt" })];
        let documents = self
            .list_documents(&self.collections.food_shortages, &queries, limit)
            .await?;

        let shortages = documents
            .into_iter()
            .map(parse_shortage)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(shortages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_document_defaults() {
        let doc = json!({
            "$id": "entry-1",
            "$createdAt": "2024-03-01T12:00:00.000+00:00",
            "mealsAvailable": 6,
            "latitude": 40.0,
            "longitude": -75.0,
            "address": "1 Main St",
            "description": "Soup"
        });

        let listing = parse_listing(doc).unwrap();
        assert_eq!(listing.id, "entry-1");
        assert_eq!(listing.status, ListingStatus::Available);
        assert!(listing.provider_id.is_none());
    }

    #[test]
    fn test_unknown_status_rejected() {
        let doc = json!({
            "$id": "entry-1",
            "$createdAt": "2024-03-01T12:00:00.000+00:00",
            "latitude": 40.0,
            "longitude": -75.0,
            "status": "reserved"
        });

        assert!(matches!(parse_listing(doc), Err(AppwriteError::InvalidResponse(_))));
    }

    #[test]
    fn test_shortage_document_parses() {
        let doc = json!({
            "$id": "s1",
            "$createdAt": "2024-03-01T12:00:00.000+00:00",
            "mealsNeeded": 40,
            "latitude": 39.95,
            "longitude": -75.16,
            "address": "Shelter",
            "description": "Breakfast"
        });

        let shortage = parse_shortage(doc).unwrap();
        assert_eq!(shortage.meals_needed, 40);
        assert_eq!(shortage.location, Position::new(39.95, -75.16));
        assert!(shortage.reporter_id.is_none());
    }

    #[test]
    fn test_release_patch_clears_claim() {
        let data = listing_patch_data(&ListingPatch::release());
        assert_eq!(data["status"], "available");
        assert!(data["claimedByRequestId"].is_null());
        assert!(data["claimedAt"].is_null());
        assert!(data.as_object().unwrap().contains_key("claimedAt"));
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use crate::core::lifecycle::{cascade_targets, check_claim, ClaimCommand, ClaimOutcome, ClaimResult};
use crate::models::{
    Listing, ListingPatch, ListingPrecondition, ListingStatus, MatchRequest, NewListing,
    NewMatchRequest, NewShortage, RequestPatch, RequestStatus, Shortage,
};
use crate::services::repository::{
    ensure_batch_size, ChangeEvent, ListingRepository, RepositoryError, RequestInsert,
    UpdateOutcome,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct MemoryState {
    listings: HashMap<String, (u64, Listing)>,
    requests: HashMap<String, (u64, MatchRequest)>,
    shortages: Vec<Shortage>,
    sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl MemoryState {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Wall-clock time, nudged forward so timestamps never repeat
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn newest_first<'a, T: 'a, I>(items: I) -> Vec<T>
    where
        I: Iterator<Item = &'a (u64, T)>,
        T: Clone,
    {
        let mut items: Vec<&(u64, T)> = items.collect();
        items.sort_by(|a, b| b.0.cmp(&a.0));
        items.into_iter().map(|(_, item)| item.clone()).collect()
    }
}

/// In-process store used for development and tests
///
/// Every mutation happens under one write lock, so claims are atomic.
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
    events: broadcast::Sender<ChangeEvent>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(MemoryState::default()),
            events,
        }
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListingRepository for MemoryRepository {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<bool, RepositoryError> {
        Ok(true)
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<Listing>, RepositoryError> {
        let state = self.state.read().await;
        let mut listings = MemoryState::newest_first(state.listings.values());
        listings.truncate(limit);
        Ok(listings)
    }

    async fn get_listing(&self, id: &str) -> Result<Option<Listing>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.listings.get(id).map(|(_, listing)| listing.clone()))
    }

    async fn create_listing(&self, listing: NewListing) -> Result<Listing, RepositoryError> {
        let mut state = self.state.write().await;
        let sequence = state.next_sequence();
        let created_at = state.next_timestamp();

        let listing = Listing {
            id: uuid::Uuid::new_v4().to_string(),
            meals_available: listing.meals_available,
            location: listing.location,
            address: listing.address,
            description: listing.description,
            provider_id: Some(listing.provider_id),
            geohash: Some(listing.geohash),
            created_at,
            status: ListingStatus::Available,
            claimed_by_request_id: None,
            claimed_at: None,
        };

        state.listings.insert(listing.id.clone(), (sequence, listing.clone()));
        drop(state);

        self.publish(ChangeEvent::ListingCreated(listing.clone()));
        Ok(listing)
    }

    async fn list_listings_by_provider(
        &self,
        provider_id: &str,
    ) -> Result<Vec<Listing>, RepositoryError> {
        let state = self.state.read().await;
        Ok(MemoryState::newest_first(
            state
                .listings
                .values()
                .filter(|(_, l)| l.provider_id.as_deref() == Some(provider_id)),
        ))
    }

    async fn get_match_request(&self, id: &str) -> Result<Option<MatchRequest>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.requests.get(id).map(|(_, request)| request.clone()))
    }

    async fn create_match_request(
        &self,
        request: NewMatchRequest,
    ) -> Result<RequestInsert, RepositoryError> {
        let mut state = self.state.write().await;
        match state.listings.get(&request.food_entry_id) {
            None => return Ok(RequestInsert::ListingNotFound),
            Some((_, listing)) if listing.is_claimed() => return Ok(RequestInsert::ListingClaimed),
            Some(_) => {}
        }

        let sequence = state.next_sequence();
        let created_at = state.next_timestamp();

        let request = MatchRequest {
            id: uuid::Uuid::new_v4().to_string(),
            food_entry_id: request.food_entry_id,
            requester_id: request.requester_id,
            requester_location: request.requester_location,
            status: RequestStatus::Pending,
            created_at,
            updated_at: None,
        };

        state.requests.insert(request.id.clone(), (sequence, request.clone()));
        drop(state);

        self.publish(ChangeEvent::RequestCreated(request.clone()));
        Ok(RequestInsert::Created(request))
    }

    async fn update_listing(
        &self,
        id: &str,
        patch: ListingPatch,
        precondition: Option<ListingPrecondition>,
    ) -> Result<UpdateOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        let listing = match state.listings.get_mut(id) {
            Some((_, listing)) => listing,
            None => return Ok(UpdateOutcome::NotFound),
        };

        if let Some(precondition) = &precondition {
            if !precondition.holds(listing) {
                return Ok(UpdateOutcome::Conflict);
            }
        }

        patch.apply(listing);
        let updated = listing.clone();
        drop(state);

        self.publish(ChangeEvent::ListingUpdated(updated));
        Ok(UpdateOutcome::Applied)
    }

    async fn update_match_request(
        &self,
        id: &str,
        patch: RequestPatch,
    ) -> Result<UpdateOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        let request = match state.requests.get_mut(id) {
            Some((_, request)) => request,
            None => return Ok(UpdateOutcome::NotFound),
        };

        patch.apply(request);
        let updated = request.clone();
        drop(state);

        self.publish(ChangeEvent::RequestUpdated(updated));
        Ok(UpdateOutcome::Applied)
    }

    async fn query_requests_by_listing_ids(
        &self,
        listing_ids: &[String],
    ) -> Result<Vec<MatchRequest>, RepositoryError> {
        ensure_batch_size(listing_ids)?;

        let state = self.state.read().await;
        Ok(MemoryState::newest_first(
            state
                .requests
                .values()
                .filter(|(_, r)| listing_ids.contains(&r.food_entry_id)),
        ))
    }

    async fn delete_listing(
        &self,
        id: &str,
        precondition: Option<ListingPrecondition>,
    ) -> Result<UpdateOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        let listing = match state.listings.get(id) {
            Some((_, listing)) => listing,
            None => return Ok(UpdateOutcome::NotFound),
        };

        if let Some(precondition) = &precondition {
            if !precondition.holds(listing) {
                return Ok(UpdateOutcome::Conflict);
            }
        }

        state.listings.remove(id);
        drop(state);

        self.publish(ChangeEvent::ListingDeleted(id.to_string()));
        Ok(UpdateOutcome::Applied)
    }

    async fn create_shortage(&self, shortage: NewShortage) -> Result<Shortage, RepositoryError> {
        let mut state = self.state.write().await;
        let created_at = state.next_timestamp();

        let shortage = Shortage {
            id: uuid::Uuid::new_v4().to_string(),
            meals_needed: shortage.meals_needed,
            location: shortage.location,
            address: shortage.address,
            description: shortage.description,
            reporter_id: Some(shortage.reporter_id),
            geohash: Some(shortage.geohash),
            created_at,
        };

        // Appended in timestamp order
        state.shortages.push(shortage.clone());
        drop(state);

        self.publish(ChangeEvent::ShortageReported(shortage.clone()));
        Ok(shortage)
    }

    async fn list_shortages(&self, limit: usize) -> Result<Vec<Shortage>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.shortages.iter().rev().take(limit).cloned().collect())
    }

    async fn claim_atomically(
        &self,
        command: &ClaimCommand,
    ) -> Result<Option<ClaimOutcome>, RepositoryError> {
        let mut state = self.state.write().await;

        let listing = state.listings.get(&command.listing_id).map(|(_, l)| l);
        let request = state.requests.get(&command.request_id).map(|(_, r)| r);
        if let Err(rejection) = check_claim(command, listing, request) {
            return Ok(Some(ClaimOutcome::Rejected(rejection)));
        }

        let declined_ids = cascade_targets(
            &command.listing_id,
            &command.request_id,
            state.requests.values().map(|(_, r)| r),
        );

        let accept = RequestPatch::new(RequestStatus::Accepted, command.at);
        let decline = RequestPatch::new(RequestStatus::Declined, command.at);
        let mut events = Vec::with_capacity(declined_ids.len() + 2);

        let mut accepted = None;
        if let Some((_, request)) = state.requests.get_mut(&command.request_id) {
            accept.apply(request);
            accepted = Some(request.clone());
        }

        let mut claimed = None;
        if let Some((_, listing)) = state.listings.get_mut(&command.listing_id) {
            ListingPatch::claim(&command.request_id, command.at).apply(listing);
            claimed = Some(listing.clone());
        }

        let mut declined = Vec::with_capacity(declined_ids.len());
        for id in &declined_ids {
            if let Some((_, request)) = state.requests.get_mut(id) {
                decline.apply(request);
                declined.push(request.clone());
            }
        }
        drop(state);

        let (request, listing) = match (accepted, claimed) {
            (Some(request), Some(listing)) => (request, listing),
            // check_claim saw both under the same lock
            _ => return Err(RepositoryError::InvalidRecord("claim targets vanished".into())),
        };

        events.push(ChangeEvent::RequestUpdated(request.clone()));
        events.push(ChangeEvent::ListingUpdated(listing.clone()));
        events.extend(declined.iter().cloned().map(ChangeEvent::RequestUpdated));
        for event in events {
            self.publish(event);
        }

        Ok(Some(ClaimOutcome::Claimed(ClaimResult {
            listing,
            request,
            declined,
        })))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        Some(self.events.subscribe())
    }
}

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use thiserror::Error;

use crate::core::lifecycle::{cascade_targets, check_claim, ClaimCommand, ClaimOutcome, ClaimResult};
use crate::models::{
    Listing, ListingPatch, ListingPrecondition, ListingStatus, MatchRequest, NewListing,
    NewMatchRequest, NewShortage, Position, RequestPatch, RequestStatus, RequesterLocation,
    Shortage,
};
use crate::services::repository::{
    ensure_batch_size, ListingRepository, RepositoryError, RequestInsert, UpdateOutcome,
};

/// Errors that can occur when interacting with PostgreSQL
#[derive(Debug, Error)]
pub enum PostgresError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<PostgresError> for RepositoryError {
    fn from(value: PostgresError) -> Self {
        match value {
            PostgresError::InvalidRecord(message) => RepositoryError::InvalidRecord(message),
            other => RepositoryError::Unavailable(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(value: sqlx::Error) -> Self {
        PostgresError::from(value).into()
    }
}

const LISTING_COLUMNS: &str = "id, meals_available, latitude, longitude, address, description, \
     provider_id, geohash, status, claimed_by_request_id, claimed_at, created_at";

const REQUEST_COLUMNS: &str = "id, food_entry_id, requester_id, requester_lat, requester_lng, \
     requester_address, status, created_at, updated_at";

fn listing_from_row(row: &PgRow) -> Result<Listing, PostgresError> {
    let status: String = row.try_get("status")?;
    let status = ListingStatus::parse(&status)
        .ok_or_else(|| PostgresError::InvalidRecord(format!("unknown listing status '{}'", status)))?;
    let meals: i32 = row.try_get("meals_available")?;

    Ok(Listing {
        id: row.try_get("id")?,
        meals_available: u32::try_from(meals)
            .map_err(|_| PostgresError::InvalidRecord(format!("negative meal count {}", meals)))?,
        location: Position::new(row.try_get("latitude")?, row.try_get("longitude")?),
        address: row.try_get("address")?,
        description: row.try_get("description")?,
        provider_id: row.try_get("provider_id")?,
        geohash: row.try_get("geohash")?,
        created_at: row.try_get("created_at")?,
        status,
        claimed_by_request_id: row.try_get("claimed_by_request_id")?,
        claimed_at: row.try_get("claimed_at")?,
    })
}

fn request_from_row(row: &PgRow) -> Result<MatchRequest, PostgresError> {
    let status: String = row.try_get("status")?;
    let status = RequestStatus::parse(&status)
        .ok_or_else(|| PostgresError::InvalidRecord(format!("unknown request status '{}'", status)))?;

    Ok(MatchRequest {
        id: row.try_get("id")?,
        food_entry_id: row.try_get("food_entry_id")?,
        requester_id: row.try_get("requester_id")?,
        requester_location: RequesterLocation {
            lat: row.try_get("requester_lat")?,
            lng: row.try_get("requester_lng")?,
            address: row.try_get("requester_address")?,
        },
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SHORTAGE_COLUMNS: &str = "id, meals_needed, latitude, longitude, address, description, \
     reporter_id, geohash, created_at";

fn shortage_from_row(row: &PgRow) -> Result<Shortage, PostgresError> {
    let meals: i32 = row.try_get("meals_needed")?;

    Ok(Shortage {
        id: row.try_get("id")?,
        meals_needed: u32::try_from(meals)
            .map_err(|_| PostgresError::InvalidRecord(format!("negative meal count {}", meals)))?,
        location: Position::new(row.try_get("latitude")?, row.try_get("longitude")?),
        address: row.try_get("address")?,
        description: row.try_get("description")?,
        reporter_id: row.try_get("reporter_id")?,
        geohash: row.try_get("geohash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn listings_from_rows(rows: &[PgRow]) -> Result<Vec<Listing>, PostgresError> {
    rows.iter().map(listing_from_row).collect()
}

fn requests_from_rows(rows: &[PgRow]) -> Result<Vec<MatchRequest>, PostgresError> {
    rows.iter().map(request_from_row).collect()
}

/// PostgreSQL store for listings and requests
///
/// Conditional writes lock the listing row for the duration of the check, and
/// claims run accept, claim and cascade in a single transaction.
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client from a connection string
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, PostgresError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        // Run migrations on startup
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    async fn lock_listing(
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
    ) -> Result<Option<Listing>, PostgresError> {
        let query = format!("SELECT {} FROM food_entries WHERE id = $1 FOR UPDATE", LISTING_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&mut **tx).await?;
        row.as_ref().map(listing_from_row).transpose()
    }

    async fn lock_request(
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
    ) -> Result<Option<MatchRequest>, PostgresError> {
        let query = format!("SELECT {} FROM food_matches WHERE id = $1 FOR UPDATE", REQUEST_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&mut **tx).await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn write_listing_claim(
        tx: &mut Transaction<'_, Postgres>,
        listing: &Listing,
    ) -> Result<Listing, PostgresError> {
        let query = format!(
            r#"
            UPDATE food_entries
            SET status = $2, claimed_by_request_id = $3, claimed_at = $4
            WHERE id = $1
            RETURNING {}
            "#,
            LISTING_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(&listing.id)
            .bind(listing.status.as_str())
            .bind(&listing.claimed_by_request_id)
            .bind(listing.claimed_at)
            .fetch_one(&mut **tx)
            .await?;
        listing_from_row(&row)
    }

    async fn set_request_status(
        tx: &mut Transaction<'_, Postgres>,
        ids: &[String],
        patch: RequestPatch,
    ) -> Result<Vec<MatchRequest>, PostgresError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            r#"
            UPDATE food_matches
            SET status = $2, updated_at = $3
            WHERE id = ANY($1)
            RETURNING {}
            "#,
            REQUEST_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(ids.to_vec())
            .bind(patch.status.as_str())
            .bind(patch.updated_at)
            .fetch_all(&mut **tx)
            .await?;
        requests_from_rows(&rows)
    }

    async fn try_claim(&self, command: &ClaimCommand) -> Result<ClaimOutcome, PostgresError> {
        let mut tx = self.pool.begin().await?;

        let listing = Self::lock_listing(&mut tx, &command.listing_id).await?;
        let request = Self::lock_request(&mut tx, &command.request_id).await?;
        if let Err(rejection) = check_claim(command, listing.as_ref(), request.as_ref()) {
            tx.rollback().await?;
            return Ok(ClaimOutcome::Rejected(rejection));
        }

        let query = format!(
            "SELECT {} FROM food_matches WHERE food_entry_id = $1 FOR UPDATE",
            REQUEST_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(&command.listing_id)
            .fetch_all(&mut *tx)
            .await?;
        let siblings = requests_from_rows(&rows)?;
        let declined_ids = cascade_targets(&command.listing_id, &command.request_id, &siblings);

        let mut accepted = Self::set_request_status(
            &mut tx,
            std::slice::from_ref(&command.request_id),
            RequestPatch::new(RequestStatus::Accepted, command.at),
        )
        .await?;

        let mut listing = listing
            .ok_or_else(|| PostgresError::InvalidRecord("claimed listing vanished".into()))?;
        ListingPatch::claim(&command.request_id, command.at).apply(&mut listing);
        let listing = Self::write_listing_claim(&mut tx, &listing).await?;

        let declined = Self::set_request_status(
            &mut tx,
            &declined_ids,
            RequestPatch::new(RequestStatus::Declined, command.at),
        )
        .await?;

        tx.commit().await?;

        let request = accepted
            .pop()
            .ok_or_else(|| PostgresError::InvalidRecord("accepted request vanished".into()))?;

        tracing::debug!(
            "Claimed listing {} for request {} and declined {} others",
            command.listing_id,
            command.request_id,
            declined.len()
        );

        Ok(ClaimOutcome::Claimed(ClaimResult {
            listing,
            request,
            declined,
        }))
    }
}

#[async_trait]
impl ListingRepository for PostgresClient {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> Result<bool, RepositoryError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<Listing>, RepositoryError> {
        let query = format!(
            "SELECT {} FROM food_entries ORDER BY created_at DESC, id LIMIT $1",
            LISTING_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(listings_from_rows(&rows)?)
    }

    async fn get_listing(&self, id: &str) -> Result<Option<Listing>, RepositoryError> {
        let query = format!("SELECT {} FROM food_entries WHERE id = $1", LISTING_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(listing_from_row).transpose()?)
    }

    async fn create_listing(&self, listing: NewListing) -> Result<Listing, RepositoryError> {
        let meals = i32::try_from(listing.meals_available).map_err(|_| {
            RepositoryError::InvalidRecord(format!("meal count {} too large", listing.meals_available))
        })?;

        let query = format!(
            r#"
            INSERT INTO food_entries
                (id, meals_available, latitude, longitude, address, description, provider_id, geohash, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'available', $9)
            RETURNING {}
            "#,
            LISTING_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(meals)
            .bind(listing.location.latitude)
            .bind(listing.location.longitude)
            .bind(&listing.address)
            .bind(&listing.description)
            .bind(&listing.provider_id)
            .bind(&listing.geohash)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?;

        Ok(listing_from_row(&row)?)
    }

    async fn list_listings_by_provider(
        &self,
        provider_id: &str,
    ) -> Result<Vec<Listing>, RepositoryError> {
        let query = format!(
            "SELECT {} FROM food_entries WHERE provider_id = $1 ORDER BY created_at DESC, id",
            LISTING_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(provider_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(listings_from_rows(&rows)?)
    }

    async fn get_match_request(&self, id: &str) -> Result<Option<MatchRequest>, RepositoryError> {
        let query = format!("SELECT {} FROM food_matches WHERE id = $1", REQUEST_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(request_from_row).transpose()?)
    }

    async fn create_match_request(
        &self,
        request: NewMatchRequest,
    ) -> Result<RequestInsert, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // A claim holds the row FOR UPDATE, so it waits for this insert or runs before it
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM food_entries WHERE id = $1 FOR SHARE")
                .bind(&request.food_entry_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(status) = status else {
            tx.rollback().await?;
            return Ok(RequestInsert::ListingNotFound);
        };
        match ListingStatus::parse(&status) {
            Some(ListingStatus::Available) => {}
            Some(ListingStatus::Claimed) => {
                tx.rollback().await?;
                return Ok(RequestInsert::ListingClaimed);
            }
            None => {
                return Err(PostgresError::InvalidRecord(format!(
                    "unknown listing status '{}'",
                    status
                ))
                .into())
            }
        }

        let query = format!(
            r#"
            INSERT INTO food_matches
                (id, food_entry_id, requester_id, requester_lat, requester_lng, requester_address, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7)
            RETURNING {}
            "#,
            REQUEST_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&request.food_entry_id)
            .bind(&request.requester_id)
            .bind(request.requester_location.lat)
            .bind(request.requester_location.lng)
            .bind(&request.requester_location.address)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;
        let created = request_from_row(&row)?;

        tx.commit().await?;
        Ok(RequestInsert::Created(created))
    }

    async fn update_listing(
        &self,
        id: &str,
        patch: ListingPatch,
        precondition: Option<ListingPrecondition>,
    ) -> Result<UpdateOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let Some(mut listing) = Self::lock_listing(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(UpdateOutcome::NotFound);
        };

        if let Some(precondition) = &precondition {
            if !precondition.holds(&listing) {
                tx.rollback().await?;
                return Ok(UpdateOutcome::Conflict);
            }
        }

        patch.apply(&mut listing);
        Self::write_listing_claim(&mut tx, &listing).await?;
        tx.commit().await?;

        Ok(UpdateOutcome::Applied)
    }

    async fn update_match_request(
        &self,
        id: &str,
        patch: RequestPatch,
    ) -> Result<UpdateOutcome, RepositoryError> {
        let result = sqlx::query("UPDATE food_matches SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(patch.status.as_str())
            .bind(patch.updated_at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(UpdateOutcome::NotFound);
        }
        Ok(UpdateOutcome::Applied)
    }

    async fn query_requests_by_listing_ids(
        &self,
        listing_ids: &[String],
    ) -> Result<Vec<MatchRequest>, RepositoryError> {
        ensure_batch_size(listing_ids)?;
        if listing_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT {} FROM food_matches WHERE food_entry_id = ANY($1) ORDER BY created_at DESC, id",
            REQUEST_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(listing_ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        Ok(requests_from_rows(&rows)?)
    }

    async fn delete_listing(
        &self,
        id: &str,
        precondition: Option<ListingPrecondition>,
    ) -> Result<UpdateOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let Some(listing) = Self::lock_listing(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(UpdateOutcome::NotFound);
        };

        if let Some(precondition) = &precondition {
            if !precondition.holds(&listing) {
                tx.rollback().await?;
                return Ok(UpdateOutcome::Conflict);
            }
        }

        sqlx::query("DELETE FROM food_entries WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!("Deleted listing {}", id);
        Ok(UpdateOutcome::Applied)
    }

    async fn create_shortage(&self, shortage: NewShortage) -> Result<Shortage, RepositoryError> {
        let meals = i32::try_from(shortage.meals_needed).map_err(|_| {
            RepositoryError::InvalidRecord(format!("meal count {} too large", shortage.meals_needed))
        })?;

        let query = format!(
            r#"
            INSERT INTO food_shortages
                (id, meals_needed, latitude, longitude, address, description, reporter_id, geohash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            SHORTAGE_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(meals)
            .bind(shortage.location.latitude)
            .bind(shortage.location.longitude)
            .bind(&shortage.address)
            .bind(&shortage.description)
            .bind(&shortage.reporter_id)
            .bind(&shortage.geohash)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?;

        Ok(shortage_from_row(&row)?)
    }

    async fn list_shortages(&self, limit: usize) -> Result<Vec<Shortage>, RepositoryError> {
        let query = format!(
            "SELECT {} FROM food_shortages ORDER BY created_at DESC, id LIMIT $1",
            SHORTAGE_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(shortage_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn claim_atomically(
        &self,
        command: &ClaimCommand,
    ) -> Result<Option<ClaimOutcome>, RepositoryError> {
        Ok(Some(self.try_claim(command).await?))
    }
}

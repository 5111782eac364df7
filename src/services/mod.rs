// Service exports
pub mod appwrite;
pub mod cache;
pub mod geocoding;
pub mod identity;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use appwrite::{AppwriteClient, AppwriteCollections, AppwriteError};
pub use cache::{CacheManager, CacheKey, CacheError};
pub use geocoding::{Geocoder, GeocodingError, HttpGeocoder};
pub use identity::{IdentityError, Principal, TokenVerifier};
pub use memory::MemoryRepository;
pub use postgres::{PostgresClient, PostgresError};
pub use repository::{
    ChangeEvent, ListingRepository, RepositoryError, RequestInsert, UpdateOutcome,
    MAX_IN_QUERY_VALUES,
};

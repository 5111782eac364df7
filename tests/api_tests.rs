// HTTP API and external adapter tests for Food Match

use actix_web::{test, web, App};
use food_match::core::{Matcher, MatchingWorkflow, WorkflowSettings};
use food_match::models::{
    ListingPrecondition, ListingStatus, NewMatchRequest, Position, RequesterLocation,
};
use food_match::routes::{self, AppState};
use food_match::services::{
    AppwriteClient, AppwriteCollections, CacheManager, Geocoder, HttpGeocoder, ListingRepository,
    MemoryRepository, RepositoryError, RequestInsert, TokenVerifier, UpdateOutcome,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "test-secret";

fn state_with_geocoder(geocoder: HttpGeocoder) -> AppState {
    AppState {
        workflow: MatchingWorkflow::new(
            Arc::new(MemoryRepository::new()),
            Matcher::default(),
            WorkflowSettings::default(),
        ),
        geocoder: Arc::new(geocoder),
        verifier: Arc::new(TokenVerifier::new(SECRET, None)),
    }
}

fn offline_state() -> AppState {
    state_with_geocoder(HttpGeocoder::new(
        "http://127.0.0.1:9/geocode".to_string(),
        String::new(),
        Duration::from_secs(1),
    ))
}

fn bearer(user_id: &str) -> (&'static str, String) {
    let token = TokenVerifier::new(SECRET, None)
        .issue(user_id, chrono::Duration::minutes(10))
        .unwrap();
    ("Authorization", format!("Bearer {}", token))
}

fn geocode_body(lat: f64, lng: f64) -> String {
    json!({
        "status": "OK",
        "results": [{ "geometry": { "location": { "lat": lat, "lng": lng } } }]
    })
    .to_string()
}

#[actix_web::test]
async fn test_health_reports_backend() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(offline_state()))
            .configure(routes::configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["backend"], "memory");
}

#[actix_web::test]
async fn test_listing_lifecycle_over_http() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(offline_state()))
            .configure(routes::configure_routes),
    )
    .await;

    // Mutations need a principal
    let req = test::TestRequest::post()
        .uri("/api/v1/listings")
        .set_json(json!({ "mealsAvailable": 4, "address": "1 Main St", "description": "Soup" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/v1/listings")
        .insert_header(bearer("provider-1"))
        .set_json(json!({
            "mealsAvailable": 4,
            "address": "1 Main St",
            "description": "Soup",
            "latitude": 40.0,
            "longitude": -75.0
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let listing: Value = test::read_body_json(resp).await;
    let listing_id = listing["id"].as_str().unwrap().to_string();
    assert_eq!(listing["status"], "available");

    let search = json!({ "latitude": 40.05, "longitude": -75.05, "radiusKm": 10 });
    let req = test::TestRequest::post()
        .uri("/api/v1/listings/search")
        .set_json(&search)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["candidates"].as_array().unwrap().len(), 1);
    assert_eq!(body["candidates"][0]["id"], listing_id.as_str());

    let mut request_ids = Vec::new();
    for requester in ["requester-1", "requester-2"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/requests")
            .insert_header(bearer(requester))
            .set_json(json!({
                "listingId": listing_id,
                "address": "9 Elm St",
                "latitude": 40.01,
                "longitude": -75.01
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let request: Value = test::read_body_json(resp).await;
        assert_eq!(request["status"], "pending");
        request_ids.push(request["id"].as_str().unwrap().to_string());
    }

    // Another provider may not accept
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/requests/{}/accept", request_ids[0]))
        .insert_header(bearer("provider-2"))
        .set_json(json!({ "listingId": listing_id }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/requests/{}/accept", request_ids[0]))
        .insert_header(bearer("provider-1"))
        .set_json(json!({ "listingId": listing_id }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let accepted: Value = test::read_body_json(resp).await;
    assert_eq!(accepted["listing"]["status"], "claimed");
    assert_eq!(accepted["declinedRequestIds"], json!([request_ids[1]]));

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/requests/{}/accept", request_ids[1]))
        .insert_header(bearer("provider-1"))
        .set_json(json!({ "listingId": listing_id }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    let req = test::TestRequest::post()
        .uri("/api/v1/listings/search")
        .set_json(&search)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["candidates"].as_array().unwrap().is_empty());

    let req = test::TestRequest::get()
        .uri("/api/v1/dashboard")
        .insert_header(bearer("provider-1"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["listings"].as_array().unwrap().len(), 1);
    assert_eq!(body["requests"].as_array().unwrap().len(), 2);
}

#[actix_web::test]
async fn test_shortage_reports_over_http() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(offline_state()))
            .configure(routes::configure_routes),
    )
    .await;

    let report = json!({
        "mealsNeeded": 40,
        "address": "Shelter on 5th",
        "description": "Dinner for forty",
        "latitude": 39.95,
        "longitude": -75.16
    });

    let req = test::TestRequest::post()
        .uri("/api/v1/shortages")
        .set_json(&report)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/v1/shortages")
        .insert_header(bearer("shelter-1"))
        .set_json(json!({ "mealsNeeded": 0, "address": "Shelter", "description": "None" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/shortages")
        .insert_header(bearer("shelter-1"))
        .set_json(&report)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let shortage: Value = test::read_body_json(resp).await;
    assert_eq!(shortage["mealsNeeded"], 40);
    assert_eq!(shortage["reporterId"], "shelter-1");
    assert_eq!(shortage["geohash"].as_str().map(str::len), Some(9));

    let req = test::TestRequest::get()
        .uri("/api/v1/shortages?latitude=39.96&longitude=-75.17&radiusKm=5")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["shortages"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::get()
        .uri("/api/v1/shortages?latitude=45.0&longitude=-75.17&radiusKm=5")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["shortages"].as_array().unwrap().is_empty());

    let req = test::TestRequest::get()
        .uri("/api/v1/shortages?latitude=39.96")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn test_search_without_location_is_rejected() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(offline_state()))
            .configure(routes::configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/listings/search")
        .set_json(json!({ "radiusKm": 5 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status_code"], 400);
}

#[actix_web::test]
async fn test_search_geocodes_address_once() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/geocode")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(geocode_body(40.05, -75.05))
        .expect(1)
        .create_async()
        .await;

    let geocoder = HttpGeocoder::new(
        format!("{}/geocode", server.url()),
        "maps-key".to_string(),
        Duration::from_secs(5),
    )
    .with_cache(Arc::new(CacheManager::in_memory(100, 60)));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_with_geocoder(geocoder)))
            .configure(routes::configure_routes),
    )
    .await;

    for address in ["100 Market St", "  100 market st "] {
        let req = test::TestRequest::post()
            .uri("/api/v1/listings/search")
            .set_json(json!({ "address": address, "radiusKm": 10 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    mock.assert_async().await;
}

#[tokio::test]
async fn test_geocoder_zero_results() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/geocode")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"ZERO_RESULTS","results":[]}"#)
        .create_async()
        .await;

    let geocoder = HttpGeocoder::new(
        format!("{}/geocode", server.url()),
        "maps-key".to_string(),
        Duration::from_secs(5),
    );

    let result = geocoder.geocode("nowhere").await;
    assert!(matches!(result, Err(food_match::services::GeocodingError::NotFound(_))));
}

fn appwrite_client(base_url: String) -> AppwriteClient {
    AppwriteClient::new(
        base_url,
        "api-key".to_string(),
        "project".to_string(),
        "db".to_string(),
        AppwriteCollections {
            food_entries: "food_entries".to_string(),
            food_matches: "food_matches".to_string(),
            food_shortages: "food_shortages".to_string(),
        },
        Duration::from_secs(5),
    )
    .unwrap()
}

fn entry_document(id: &str, status: &str) -> Value {
    json!({
        "$id": id,
        "$createdAt": "2024-05-01T10:00:00.000+00:00",
        "mealsAvailable": 3,
        "latitude": 40.0,
        "longitude": -75.0,
        "address": "1 Main St",
        "description": "Bagels",
        "providerId": "provider-1",
        "status": status
    })
}

#[tokio::test]
async fn test_appwrite_lists_and_fetches_entries() {
    let mut server = mockito::Server::new_async().await;
    let list = server
        .mock("GET", "/databases/db/collections/food_entries/documents")
        .match_query(mockito::Matcher::Any)
        .match_header("X-Appwrite-Project", "project")
        .match_header("X-Appwrite-Key", "api-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "total": 1, "documents": [entry_document("e1", "available")] }).to_string())
        .create_async()
        .await;
    let missing = server
        .mock("GET", "/databases/db/collections/food_entries/documents/gone")
        .with_status(404)
        .with_body(r#"{"message":"Document not found","code":404}"#)
        .create_async()
        .await;

    let client = appwrite_client(server.url());

    let listings = client.list_active(50).await.unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].id, "e1");
    assert_eq!(listings[0].location, Position::new(40.0, -75.0));

    assert!(client.get_listing("gone").await.unwrap().is_none());

    list.assert_async().await;
    missing.assert_async().await;
}

#[tokio::test]
async fn test_appwrite_lists_shortages() {
    let mut server = mockito::Server::new_async().await;
    let list = server
        .mock("GET", "/databases/db/collections/food_shortages/documents")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "total": 1,
                "documents": [{
                    "$id": "s1",
                    "$createdAt": "2024-05-01T10:00:00.000+00:00",
                    "mealsNeeded": 25,
                    "latitude": 39.95,
                    "longitude": -75.16,
                    "address": "Shelter",
                    "description": "Lunch"
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = appwrite_client(server.url());
    let shortages = client.list_shortages(20).await.unwrap();
    assert_eq!(shortages.len(), 1);
    assert_eq!(shortages[0].meals_needed, 25);

    list.assert_async().await;
}

#[tokio::test]
async fn test_appwrite_request_on_claimed_entry_is_not_written() {
    let mut server = mockito::Server::new_async().await;
    let _read = server
        .mock("GET", "/databases/db/collections/food_entries/documents/e1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(entry_document("e1", "claimed").to_string())
        .create_async()
        .await;
    let write = server
        .mock("POST", "/databases/db/collections/food_matches/documents")
        .with_status(201)
        .expect(0)
        .create_async()
        .await;

    let client = appwrite_client(server.url());
    let outcome = client
        .create_match_request(NewMatchRequest {
            food_entry_id: "e1".to_string(),
            requester_id: "requester-1".to_string(),
            requester_location: RequesterLocation {
                lat: 40.01,
                lng: -75.01,
                address: "9 Elm St".to_string(),
            },
        })
        .await
        .unwrap();
    assert_eq!(outcome, RequestInsert::ListingClaimed);

    write.assert_async().await;
}

#[tokio::test]
async fn test_appwrite_precondition_blocks_write() {
    let mut server = mockito::Server::new_async().await;
    let _read = server
        .mock("GET", "/databases/db/collections/food_entries/documents/e1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(entry_document("e1", "claimed").to_string())
        .create_async()
        .await;
    let write = server
        .mock("DELETE", "/databases/db/collections/food_entries/documents/e1")
        .with_status(204)
        .expect(0)
        .create_async()
        .await;

    let client = appwrite_client(server.url());
    let outcome = client
        .delete_listing("e1", Some(ListingPrecondition::StatusIs(ListingStatus::Available)))
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Conflict);

    write.assert_async().await;
}

#[tokio::test]
async fn test_appwrite_rejects_oversized_batch() {
    let client = appwrite_client("http://127.0.0.1:9".to_string());
    let ids: Vec<String> = (0..11).map(|i| format!("e{}", i)).collect();

    let result = client.query_requests_by_listing_ids(&ids).await;
    assert!(matches!(result, Err(RepositoryError::BatchTooLarge(11))));
}

#[tokio::test]
async fn test_appwrite_unauthorized_surfaces_as_unavailable() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/databases/db/collections/food_matches/documents/r1")
        .with_status(401)
        .create_async()
        .await;

    let client = appwrite_client(server.url());
    let result = client.get_match_request("r1").await;
    assert!(matches!(result, Err(RepositoryError::Unavailable(_))));
}

// Criterion benchmarks for Food Match

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use food_match::core::{
    distance::{calculate_bounding_box, geohash_encode, haversine_distance},
    ListingDraft, Matcher, MatchingWorkflow, WorkflowSettings,
};
use food_match::models::{Listing, ListingStatus, Position, SearchOrder};
use food_match::services::{MemoryRepository, Principal};
use std::sync::Arc;

fn create_listing(id: usize, lat: f64, lon: f64) -> Listing {
    Listing {
        id: id.to_string(),
        meals_available: 1 + (id % 20) as u32,
        location: Position::new(lat, lon),
        address: format!("{} Market St", id),
        description: "Prepared meals".to_string(),
        provider_id: Some(format!("provider-{}", id % 7)),
        geohash: None,
        created_at: Utc::now() - Duration::seconds(id as i64),
        status: if id % 5 == 0 { ListingStatus::Claimed } else { ListingStatus::Available },
        claimed_by_request_id: None,
        claimed_at: None,
    }
}

fn create_listings(count: usize) -> Vec<Listing> {
    (0..count)
        .map(|i| {
            let lat_offset = (i as f64 * 0.001) % 0.5;
            let lon_offset = (i as f64 * 0.0013) % 0.5;
            create_listing(i, 40.0 + lat_offset, -75.0 + lon_offset)
        })
        .collect()
}

fn bench_haversine_distance(c: &mut Criterion) {
    c.bench_function("haversine_distance", |b| {
        b.iter(|| {
            haversine_distance(
                black_box(40.0),
                black_box(-75.0),
                black_box(40.05),
                black_box(-75.05),
            )
        });
    });
}

fn bench_bounding_box(c: &mut Criterion) {
    c.bench_function("bounding_box_calculation", |b| {
        b.iter(|| calculate_bounding_box(black_box(40.0), black_box(-75.0), black_box(10.0)));
    });
}

fn bench_geohash(c: &mut Criterion) {
    c.bench_function("geohash_encode_9", |b| {
        b.iter(|| geohash_encode(black_box(40.0), black_box(-75.0), black_box(9)));
    });
}

fn bench_find_candidates(c: &mut Criterion) {
    let origin = Position::new(40.05, -75.05);
    let mut group = c.benchmark_group("find_candidates");

    for order in [SearchOrder::Recency, SearchOrder::Distance] {
        let matcher = Matcher::new(order, 50.0, 1000);

        for listing_count in [50, 500, 1000].iter() {
            let listings = create_listings(*listing_count);

            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", order), listing_count),
                listing_count,
                |b, _| {
                    b.iter(|| {
                        matcher.find_candidates(
                            black_box(origin),
                            black_box(10.0),
                            black_box(listings.clone()),
                        )
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_workflow_search(c: &mut Criterion) {
    let workflow = MatchingWorkflow::new(
        Arc::new(MemoryRepository::new()),
        Matcher::default(),
        WorkflowSettings::default(),
    );
    let provider = Principal::new("provider-1");

    tokio_test::block_on(async {
        for listing in create_listings(50) {
            let draft = ListingDraft {
                meals_available: listing.meals_available,
                location: listing.location,
                address: listing.address,
                description: listing.description,
            };
            let _ = workflow.create_listing(&provider, draft).await;
        }
    });

    c.bench_function("workflow_search_50_listings", |b| {
        b.iter(|| {
            tokio_test::block_on(workflow.search(black_box(Position::new(40.05, -75.05)), black_box(10.0)))
        });
    });
}

criterion_group!(
    benches,
    bench_haversine_distance,
    bench_bounding_box,
    bench_geohash,
    bench_find_candidates,
    bench_workflow_search
);

criterion_main!(benches);

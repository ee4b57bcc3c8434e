use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ingest_core::import::map_listing;
use ingest_core::{Database, ExternalListing, LocationField, PriceField, RawListing, SourceId};
use ingest_scrapers::sites::{buyrentkenya, jiji};
use ingest_scrapers::{BuyRentKenyaAdapter, JijiAdapter, PageClient, DEFAULT_USER_AGENT};
use serde_json::json;
use std::time::Duration;
use tokio::runtime::Runtime;
use url::Url;

fn results_page(cards: usize) -> String {
    let mut html = String::from(r#"<html><body><div data-cy="search-result-list">"#);
    for n in 0..cards {
        html.push_str(&format!(
            r#"<div class="listing-card" data-id="{n}">
                 <a href="/listings/house-{n}"><h2 class="listing-card__title">House {n}</h2></a>
                 <p class="listing-card__price">KSh {price}</p>
                 <p class="listing-card__location">Karen, Nairobi</p>
                 <ul><li data-cy="card-bedroom_count">{beds} Bedrooms</li></ul>
                 <img data-src="https://img.example/{n}.jpg">
               </div>"#,
            price = 5_000_000 + n * 1_000,
            beds = n % 5 + 1,
        ));
    }
    html.push_str("</div></body></html>");
    html
}

fn search_response(adverts: usize) -> String {
    let adverts: Vec<_> = (0..adverts)
        .map(|n| {
            json!({
                "url": format!("/nairobi/houses/house-{n}.html"),
                "title": format!("House {n}"),
                "price_obj": { "value": 7_500_000 + n, "view": "KSh 7.5M" },
                "region_name": "Kilimani",
                "region_parent_name": "Nairobi",
                "attrs": [{ "name": "Bedrooms", "value": n % 5 + 1 }],
                "images": [{ "url": format!("https://pictures.example/{n}.jpg") }],
            })
        })
        .collect();
    json!({ "adverts_list": { "adverts": adverts } }).to_string()
}

fn staged_row(n: i64) -> ExternalListing {
    let now = Utc::now();
    ExternalListing {
        id: n,
        source: SourceId::Property24,
        source_url: format!("https://www.property24.co.ke/listing/{n}"),
        title: Some(format!("  3 bedroom apartment {n} ")),
        price_text: Some("KSh 12,500,000".to_string()),
        price_amount: None,
        location_text: Some("Westlands, Nairobi".to_string()),
        location: None,
        bedrooms: Some(3),
        bathrooms: Some(2),
        image_urls: Vec::new(),
        posted_at: Some("Listed 12 March 2024".to_string()),
        raw_json: None,
        imported: false,
        import_error: None,
        last_seen_run: Some(1),
        created_at: now,
        updated_at: now,
        imported_at: None,
    }
}

fn raw_listings(count: usize) -> Vec<RawListing> {
    (0..count)
        .map(|n| {
            let mut listing =
                RawListing::new(SourceId::Jiji, format!("https://jiji.co.ke/houses/{n}.html"));
            listing.title = Some(format!("House {n}"));
            listing.price = Some(PriceField::Amount(6_000_000.0 + n as f64));
            listing.location = Some(LocationField::Text("Kilimani, Nairobi".to_string()));
            listing
        })
        .collect()
}

fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");

    let client = PageClient::new(Duration::from_secs(5), DEFAULT_USER_AGENT).unwrap();
    let brk = BuyRentKenyaAdapter::new(client, Url::parse(buyrentkenya::DEFAULT_BASE_URL).unwrap())
        .unwrap();
    let brk_url = brk.page_url(1);
    let jiji_url = Url::parse(jiji::DEFAULT_BASE_URL).unwrap();

    for size in [20, 100].iter() {
        let html = results_page(*size);
        group.bench_with_input(BenchmarkId::new("buyrentkenya", size), &html, |b, html| {
            b.iter(|| black_box(brk.parse_listings(html, &brk_url, 1).unwrap()));
        });

        let body = search_response(*size);
        group.bench_with_input(BenchmarkId::new("jiji", size), &body, |b, body| {
            b.iter(|| black_box(JijiAdapter::parse_listings(body, &jiji_url, 1).unwrap()));
        });
    }

    group.finish();
}

fn bench_mapping(c: &mut Criterion) {
    let rows: Vec<_> = (0..100).map(staged_row).collect();
    c.bench_function("map_listing", |b| {
        b.iter(|| {
            for row in &rows {
                black_box(map_listing(row).unwrap());
            }
        })
    });
}

fn bench_staging(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("staging");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for size in [10, 100].iter() {
        let listings = raw_listings(*size);
        group.bench_with_input(BenchmarkId::new("stage_page", size), &listings, |b, listings| {
            b.to_async(&rt).iter(|| async {
                let db = Database::in_memory().await.unwrap();
                // The second pass exercises the update path.
                black_box(db.stage_page(Some(1), listings).await.unwrap());
                black_box(db.stage_page(Some(2), listings).await.unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parsing, bench_mapping, bench_staging);
criterion_main!(benches);

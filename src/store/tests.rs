use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use super::*;
use crate::limits::*;
use crate::wal::Faults;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("daybook_test_store");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open(name: &str) -> Store {
    Store::open(&test_wal_path(name), Arc::new(UlidTicketIssuer)).unwrap()
}

/// A store whose WAL can be told to fail.
fn open_with_faults(name: &str) -> (Store, Arc<Faults>) {
    let (wal, events) = Wal::open(&test_wal_path(name)).unwrap();
    let faults = wal.faults();
    let store = Store::start(wal, &events, Arc::new(UlidTicketIssuer)).unwrap();
    (store, faults)
}

fn date(y: i32, m: u32, d: u32) -> Date {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A product with a single availability row on 2025-06-01.
async fn product_with_day(store: &Store, capacity: u32) -> (Product, Availability) {
    let product = store.create_product("Sunset tour", capacity).await.unwrap();
    let mut rows = store.insert_many(product.id, &[date(2025, 6, 1)]).await.unwrap();
    (product, rows.remove(0))
}

fn assert_invalid(err: &StoreError, expected_field: &str) {
    match err {
        StoreError::InvalidRequest { field, .. } => assert_eq!(*field, expected_field),
        other => panic!("expected InvalidRequest on {expected_field}, got {other:?}"),
    }
}

// ── Products ─────────────────────────────────────────────

#[tokio::test]
async fn create_and_list_products() {
    let store = open("products.wal");
    let a = store.create_product("Bike hire", 12).await.unwrap();
    let b = store.create_product("  Wine tasting ", 8).await.unwrap();
    assert_eq!(b.name, "Wine tasting");

    assert_eq!(store.get_product(a.id).unwrap(), a);
    let listed = store.list_products();
    assert_eq!(listed, vec![a, b]);
}

#[tokio::test]
async fn product_validation() {
    let store = open("product_validation.wal");
    assert_invalid(&store.create_product("", 1).await.unwrap_err(), "name");
    assert_invalid(&store.create_product("x", 0).await.unwrap_err(), "capacity");
    assert_invalid(
        &store.create_product("x", MAX_CAPACITY + 1).await.unwrap_err(),
        "capacity",
    );
    let long = "a".repeat(MAX_NAME_LEN + 1);
    let err = store.create_product(&long, 1).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidRequest);
    assert!(store.list_products().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn product_limit_holds_under_concurrency() {
    let mut store = open("product_limit.wal");
    store.product_limit = 3;
    let store = Arc::new(store);

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.create_product(&format!("Tour {i}"), 5).await })
        })
        .collect();
    let mut created = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(matches!(e, StoreError::LimitExceeded(_)), "got {e:?}"),
        }
    }
    assert_eq!(created, 3);
    assert_eq!(store.list_products().len(), 3);
}

#[tokio::test]
async fn unknown_product_is_not_found() {
    let store = open("unknown_product.wal");
    let id = Ulid::new();
    assert_eq!(store.get_product(id).unwrap_err().class(), ErrorClass::NotFound);
    assert_eq!(
        store.get(id, date(2025, 1, 1)).await.unwrap_err().class(),
        ErrorClass::NotFound
    );
    assert_eq!(store.get_latest(id).await.unwrap_err().class(), ErrorClass::NotFound);
    assert_eq!(
        store.insert_many(id, &[date(2025, 1, 1)]).await.unwrap_err().class(),
        ErrorClass::NotFound
    );
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn insert_many_creates_full_rows() {
    let store = open("insert_many.wal");
    let product = store.create_product("Boat", 7).await.unwrap();
    let dates = [date(2025, 6, 3), date(2025, 6, 1), date(2025, 6, 2)];
    let rows = store.insert_many(product.id, &dates).await.unwrap();

    let got: Vec<Date> = rows.iter().map(|a| a.local_date).collect();
    assert_eq!(got, vec![date(2025, 6, 1), date(2025, 6, 2), date(2025, 6, 3)]);
    for row in &rows {
        assert_eq!(row.product_id, product.id);
        assert_eq!(row.vacancies, 7);
        assert_eq!(row.status, AvailabilityStatus::Available);
        assert!(row.available);
    }
    assert!(store.insert_many(product.id, &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn insert_many_is_all_or_nothing() {
    let store = open("insert_atomic.wal");
    let product = store.create_product("Boat", 7).await.unwrap();
    store.insert_many(product.id, &[date(2025, 6, 2)]).await.unwrap();

    let err = store
        .insert_many(product.id, &[date(2025, 6, 1), date(2025, 6, 2), date(2025, 6, 3)])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { date: d, .. } if d == date(2025, 6, 2)));
    assert_eq!(err.class(), ErrorClass::InvalidRequest);
    assert!(store.get(product.id, date(2025, 6, 1)).await.unwrap().is_none());
    assert!(store.get(product.id, date(2025, 6, 3)).await.unwrap().is_none());

    let err = store
        .insert_many(product.id, &[date(2025, 7, 1), date(2025, 7, 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
    assert!(store.get(product.id, date(2025, 7, 1)).await.unwrap().is_none());
}

#[tokio::test]
async fn insert_many_batch_limit() {
    let store = open("insert_limit.wal");
    let product = store.create_product("Boat", 1).await.unwrap();
    let start = date(2025, 1, 1);
    let dates: Vec<Date> = start.iter_days().take(MAX_INSERT_BATCH + 1).collect();
    let err = store.insert_many(product.id, &dates).await.unwrap_err();
    assert!(matches!(err, StoreError::LimitExceeded(_)));
}

#[tokio::test]
async fn same_date_for_different_products() {
    let store = open("two_products_same_date.wal");
    let a = store.create_product("A", 1).await.unwrap();
    let b = store.create_product("B", 2).await.unwrap();
    let day = date(2025, 8, 8);
    store.insert_many(a.id, &[day]).await.unwrap();
    store.insert_many(b.id, &[day]).await.unwrap();
    assert_eq!(store.get(a.id, day).await.unwrap().unwrap().vacancies, 1);
    assert_eq!(store.get(b.id, day).await.unwrap().unwrap().vacancies, 2);
}

#[tokio::test]
async fn range_is_inclusive_and_ordered() {
    let store = open("range.wal");
    let product = store.create_product("Boat", 3).await.unwrap();
    let dates: Vec<Date> = date(2025, 2, 1).iter_days().take(10).collect();
    store.insert_many(product.id, &dates).await.unwrap();

    let rows = store
        .get_range(product.id, date(2025, 2, 3), date(2025, 2, 6))
        .await
        .unwrap();
    let got: Vec<Date> = rows.iter().map(|a| a.local_date).collect();
    assert_eq!(
        got,
        vec![date(2025, 2, 3), date(2025, 2, 4), date(2025, 2, 5), date(2025, 2, 6)]
    );

    let single = store
        .get_range(product.id, date(2025, 2, 10), date(2025, 2, 10))
        .await
        .unwrap();
    assert_eq!(single.len(), 1);

    let beyond = store
        .get_range(product.id, date(2025, 2, 9), date(2025, 3, 30))
        .await
        .unwrap();
    assert_eq!(beyond.len(), 2);
}

#[tokio::test]
async fn range_validation() {
    let store = open("range_validation.wal");
    let product = store.create_product("Boat", 3).await.unwrap();
    let err = store
        .get_range(product.id, date(2025, 2, 6), date(2025, 2, 3))
        .await
        .unwrap_err();
    assert_invalid(&err, "localDateEnd");

    let from = date(2025, 1, 1);
    let to = from + chrono::Days::new(MAX_RANGE_DAYS as u64);
    let err = store.get_range(product.id, from, to).await.unwrap_err();
    assert!(matches!(err, StoreError::LimitExceeded(_)));

    let to = from + chrono::Days::new(MAX_RANGE_DAYS as u64 - 1);
    assert!(store.get_range(product.id, from, to).await.unwrap().is_empty());
}

#[tokio::test]
async fn latest_is_max_date() {
    let store = open("latest.wal");
    let product = store.create_product("Boat", 3).await.unwrap();
    assert!(store.get_latest(product.id).await.unwrap().is_none());
    store
        .insert_many(product.id, &[date(2025, 5, 2), date(2025, 5, 9), date(2025, 5, 4)])
        .await
        .unwrap();
    let latest = store.get_latest(product.id).await.unwrap().unwrap();
    assert_eq!(latest.local_date, date(2025, 5, 9));
}

#[tokio::test]
async fn get_by_id_unknown() {
    let store = open("by_id_unknown.wal");
    let err = store.get_by_id(Ulid::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "availability", .. }));
}

// ── Reservations ─────────────────────────────────────────

#[tokio::test]
async fn capacity_five_scenario() {
    let store = open("scenario.wal");
    let (product, day) = product_with_day(&store, 5).await;

    let first = store.reserve(product.id, day.id, 3).await.unwrap();
    assert_eq!(first.status, BookingStatus::Reserved);
    assert_eq!(first.unit_count(), 3);
    assert!(first.units.iter().all(|u| u.ticket.is_none()));
    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 2);

    let err = store.reserve(product.id, day.id, 3).await.unwrap_err();
    match &err {
        StoreError::InvalidRequest { field, reason } => {
            assert_eq!(*field, "units");
            assert_eq!(reason, "units is greater than availability vacancies");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 2);

    store.reserve(product.id, day.id, 2).await.unwrap();
    let sold_out = store.get_by_id(day.id).await.unwrap();
    assert_eq!(sold_out.vacancies, 0);
    assert_eq!(sold_out.status, AvailabilityStatus::SoldOut);
    assert!(!sold_out.available);

    let confirmed = store.confirm(first.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.unit_count(), 3);
    assert!(confirmed.units.iter().all(|u| u.ticket.as_deref().is_some_and(|t| !t.is_empty())));
    assert_eq!(
        confirmed.units.iter().map(|u| u.id).collect::<Vec<_>>(),
        first.units.iter().map(|u| u.id).collect::<Vec<_>>()
    );
    // Confirming does not change vacancy.
    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 0);
}

#[tokio::test]
async fn unit_boundaries() {
    let store = open("boundaries.wal");
    let (product, day) = product_with_day(&store, 4).await;

    assert_invalid(&store.reserve(product.id, day.id, 0).await.unwrap_err(), "units");
    assert_invalid(&store.reserve(product.id, day.id, -1).await.unwrap_err(), "units");
    assert_invalid(
        &store
            .reserve(product.id, day.id, MAX_UNITS_PER_BOOKING + 1)
            .await
            .unwrap_err(),
        "units",
    );
    assert_invalid(&store.reserve(product.id, day.id, 5).await.unwrap_err(), "units");

    store.reserve(product.id, day.id, 4).await.unwrap();
    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 0);
    assert_invalid(&store.reserve(product.id, day.id, 1).await.unwrap_err(), "units");
}

#[tokio::test]
async fn reserve_rejects_foreign_availability() {
    let store = open("foreign.wal");
    let (_, day) = product_with_day(&store, 4).await;
    let other = store.create_product("Other", 4).await.unwrap();

    let err = store.reserve(other.id, day.id, 1).await.unwrap_err();
    assert_invalid(&err, "availabilityId");

    let err = store.reserve(other.id, Ulid::new(), 1).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
}

#[tokio::test]
async fn reserve_against_prechecks_and_rechecks() {
    let store = open("reserve_against.wal");
    let (product, day) = product_with_day(&store, 3).await;

    // Stale record: claims 3 vacancies but another caller took 2 meanwhile.
    store.reserve(product.id, day.id, 2).await.unwrap();
    let err = store.reserve_against(&day, 2).await.unwrap_err();
    assert_invalid(&err, "units");

    let fresh = store.get_by_id(day.id).await.unwrap();
    assert_invalid(&store.reserve_against(&fresh, 2).await.unwrap_err(), "units");
    let booking = store.reserve_against(&fresh, 1).await.unwrap();
    assert_eq!(booking.product_id, product.id);
    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_overbook() {
    let store = Arc::new(open("concurrent.wal"));
    let capacity = 10;
    let (product, day) = product_with_day(&store, capacity).await;
    let (product_id, availability_id) = (product.id, day.id);

    let mut handles = Vec::new();
    for _ in 0..200 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.reserve(product_id, availability_id, 1).await
        }));
    }
    let results = futures::future::join_all(handles).await;

    let mut ok = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert_eq!(e.class(), ErrorClass::InvalidRequest),
        }
    }
    assert_eq!(ok, capacity as usize);
    let row = store.get_by_id(day.id).await.unwrap();
    assert_eq!(row.vacancies, 0);
    assert_eq!(row.status, AvailabilityStatus::SoldOut);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mixed_sizes_stay_within_capacity() {
    let store = Arc::new(open("concurrent_mixed.wal"));
    let (product, day) = product_with_day(&store, 17).await;
    let (product_id, availability_id) = (product.id, day.id);

    let handles: Vec<_> = (0..60)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.reserve(product_id, availability_id, 1 + i % 4).await })
        })
        .collect();
    let booked: usize = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap().ok())
        .map(|b| b.unit_count())
        .sum();

    assert!(booked <= 17);
    let row = store.get_by_id(day.id).await.unwrap();
    assert_eq!(row.vacancies as usize, 17 - booked);
}

#[tokio::test]
async fn dropped_caller_leaves_no_partial_booking() {
    let store = Arc::new(open("dropped_caller.wal"));
    let (product, day) = product_with_day(&store, 50).await;
    let (product_id, availability_id) = (product.id, day.id);

    // Start many reservations and abort them at arbitrary points.
    let handles: Vec<_> = (0..20)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.reserve(product_id, availability_id, 2).await })
        })
        .collect();
    for h in &handles {
        h.abort();
    }
    for h in handles {
        let _ = h.await;
    }
    // Let any commit that had already started finish.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let row = store.get_by_id(day.id).await.unwrap();
    assert_eq!((50 - row.vacancies) % 2, 0, "every booking has all of its units");
}

#[tokio::test]
async fn deadline_expiring_before_commit_leaves_nothing() {
    let store = open("deadline.wal");
    let (product, day) = product_with_day(&store, 5).await;
    let booking = store.reserve(product.id, day.id, 1).await.unwrap();

    let row = store.tables.row(&day.id).unwrap();
    let held = row.write().await;
    let short = || Deadline::after(Duration::from_millis(20));
    let err = store
        .reserve_within(short(), product.id, day.id, 1)
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Unavailable);
    let err = store.confirm_within(short(), booking.id).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Unavailable);
    drop(held);

    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 4);
    assert_eq!(
        store.get_booking(booking.id).await.unwrap().status,
        BookingStatus::Reserved
    );

    let generous = Deadline::after(Duration::from_secs(5));
    store.reserve_within(generous, product.id, day.id, 1).await.unwrap();
    store.confirm_within(generous, booking.id).await.unwrap();
    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 3);
}

// ── Bookings & confirmation ──────────────────────────────

#[tokio::test]
async fn get_booking_is_idempotent() {
    let store = open("get_booking.wal");
    let (product, day) = product_with_day(&store, 5).await;
    let booking = store.reserve(product.id, day.id, 2).await.unwrap();

    let a = store.get_booking(booking.id).await.unwrap();
    let b = store.get_booking(booking.id).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a, booking);
    assert_eq!(a.product_id, product.id);
    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 3);

    let err = store.get_booking(Ulid::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "booking", .. }));
}

#[tokio::test]
async fn second_confirm_is_rejected_and_keeps_tickets() {
    let store = open("double_confirm.wal");
    let (product, day) = product_with_day(&store, 5).await;
    let booking = store.reserve(product.id, day.id, 2).await.unwrap();

    let confirmed = store.confirm(booking.id).await.unwrap();
    let err = store.confirm(booking.id).await.unwrap_err();
    match &err {
        StoreError::InvalidRequest { field, reason } => {
            assert_eq!(*field, "bookingId");
            assert_eq!(reason, "booking already confirmed");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.get_booking(booking.id).await.unwrap(), confirmed);
}

#[tokio::test]
async fn confirm_unknown_booking() {
    let store = open("confirm_unknown.wal");
    let err = store.confirm(Ulid::new()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);
}

struct FailingIssuer {
    calls: AtomicUsize,
}

#[async_trait]
impl TicketIssuer for FailingIssuer {
    async fn issue(&self, _: &Booking) -> Result<Vec<String>, IssueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(IssueError("printer on fire".into()))
    }
}

struct ShortIssuer;

#[async_trait]
impl TicketIssuer for ShortIssuer {
    async fn issue(&self, _: &Booking) -> Result<Vec<String>, IssueError> {
        Ok(vec!["only-one".into()])
    }
}

#[tokio::test]
async fn failed_issuer_leaves_booking_reserved() {
    let issuer = Arc::new(FailingIssuer {
        calls: AtomicUsize::new(0),
    });
    let store = Store::open(&test_wal_path("issuer_fails.wal"), issuer.clone()).unwrap();
    let (product, day) = product_with_day(&store, 5).await;
    let booking = store.reserve(product.id, day.id, 2).await.unwrap();

    let err = store.confirm(booking.id).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Unavailable);
    assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    let after = store.get_booking(booking.id).await.unwrap();
    assert_eq!(after.status, BookingStatus::Reserved);
    assert!(after.units.iter().all(|u| u.ticket.is_none()));
}

#[tokio::test]
async fn short_ticket_list_is_internal() {
    let store = Store::open(&test_wal_path("issuer_short.wal"), Arc::new(ShortIssuer)).unwrap();
    let (product, day) = product_with_day(&store, 5).await;
    let booking = store.reserve(product.id, day.id, 3).await.unwrap();

    let err = store.confirm(booking.id).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Internal);
    assert_eq!(store.get_booking(booking.id).await.unwrap().status, BookingStatus::Reserved);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let (product, day, reserved, confirmed) = {
        let store = Store::open(&path, Arc::new(UlidTicketIssuer)).unwrap();
        let (product, day) = product_with_day(&store, 6).await;
        let reserved = store.reserve(product.id, day.id, 2).await.unwrap();
        let other = store.reserve(product.id, day.id, 3).await.unwrap();
        let confirmed = store.confirm(other.id).await.unwrap();
        (product, day, reserved, confirmed)
    };

    let store = Store::open(&path, Arc::new(UlidTicketIssuer)).unwrap();
    assert_eq!(store.list_products(), vec![product.clone()]);
    let row = store.get(product.id, day.local_date).await.unwrap().unwrap();
    assert_eq!(row.id, day.id);
    assert_eq!(row.vacancies, 1);
    assert_eq!(store.get_booking(reserved.id).await.unwrap(), reserved);
    assert_eq!(store.get_booking(confirmed.id).await.unwrap(), confirmed);

    // Still enforces capacity after restart.
    assert_invalid(&store.reserve(product.id, day.id, 2).await.unwrap_err(), "units");
    store.reserve(product.id, day.id, 1).await.unwrap();
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let (product, booking) = {
        let store = Store::open(&path, Arc::new(UlidTicketIssuer)).unwrap();
        let product = store.create_product("Boat", 4).await.unwrap();
        let dates: Vec<Date> = date(2025, 9, 1).iter_days().take(5).collect();
        store.insert_many(product.id, &dates).await.unwrap();
        let day = store.get(product.id, date(2025, 9, 3)).await.unwrap().unwrap();
        // Churn: many small appends that compaction folds together.
        for _ in 0..3 {
            store.reserve(product.id, day.id, 1).await.unwrap();
        }
        let booking = store.reserve(product.id, day.id, 1).await.unwrap();
        let booking = store.confirm(booking.id).await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await.unwrap(), 7);

        store.compact_wal().await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await.unwrap(), 0);

        // Append after compaction lands in the new file.
        store.insert_many(product.id, &[date(2025, 10, 1)]).await.unwrap();
        (product, booking)
    };

    let store = Store::open(&path, Arc::new(UlidTicketIssuer)).unwrap();
    assert_eq!(store.get_product(product.id).unwrap(), product);
    let rows = store
        .get_range(product.id, date(2025, 9, 1), date(2025, 10, 1))
        .await
        .unwrap();
    assert_eq!(rows.len(), 6);
    let day = rows.iter().find(|a| a.local_date == date(2025, 9, 3)).unwrap();
    assert_eq!(day.vacancies, 0);
    assert_eq!(store.get_booking(booking.id).await.unwrap(), booking);
}

#[tokio::test]
async fn compaction_waits_for_in_flight_commits() {
    let store = Arc::new(open("compact_concurrent.wal"));
    let (product, day) = product_with_day(&store, 100).await;
    let (product_id, availability_id) = (product.id, day.id);

    let reservers: Vec<_> = (0..50)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.reserve(product_id, availability_id, 1).await })
        })
        .collect();
    let compactor = {
        let store = store.clone();
        tokio::spawn(async move { store.compact_wal().await })
    };
    for r in futures::future::join_all(reservers).await {
        r.unwrap().unwrap();
    }
    compactor.await.unwrap().unwrap();

    let vacancies = store.get_by_id(day.id).await.unwrap().vacancies;
    assert_eq!(vacancies, 50);
    store.compact_wal().await.unwrap();
    assert!(store.is_healthy());
}

// ── WAL failures ─────────────────────────────────────────

#[tokio::test]
async fn failed_wal_write_applies_nothing() {
    let (store, faults) = open_with_faults("failed_write.wal");
    let (product, day) = product_with_day(&store, 5).await;

    faults.writes.store(true, Ordering::SeqCst);
    let err = store.reserve(product.id, day.id, 2).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Unavailable);
    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 5);
    assert!(store.tables.booking_index.is_empty());

    // Rolled back cleanly, so the store keeps accepting writes.
    faults.writes.store(false, Ordering::SeqCst);
    store.reserve(product.id, day.id, 2).await.unwrap();
    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 3);
    assert!(store.is_healthy());
}

#[tokio::test]
async fn failed_rollback_refuses_later_writes() {
    let (store, faults) = open_with_faults("failed_rollback.wal");
    let (product, day) = product_with_day(&store, 5).await;

    faults.writes.store(true, Ordering::SeqCst);
    faults.rollbacks.store(true, Ordering::SeqCst);
    let err = store.reserve(product.id, day.id, 1).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Internal);

    faults.writes.store(false, Ordering::SeqCst);
    faults.rollbacks.store(false, Ordering::SeqCst);
    let err = store.reserve(product.id, day.id, 1).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Internal);
    let err = store.create_product("Late arrival", 2).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Internal);
    assert_eq!(store.compact_wal().await.unwrap_err().class(), ErrorClass::Internal);

    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 5);
    assert!(!store.is_healthy());
}

#[tokio::test]
async fn failed_reopen_after_compaction_refuses_later_writes() {
    let (store, faults) = open_with_faults("failed_reopen.wal");
    let (product, day) = product_with_day(&store, 5).await;
    store.reserve(product.id, day.id, 1).await.unwrap();

    faults.reopens.store(true, Ordering::SeqCst);
    assert_eq!(store.compact_wal().await.unwrap_err().class(), ErrorClass::Internal);

    let err = store.reserve(product.id, day.id, 1).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Internal);
    assert_eq!(store.get_by_id(day.id).await.unwrap().vacancies, 4);
    assert!(!store.is_healthy());
}

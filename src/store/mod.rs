mod error;
mod mutations;
mod queries;
mod tickets;
pub mod vacancy;
#[cfg(test)]
mod tests;

pub use error::{ErrorClass, StoreError};
pub use tickets::{IssueError, TicketIssuer, UlidTicketIssuer};

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock, mpsc, oneshot};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::limits::MAX_PRODUCTS;
use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::{Wal, WalError};

pub type SharedAvailability = Arc<RwLock<AvailabilityState>>;
/// One product's dates, each mapped to its availability row id.
pub type Calendar = BTreeMap<Date, Ulid>;
pub type SharedCalendar = Arc<RwLock<Calendar>>;

const WAL_CHANNEL_CAPACITY: usize = 4096;

/// How long a mutation may wait for locks and tickets before it gives up.
///
/// Only the work before the commit point is bounded. Once a mutation has
/// started committing it runs to completion and the caller gets its real
/// outcome, so an expired deadline never hides a committed change.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<tokio::time::Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(tokio::time::Instant::now() + timeout))
    }

    /// Await `fut`, failing with Unavailable if the deadline passes first.
    pub async fn run<T>(self, fut: impl Future<Output = T>) -> Result<T, StoreError> {
        match self.0 {
            None => Ok(fut.await),
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| StoreError::Unavailable("request timed out".into())),
        }
    }
}

// ── Group-commit WAL writer ─────────────────────────────

type Responder = oneshot::Sender<Result<(), StoreError>>;

enum WalCommand {
    Append {
        event: Event,
        response: Responder,
    },
    Compact {
        events: Vec<Event>,
        response: Responder,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL on a dedicated thread and batches appends for group commit:
/// block for the first append, drain whatever else is already queued, commit
/// the lot with one fsync, answer every sender.
///
/// A failed rollback leaves records on disk that were never applied, and a
/// failed reopen after compaction leaves the writer on an unlinked file. Either
/// way every later write is refused and the store reports itself unhealthy.
fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>, healthy: Arc<AtomicBool>) {
    let mut poisoned: Option<StoreError> = None;
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, batch, &mut poisoned);
                if let Some(other) = deferred {
                    handle_control(&mut wal, other, &mut poisoned);
                }
            }
            other => handle_control(&mut wal, other, &mut poisoned),
        }
        if poisoned.is_some() {
            healthy.store(false, Ordering::Release);
        }
    }
    info!(path = %wal.path().display(), "WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, Responder)>, poisoned: &mut Option<StoreError>) {
    let (events, responders): (Vec<Event>, Vec<Responder>) = batch.into_iter().unzip();
    let result = if let Some(err) = poisoned.clone() {
        Err(err)
    } else {
        metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(events.len() as f64);
        let started = Instant::now();
        let committed = wal.commit(&events);
        metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        committed.map_err(|e| {
            let err = StoreError::from(&e);
            if matches!(e, WalError::RollbackFailed { .. }) {
                *poisoned = Some(err.clone());
            }
            err
        })
    };
    for tx in responders {
        let _ = tx.send(result.clone());
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand, poisoned: &mut Option<StoreError>) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = if let Some(err) = poisoned.clone() {
                Err(err)
            } else {
                Wal::write_compact_file(wal.path(), &events)
                    .and_then(|()| wal.swap_compact_file())
                    .map_err(|e| match e {
                        WalError::ReopenFailed(_) => {
                            let err = StoreError::from(&e);
                            *poisoned = Some(err.clone());
                            err
                        }
                        e => {
                            warn!(error = %e, "WAL compaction failed");
                            StoreError::Unavailable(format!("compaction: {e}"))
                        }
                    })
            };
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(StoreError::Internal("append routed to control path".into())));
        }
    }
}

#[derive(Clone)]
struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
}

impl WalHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<T, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))
    }

    async fn append(&self, event: Event) -> Result<(), StoreError> {
        self.request(|response| WalCommand::Append { event, response })
            .await?
    }

    async fn compact(&self, events: Vec<Event>) -> Result<(), StoreError> {
        self.request(|response| WalCommand::Compact { events, response })
            .await?
    }

    async fn appends_since_compact(&self) -> Result<u64, StoreError> {
        self.request(|response| WalCommand::AppendsSinceCompact { response })
            .await
    }
}

// ── In-memory tables ─────────────────────────────────────

#[derive(Default)]
struct Tables {
    products: DashMap<Ulid, Product>,
    calendars: DashMap<Ulid, SharedCalendar>,
    rows: DashMap<Ulid, SharedAvailability>,
    /// Booking id → availability row id. Set once, never changes.
    booking_index: DashMap<Ulid, Ulid>,
}

impl Tables {
    fn row(&self, id: &Ulid) -> Option<SharedAvailability> {
        self.rows.get(id).map(|e| e.value().clone())
    }

    fn calendar(&self, product_id: &Ulid) -> Option<SharedCalendar> {
        self.calendars.get(product_id).map(|e| e.value().clone())
    }

    fn product(&self, id: &Ulid) -> Option<Product> {
        self.products.get(id).map(|e| e.value().clone())
    }

    fn apply_product(&self, event: &Event) {
        if let Event::ProductCreated { id, name, capacity } = event {
            self.products.insert(
                *id,
                Product {
                    id: *id,
                    name: name.clone(),
                    capacity: *capacity,
                },
            );
            self.calendars.entry(*id).or_default();
        }
    }

    /// Caller holds the product's calendar write lock.
    fn apply_inserted(&self, calendar: &mut Calendar, event: &Event) {
        let Event::AvailabilityInserted { product_id, records } = event else {
            return;
        };
        let Some(product) = self.product(product_id) else {
            warn!(%product_id, "availability inserted for unknown product");
            return;
        };
        for &(id, date) in records {
            calendar.insert(date, id);
            let row = AvailabilityState::new(id, *product_id, date, product.capacity);
            self.rows.insert(id, Arc::new(RwLock::new(row)));
        }
    }

    /// Caller holds the row's write lock.
    fn apply_to_row(&self, row: &mut AvailabilityState, event: &Event) {
        match event {
            Event::BookingReserved {
                id,
                product_id,
                availability_id,
                unit_ids,
            } => {
                row.bookings.push(Booking {
                    id: *id,
                    status: BookingStatus::Reserved,
                    product_id: *product_id,
                    availability_id: *availability_id,
                    units: unit_ids
                        .iter()
                        .map(|&id| Unit { id, ticket: None })
                        .collect(),
                });
                self.booking_index.insert(*id, *availability_id);
            }
            Event::BookingConfirmed { id, tickets, .. } => {
                let Some(booking) = row.booking_mut(id) else {
                    warn!(booking_id = %id, "confirmation for unknown booking");
                    return;
                };
                booking.status = BookingStatus::Confirmed;
                for (unit_id, content) in tickets {
                    if let Some(unit) = booking.units.iter_mut().find(|u| u.id == *unit_id) {
                        unit.ticket = Some(content.clone());
                    }
                }
            }
            Event::ProductCreated { .. } | Event::AvailabilityInserted { .. } => {}
        }
    }

    /// Rebuild state from the log. Single-threaded, so rows and calendars are
    /// assembled as plain values and only wrapped in locks at the end.
    fn replay(events: &[Event]) -> Self {
        let tables = Tables::default();
        let mut calendars: HashMap<Ulid, Calendar> = HashMap::new();
        let mut rows: HashMap<Ulid, AvailabilityState> = HashMap::new();

        for event in events {
            match event {
                Event::ProductCreated { id, .. } => {
                    tables.apply_product(event);
                    calendars.entry(*id).or_default();
                }
                Event::AvailabilityInserted { product_id, records } => {
                    let (Some(calendar), Some(product)) =
                        (calendars.get_mut(product_id), tables.product(product_id))
                    else {
                        warn!(%product_id, "replay: availability for unknown product");
                        continue;
                    };
                    for &(id, date) in records {
                        calendar.insert(date, id);
                        rows.insert(id, AvailabilityState::new(id, *product_id, date, product.capacity));
                    }
                }
                Event::BookingReserved { availability_id, .. }
                | Event::BookingConfirmed { availability_id, .. } => match rows.get_mut(availability_id) {
                    Some(row) => tables.apply_to_row(row, event),
                    None => warn!(%availability_id, "replay: booking for unknown availability"),
                },
            }
        }

        for (product_id, calendar) in calendars {
            tables.calendars.insert(product_id, Arc::new(RwLock::new(calendar)));
        }
        for (id, row) in rows {
            tables.rows.insert(id, Arc::new(RwLock::new(row)));
        }
        tables
    }
}

// ── Store ───────────────────────────────────────────────

/// Products, availability and bookings, durably logged.
///
/// Every mutation follows the same shape: take the lock on the thing it
/// changes (a product's calendar or one availability row), validate against
/// what is under that lock, then commit. Commit appends the event to the WAL
/// and applies it on a spawned task that owns the lock guard, so once started
/// it finishes even if the caller is dropped.
pub struct Store {
    tables: Arc<Tables>,
    wal: WalHandle,
    tickets: Arc<dyn TicketIssuer>,
    /// Shared by every mutation from before it locks anything until its event
    /// is applied; exclusive for compaction.
    commit_gate: Arc<RwLock<()>>,
    /// Held by `create_product` from the count check until the product is applied.
    product_slots: Arc<Mutex<()>>,
    product_limit: usize,
    healthy: Arc<AtomicBool>,
}

impl Store {
    /// Replay the WAL at `wal_path` and start its writer thread.
    pub fn open(wal_path: &Path, tickets: Arc<dyn TicketIssuer>) -> io::Result<Self> {
        let (wal, events) = Wal::open(wal_path)?;
        Self::start(wal, &events, tickets)
    }

    fn start(wal: Wal, events: &[Event], tickets: Arc<dyn TicketIssuer>) -> io::Result<Self> {
        let tables = Tables::replay(events);
        info!(
            path = %wal.path().display(),
            events = events.len(),
            products = tables.products.len(),
            availability = tables.rows.len(),
            bookings = tables.booking_index.len(),
            "store opened"
        );

        let healthy = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        let writer_healthy = healthy.clone();
        std::thread::Builder::new()
            .name("daybook-wal".into())
            .spawn(move || wal_writer_loop(wal, rx, writer_healthy))?;

        Ok(Self {
            tables: Arc::new(tables),
            wal: WalHandle { tx },
            tickets,
            commit_gate: Arc::new(RwLock::new(())),
            product_slots: Arc::new(Mutex::new(())),
            product_limit: MAX_PRODUCTS,
            healthy,
        })
    }

    /// False once the WAL writer is gone or has stopped accepting writes.
    pub fn is_healthy(&self) -> bool {
        !self.wal.tx.is_closed() && self.healthy.load(Ordering::Acquire)
    }

    async fn enter(&self, deadline: Deadline) -> Result<OwnedRwLockReadGuard<()>, StoreError> {
        deadline.run(self.commit_gate.clone().read_owned()).await
    }

    /// Append `event`, then run `apply` against `guard`. See the type docs.
    async fn commit<G, F>(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        mut guard: G,
        event: Event,
        apply: F,
    ) -> Result<G, StoreError>
    where
        G: Send + 'static,
        F: FnOnce(&Tables, &mut G, &Event) + Send + 'static,
    {
        let wal = self.wal.clone();
        let tables = self.tables.clone();
        let task = tokio::spawn(async move {
            let _gate = gate;
            wal.append(event.clone()).await?;
            apply(&*tables, &mut guard, &event);
            Ok::<G, StoreError>(guard)
        });
        task.await.map_err(|e| {
            error!(error = %e, "commit task failed");
            StoreError::Internal(format!("commit task failed: {e}"))
        })?
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _exclusive = self.commit_gate.write().await;
        let events = self.snapshot().await;
        let count = events.len();
        self.wal.compact(events).await?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, StoreError> {
        self.wal.appends_since_compact().await
    }

    async fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for product in self.list_products() {
            events.push(Event::ProductCreated {
                id: product.id,
                name: product.name.clone(),
                capacity: product.capacity,
            });
            let Some(calendar) = self.tables.calendar(&product.id) else {
                continue;
            };
            let records: Vec<(Ulid, Date)> =
                calendar.read().await.iter().map(|(&date, &id)| (id, date)).collect();
            if records.is_empty() {
                continue;
            }
            events.push(Event::AvailabilityInserted {
                product_id: product.id,
                records: records.clone(),
            });

            for (id, _) in records {
                let Some(row) = self.tables.row(&id) else {
                    continue;
                };
                let row = row.read().await;
                for booking in &row.bookings {
                    events.push(Event::BookingReserved {
                        id: booking.id,
                        product_id: booking.product_id,
                        availability_id: booking.availability_id,
                        unit_ids: booking.units.iter().map(|u| u.id).collect(),
                    });
                    if booking.is_confirmed() {
                        events.push(Event::BookingConfirmed {
                            id: booking.id,
                            availability_id: booking.availability_id,
                            tickets: booking
                                .units
                                .iter()
                                .map(|u| (u.id, u.ticket.clone().unwrap_or_default()))
                                .collect(),
                        });
                    }
                }
            }
        }
        events
    }
}

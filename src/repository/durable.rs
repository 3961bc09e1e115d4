use std::io;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::limits::WAL_CHANNEL_CAPACITY;
use crate::model::*;
use crate::wal::Wal;

use super::{OverlapQuery, Repository, RepositoryError, ReservationFilter, ReservationTable};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// What a commit batch needs from the log.
trait BatchLog {
    fn append_buffered(&mut self, event: &Event) -> io::Result<()>;
    fn flush_sync(&mut self) -> io::Result<()>;
    fn rollback(&mut self) -> io::Result<()>;
}

impl BatchLog for Wal {
    fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        Wal::append_buffered(self, event)
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        Wal::flush_sync(self)
    }

    fn rollback(&mut self) -> io::Result<()> {
        Wal::rollback(self)
    }
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch, or a rollback if anything failed.
/// 5. Respond to all senders with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (mut events, mut responders) = match cmd {
            WalCommand::Append { event, response } => (vec![event], vec![response]),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => {
                    events.push(event);
                    responders.push(response);
                }
                Ok(other) => {
                    // Commit what we have first so the command sees every earlier append.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(events.len() as f64);
        let flush_start = Instant::now();
        let result = flush_batch(&mut wal, &events);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for tx in responders {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

/// Commit `events` as one unit. Every caller in a failed batch is told it
/// failed, so none of its records may survive in the file.
fn flush_batch(log: &mut impl BatchLog, events: &[Event]) -> io::Result<()> {
    let result = events
        .iter()
        .try_for_each(|event| log.append_buffered(event))
        .and_then(|()| log.flush_sync());
    if result.is_err() {
        if let Err(e) = log.rollback() {
            tracing::error!("WAL rollback failed, refusing appends until compaction: {e}");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = wal.compact(&events);
            if result.is_ok() {
                tracing::info!("compacted {} to {} records", wal.path().display(), events.len());
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Durable repository: an in-memory table rebuilt from, and written through to, a WAL.
///
/// Every mutation holds the table write lock across WAL append and apply, so
/// the log order always matches the in-memory order.
pub struct WalRepository {
    table: RwLock<ReservationTable>,
    wal_tx: mpsc::Sender<WalCommand>,
}

fn apply(table: &mut ReservationTable, event: &Event) {
    match event {
        Event::ReservationCreated {
            id,
            guest_name,
            unit_id,
            check_in,
            nights,
            ..
        } => {
            // check_out is re-derived so a replayed row always satisfies the invariant.
            if let Some(stay) = Span::of_nights(*check_in, *nights) {
                table.insert(Reservation::new(*id, guest_name.clone(), unit_id.clone(), stay));
            }
        }
        Event::ReservationExtended { id, check_out, nights } => {
            table.extend(*id, *check_out, *nights);
        }
    }
}

impl WalRepository {
    /// Replay the WAL at `path` and start its writer task. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events: Vec<Event> = Wal::replay(path)?;
        let mut table = ReservationTable::new();
        for event in &events {
            apply(&mut table, event);
        }
        tracing::info!("replayed {} events, {} reservations", events.len(), table.len());

        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            table: RwLock::new(table),
            wal_tx,
        })
    }

    async fn wal_append(&self, event: &Event) -> Result<(), RepositoryError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| RepositoryError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| RepositoryError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| RepositoryError::WalError(e.to_string()))
    }

    /// Rewrite the WAL as one `ReservationCreated` per live reservation.
    /// Holds the table read lock throughout so no append can slip in between
    /// the snapshot and the file swap.
    pub async fn compact(&self) -> Result<(), RepositoryError> {
        let table = self.table.read().await;
        let events: Vec<Event> = table.iter().map(Event::created).collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| RepositoryError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| RepositoryError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| RepositoryError::WalError(e.to_string()));
        drop(table);
        result
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl Repository for WalRepository {
    async fn create(&self, new: NewReservation) -> Result<Reservation, RepositoryError> {
        let reservation = Reservation::new(Ulid::new(), new.guest_name, new.unit_id, new.stay);
        let event = Event::created(&reservation);
        let mut table = self.table.write().await;
        self.wal_append(&event).await?;
        apply(&mut table, &event);
        Ok(reservation)
    }

    async fn update(
        &self,
        id: Ulid,
        check_out: Day,
        nights: u32,
    ) -> Result<Reservation, RepositoryError> {
        let mut table = self.table.write().await;
        let current = table.get(&id).ok_or(RepositoryError::NotFound(id))?;
        let updated = current.extended(check_out, nights);
        let event = Event::ReservationExtended { id, check_out, nights };
        self.wal_append(&event).await?;
        apply(&mut table, &event);
        Ok(updated)
    }

    async fn find_existing_reservation(
        &self,
        guest_name: &str,
        unit_id: &str,
    ) -> Result<Option<Reservation>, RepositoryError> {
        Ok(self.table.read().await.find_pair(guest_name, unit_id).cloned())
    }

    async fn find_overlapping(
        &self,
        query: &OverlapQuery<'_>,
    ) -> Result<Vec<Reservation>, RepositoryError> {
        Ok(self.table.read().await.find_overlapping(query))
    }

    async fn list(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, RepositoryError> {
        Ok(self.table.read().await.list(filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, NaiveDate};
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_durable");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn day(n: u64) -> Day {
        NaiveDate::from_ymd_opt(2026, 7, 1).unwrap() + Days::new(n)
    }

    fn new_stay(guest: &str, unit: &str, check_in: u64, nights: u32) -> NewReservation {
        NewReservation {
            guest_name: guest.into(),
            unit_id: unit.into(),
            stay: Span::of_nights(day(check_in), nights).unwrap(),
        }
    }

    #[tokio::test]
    async fn create_survives_reopen() {
        let path = test_wal_path("reopen.wal");
        let created = {
            let repo = WalRepository::open(&path).unwrap();
            repo.create(new_stay("GuestA", "1", 0, 5)).await.unwrap()
        };

        let repo = WalRepository::open(&path).unwrap();
        let found = repo.find_existing_reservation("GuestA", "1").await.unwrap();
        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn update_survives_reopen() {
        let path = test_wal_path("update_reopen.wal");
        let id = {
            let repo = WalRepository::open(&path).unwrap();
            let r = repo.create(new_stay("GuestA", "1", 0, 5)).await.unwrap();
            let updated = repo.update(r.id, day(7), 7).await.unwrap();
            assert_eq!(updated.check_out, day(7));
            r.id
        };

        let repo = WalRepository::open(&path).unwrap();
        let all = repo.list(&ReservationFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].nights, 7);
        assert_eq!(all[0].check_out, day(7));
    }

    #[tokio::test]
    async fn update_unknown_id_fails() {
        let path = test_wal_path("update_unknown.wal");
        let repo = WalRepository::open(&path).unwrap();
        let id = Ulid::new();
        let result = repo.update(id, day(3), 3).await;
        assert!(matches!(result, Err(RepositoryError::NotFound(x)) if x == id));
        assert_eq!(repo.appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compaction.wal");
        let repo = WalRepository::open(&path).unwrap();
        let a = repo.create(new_stay("GuestA", "1", 0, 2)).await.unwrap();
        repo.create(new_stay("GuestB", "2", 0, 2)).await.unwrap();
        for n in 3..10 {
            repo.update(a.id, day(n), n as u32).await.unwrap();
        }
        assert_eq!(repo.appends_since_compact().await, 9);

        repo.compact().await.unwrap();
        assert_eq!(repo.appends_since_compact().await, 0);
        let before = repo.list(&ReservationFilter::default()).await.unwrap();
        drop(repo);

        let events: Vec<Event> = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 2);

        let reopened = WalRepository::open(&path).unwrap();
        let after = reopened.list(&ReservationFilter::default()).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(after.iter().find(|r| r.id == a.id).unwrap().nights, 9);
    }

    /// In-memory log that fails the append or the flush on request.
    #[derive(Default)]
    struct FlakyLog {
        fail_append_at: Option<usize>,
        fail_flush: bool,
        buffered: Vec<Event>,
        committed: Vec<Event>,
        rollbacks: usize,
    }

    impl BatchLog for FlakyLog {
        fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
            if self.fail_append_at == Some(self.buffered.len()) {
                return Err(io::Error::other("disk full"));
            }
            self.buffered.push(event.clone());
            Ok(())
        }

        fn flush_sync(&mut self) -> io::Result<()> {
            if self.fail_flush {
                return Err(io::Error::other("fsync failed"));
            }
            self.committed.append(&mut self.buffered);
            Ok(())
        }

        fn rollback(&mut self) -> io::Result<()> {
            self.buffered.clear();
            self.rollbacks += 1;
            Ok(())
        }
    }

    fn created_event(guest: &str, unit: &str) -> Event {
        Event::created(&Reservation::new(
            Ulid::new(),
            guest.into(),
            unit.into(),
            Span::of_nights(day(0), 2).unwrap(),
        ))
    }

    #[test]
    fn failed_append_commits_nothing_from_batch() {
        let mut log = FlakyLog {
            fail_append_at: Some(1),
            ..Default::default()
        };
        let batch = [created_event("GuestA", "1"), created_event("GuestB", "2")];
        assert!(flush_batch(&mut log, &batch).is_err());
        assert!(log.committed.is_empty());
        assert!(log.buffered.is_empty());
        assert_eq!(log.rollbacks, 1);

        log.fail_append_at = None;
        let next = [created_event("GuestC", "3")];
        flush_batch(&mut log, &next).unwrap();
        assert_eq!(log.committed, next);
    }

    #[test]
    fn failed_flush_commits_nothing_from_batch() {
        let mut log = FlakyLog {
            fail_flush: true,
            ..Default::default()
        };
        let batch = [created_event("GuestA", "1"), created_event("GuestB", "2")];
        assert!(flush_batch(&mut log, &batch).is_err());
        assert!(log.committed.is_empty());
        assert_eq!(log.rollbacks, 1);
    }

    #[tokio::test]
    async fn overlapping_query_reads_table() {
        let path = test_wal_path("overlap.wal");
        let repo = WalRepository::open(&path).unwrap();
        repo.create(new_stay("GuestA", "1", 0, 5)).await.unwrap();
        let stay = Span::new(day(4), day(6));
        assert_eq!(
            repo.find_overlapping(&OverlapQuery::unit("1", stay)).await.unwrap().len(),
            1
        );
        let after = Span::new(day(5), day(6));
        assert!(repo.find_overlapping(&OverlapQuery::unit("1", after)).await.unwrap().is_empty());
    }
}

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{Entry, EntryId, MAX_ESTIMATED_DURATION};
use crate::storage::Store;

use super::AppError;

/// Application service enforcing the entry lifecycle rules and mediating all
/// reads and writes through the store. This is the primary interface for any
/// client (CLI, HTTP API, etc.).
///
/// The store contract is a bare read-modify-write of a whole collection, so
/// mutations hold an async mutex for the full load/mutate/save cycle. Without
/// it two concurrent writers could read the same snapshot and the second save
/// would silently drop the first's update.
pub struct LedgerService {
    store: Store,
    write_lock: Mutex<()>,
}

impl LedgerService {
    /// Create a new ledger service with the given store.
    pub fn new(store: Store) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let store = Store::init(&db_url).await?;
        Ok(Self::new(store))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let store = Store::connect(&db_url).await?;
        Ok(Self::new(store))
    }

    /// List all entries, most recent departure first. Ties keep their stored
    /// order (stable sort).
    pub async fn list(&self) -> Result<Vec<Entry>, AppError> {
        let mut entries = self.store.load().await?;
        entries.sort_by(|a, b| b.departure_time.cmp(&a.departure_time));
        Ok(entries)
    }

    /// Record a departure: append a new open entry and persist the updated
    /// collection. The caller supplies the departure instant; "now" defaults
    /// live at the transport boundary.
    pub async fn open(
        &self,
        departure_time: DateTime<Utc>,
        estimated_duration: i64,
    ) -> Result<Entry, AppError> {
        if estimated_duration <= 0 {
            return Err(AppError::Validation(
                "estimatedDuration must be a positive number of minutes".to_string(),
            ));
        }
        if estimated_duration > MAX_ESTIMATED_DURATION {
            return Err(AppError::Validation(format!(
                "estimatedDuration must not exceed {} minutes",
                MAX_ESTIMATED_DURATION
            )));
        }

        let _guard = self.write_lock.lock().await;

        let mut entries = self.store.load().await?;
        let entry = Entry::new(departure_time, estimated_duration);
        entries.push(entry.clone());
        self.store.save(&entries).await?;

        Ok(entry)
    }

    /// Record a return for an open entry: derive lateness, set the return
    /// time and persist the updated collection. Closing is one-way; a second
    /// close is a conflict. All checks complete before anything is saved.
    pub async fn close(
        &self,
        id: EntryId,
        return_time: DateTime<Utc>,
    ) -> Result<Entry, AppError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.store.load().await?;
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;

        if entry.is_closed() {
            return Err(AppError::Conflict(id.to_string()));
        }
        if return_time < entry.departure_time {
            return Err(AppError::Validation(
                "returnTime cannot be earlier than departureTime".to_string(),
            ));
        }

        entry.close(return_time);
        let updated = entry.clone();
        self.store.save(&entries).await?;

        Ok(updated)
    }
}

/// Parse an ISO 8601 instant, reporting bad input as a validation failure.
pub fn parse_instant(field: &str, value: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            AppError::Validation(format!(
                "Invalid {} format '{}'. Use ISO 8601 (e.g. 2024-01-01T10:00:00Z)",
                field, value
            ))
        })
}

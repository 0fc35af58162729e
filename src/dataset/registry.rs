//! Process-wide cache of loaded datasets.
//!
//! Each dataset identifier maps to one live [`DatasetHandle`]. Readers clone
//! the handle out of a short critical section and never observe a partially
//! replaced table. Reloads are single-flight: concurrent loaders of the same
//! identifier share one fetch through a [`OnceCell`], and the new handle is
//! swapped in only once it is complete. No lock is held across an await.

use super::schema::SchemaDescriptor;
use super::source::DatasetSource;
use crate::error::Result;
use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::OnceCell;

struct LoadedDataset {
    id: String,
    frame: DataFrame,
    schema: Arc<SchemaDescriptor>,
    generation: u64,
    loaded_at: DateTime<Utc>,
}

/// Read-only reference to a loaded table and its schema.
///
/// Cloning is cheap. A handle stays valid for as long as somebody holds it,
/// even after the registry has swapped in a newer generation.
#[derive(Clone)]
pub struct DatasetHandle(Arc<LoadedDataset>);

impl DatasetHandle {
    /// Wrap an already-loaded frame, deriving its schema.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::QueryError::Schema`] if the frame has no columns.
    pub fn from_frame(id: impl Into<String>, frame: DataFrame) -> Result<Self> {
        Self::build(id.into(), frame, 0)
    }

    fn build(id: String, frame: DataFrame, generation: u64) -> Result<Self> {
        let schema = Arc::new(SchemaDescriptor::extract(&frame)?);
        Ok(Self(Arc::new(LoadedDataset {
            id,
            frame,
            schema,
            generation,
            loaded_at: Utc::now(),
        })))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn frame(&self) -> &DataFrame {
        &self.0.frame
    }

    pub fn schema(&self) -> &Arc<SchemaDescriptor> {
        &self.0.schema
    }

    pub fn row_count(&self) -> usize {
        self.0.frame.height()
    }

    /// Monotonic load counter; a refresh always yields a higher value.
    pub fn generation(&self) -> u64 {
        self.0.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.0.loaded_at
    }

    /// Whether both handles reference the very same loaded table.
    pub fn same_table(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for DatasetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetHandle")
            .field("id", &self.0.id)
            .field("rows", &self.0.frame.height())
            .field("columns", &self.0.schema.len())
            .field("generation", &self.0.generation)
            .finish()
    }
}

type PendingLoad = Arc<OnceCell<DatasetHandle>>;

#[derive(Default)]
struct Slot {
    live: Option<DatasetHandle>,
    pending: Option<PendingLoad>,
}

impl Slot {
    fn is_vacant(&self) -> bool {
        self.live.is_none() && self.pending.is_none()
    }
}

/// Remove the entry for `dataset_id` once it holds neither a table nor a
/// load in flight, so failed lookups of arbitrary ids do not accumulate.
fn release_vacant(slots: &mut HashMap<String, Slot>, dataset_id: &str) {
    if slots.get(dataset_id).is_some_and(Slot::is_vacant) {
        slots.remove(dataset_id);
    }
}

/// Loads datasets on demand and shares them between requests.
pub struct DatasetRegistry {
    source: Arc<dyn DatasetSource>,
    slots: RwLock<HashMap<String, Slot>>,
    generations: AtomicU64,
}

impl DatasetRegistry {
    pub fn new(source: Arc<dyn DatasetSource>) -> Self {
        Self {
            source,
            slots: RwLock::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// The current handle for `dataset_id`, if one is loaded.
    pub fn live(&self, dataset_id: &str) -> Option<DatasetHandle> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dataset_id)
            .and_then(|slot| slot.live.clone())
    }

    /// Return a handle for `dataset_id`, fetching it if needed.
    ///
    /// With `refresh == false` an existing live handle is returned as-is, so
    /// repeated calls hand out the same table. With `refresh == true` the
    /// dataset is fetched again and atomically replaces the live handle;
    /// requests already holding the old handle keep using it.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::error::DatasetError`] from the source and
    /// [`crate::error::QueryError::Schema`] when the fetched table has no
    /// usable schema. A failed first load leaves no entry behind.
    pub async fn load(&self, dataset_id: &str, refresh: bool) -> Result<DatasetHandle> {
        let cell = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.entry(dataset_id.to_owned()).or_default();
            if !refresh && let Some(handle) = &slot.live {
                tracing::debug!(dataset_id, "Dataset already loaded");
                return Ok(handle.clone());
            }
            Arc::clone(
                slot.pending
                    .get_or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = cell
            .get_or_try_init(|| self.fetch_handle(dataset_id))
            .await
            .cloned();

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(dataset_id)
            && slot
                .pending
                .as_ref()
                .is_some_and(|pending| Arc::ptr_eq(pending, &cell))
        {
            slot.pending = None;
            if let Ok(handle) = &result {
                slot.live = Some(handle.clone());
            }
        }
        release_vacant(&mut slots, dataset_id);

        result
    }

    async fn fetch_handle(&self, dataset_id: &str) -> Result<DatasetHandle> {
        tracing::info!(dataset_id, "Loading dataset");
        let frame = self.source.fetch(dataset_id).await?;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = DatasetHandle::build(dataset_id.to_owned(), frame, generation)?;
        tracing::info!(
            dataset_id,
            rows = handle.row_count(),
            columns = handle.schema().len(),
            generation,
            "Dataset loaded"
        );
        Ok(handle)
    }

    /// Drop the live handle for `dataset_id`. Holders of the old handle are
    /// unaffected.
    pub fn evict(&self, dataset_id: &str) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let evicted = slots
            .get_mut(dataset_id)
            .and_then(|slot| slot.live.take())
            .is_some();
        release_vacant(&mut slots, dataset_id);
        evicted
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

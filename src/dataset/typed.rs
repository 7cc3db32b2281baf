// In: src/dataset/typed.rs

use std::marker::PhantomData;
use std::sync::Arc;

use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;

use crate::dataset::display::{render_table, DEFAULT_TRUNCATE_WIDTH};
use crate::dataset::generic::GenericView;
use crate::encoding::Encodable;
use crate::engine::{MaterializationId, PartitionFn, RawCollection, StorageInfo};
use crate::error::tambakError;
use crate::types::StorageLevel;

/// A lazily evaluated, partitioned collection of `T`.
///
/// The value is a handle: cloning it is cheap and every clone refers to the same
/// materialization. Transformations return new handles and never run anything;
/// terminal operations (`count`, `collect`, `reduce`, `for_each`, `show`, ...)
/// evaluate the lineage and block until it finishes or fails.
///
/// Closures handed to transformations run on engine worker threads and may run
/// more than once for the same element when `task_max_attempts > 1`.
pub struct TypedCollection<T> {
    raw: RawCollection,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedCollection<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for TypedCollection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedCollection")
            .field("element", &std::any::type_name::<T>())
            .field("raw", &self.raw)
            .finish()
    }
}

impl<T: Encodable> TypedCollection<T> {
    /// Re-types a raw handle. The caller vouches that its schema encodes `T`.
    pub(crate) fn from_raw(raw: RawCollection) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Builds a narrow step that decodes each partition, applies `f` and encodes
    /// the result as `U`.
    fn through_partitions<U, F>(&self, name: &'static str, f: F) -> TypedCollection<U>
    where
        U: Encodable,
        F: Fn(Vec<T>) -> Vec<U> + Send + Sync + 'static,
    {
        let func: PartitionFn = Arc::new(move |_idx: usize, batch: RecordBatch| -> Result<RecordBatch, tambakError> {
            let items = T::decode_batch(&batch)?;
            U::encode_batch(f(items))
        });
        TypedCollection::from_raw(self.raw.map_partitions(name, U::schema(), func))
    }

    //==============================================================================
    // Identity and conversion
    //==============================================================================

    pub fn id(&self) -> MaterializationId {
        self.raw.id()
    }

    pub fn num_partitions(&self) -> usize {
        self.raw.num_partitions()
    }

    /// The same data with the static element type dropped.
    pub fn to_generic_view(&self) -> GenericView {
        GenericView::new(self.raw.clone())
    }

    pub fn to_raw_collection(&self) -> RawCollection {
        self.raw.clone()
    }

    pub fn explain(&self) -> String {
        self.raw.explain()
    }

    //==============================================================================
    // Partition shape
    //==============================================================================

    pub fn repartition(&self, num_partitions: usize) -> Result<Self, tambakError> {
        Ok(Self::from_raw(self.raw.repartition(num_partitions)?))
    }

    /// Reduces the partition count without a shuffle. A count at or above the
    /// current one leaves the collection as it is.
    pub fn coalesce(&self, num_partitions: usize) -> Result<Self, tambakError> {
        Ok(Self::from_raw(self.raw.coalesce(num_partitions)?))
    }

    //==============================================================================
    // Element transformations
    //==============================================================================

    /// Keeps the elements for which `predicate` holds, in their original order.
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let func: PartitionFn = Arc::new(move |_idx: usize, batch: RecordBatch| -> Result<RecordBatch, tambakError> {
            let items = T::decode_batch(&batch)?;
            let mask = BooleanArray::from(items.iter().map(&predicate).collect::<Vec<bool>>());
            Ok(filter_record_batch(&batch, &mask)?)
        });
        Self::from_raw(self.raw.map_partitions("Filter", T::schema(), func))
    }

    pub fn map<U, F>(&self, f: F) -> TypedCollection<U>
    where
        U: Encodable,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.through_partitions("Map", move |items| items.into_iter().map(&f).collect())
    }

    /// Maps every element to zero or more elements, flattened in encounter order.
    pub fn flat_map<U, I, F>(&self, f: F) -> TypedCollection<U>
    where
        U: Encodable,
        I: IntoIterator<Item = U>,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        self.through_partitions("FlatMap", move |items| {
            items.into_iter().flat_map(&f).collect()
        })
    }

    /// Calls `f` once per partition with an iterator over that partition's elements.
    pub fn map_partitions<U, I, F>(&self, f: F) -> TypedCollection<U>
    where
        U: Encodable,
        I: IntoIterator<Item = U>,
        F: Fn(std::vec::IntoIter<T>) -> I + Send + Sync + 'static,
    {
        self.through_partitions("MapPartitions", move |items| {
            f(items.into_iter()).into_iter().collect()
        })
    }

    /// Applies `f` to the collection itself. Useful for chaining reusable steps.
    pub fn transform<U, F>(&self, f: F) -> TypedCollection<U>
    where
        U: Encodable,
        F: FnOnce(&Self) -> TypedCollection<U>,
    {
        f(self)
    }

    /// Draws a random sample.
    ///
    /// `fraction` is the keep probability per element without replacement, and
    /// the expected number of copies per element with replacement. Without a
    /// `seed` one is drawn from the thread-local generator at call time.
    pub fn sample(
        &self,
        with_replacement: bool,
        fraction: f64,
        seed: Option<u64>,
    ) -> Result<Self, tambakError> {
        let seed = seed.unwrap_or_else(rand::random::<u64>);
        Ok(Self::from_raw(
            self.raw.sample(with_replacement, fraction, seed)?,
        ))
    }

    //==============================================================================
    // Set operations (equality is equality of encoded rows)
    //==============================================================================

    pub fn distinct(&self) -> Self {
        Self::from_raw(self.raw.distinct())
    }

    /// Elements present in both collections, without duplicates.
    pub fn intersect(&self, other: &Self) -> Result<Self, tambakError> {
        Ok(Self::from_raw(self.raw.intersect(&other.raw)?))
    }

    /// Every element of both collections. Duplicates and order are kept.
    pub fn union(&self, other: &Self) -> Result<Self, tambakError> {
        Ok(Self::from_raw(self.raw.union(&other.raw)?))
    }

    /// Elements of `self` absent from `other`, without duplicates.
    pub fn subtract(&self, other: &Self) -> Result<Self, tambakError> {
        Ok(Self::from_raw(self.raw.subtract(&other.raw)?))
    }

    //==============================================================================
    // Persistence
    //==============================================================================

    /// `persist(StorageLevel::MEMORY_AND_DISK)`.
    pub fn cache(&self) -> Result<Self, tambakError> {
        self.persist(StorageLevel::default())
    }

    /// Marks the materialization behind this handle for retention at `level`.
    ///
    /// Nothing is computed here. The data is kept from the next job that
    /// evaluates it, and every handle aliasing the same materialization benefits.
    /// Persisting again with a different level is not guaranteed to keep the
    /// previously retained blocks.
    pub fn persist(&self, level: StorageLevel) -> Result<Self, tambakError> {
        Ok(Self::from_raw(self.raw.persist(level)?))
    }

    /// Releases retained blocks. With `blocking` the release has completed when
    /// this returns.
    pub fn unpersist(&self, blocking: bool) -> Result<Self, tambakError> {
        Ok(Self::from_raw(self.raw.unpersist(blocking)?))
    }

    pub fn storage_level(&self) -> Result<StorageLevel, tambakError> {
        self.raw.storage_level()
    }

    pub fn storage_info(&self) -> Result<StorageInfo, tambakError> {
        self.raw.storage_info()
    }

    //==============================================================================
    // Terminal operations
    //==============================================================================

    pub fn count(&self) -> Result<i64, tambakError> {
        self.raw.count()
    }

    /// Runs `f` for every element. At-least-once under task retries.
    pub fn for_each<F>(&self, f: F) -> Result<(), tambakError>
    where
        F: Fn(T) + Sync,
    {
        self.raw.run_job("foreach", &|_idx: usize, batch: RecordBatch| {
            T::decode_batch(&batch)?.into_iter().for_each(&f);
            Ok(())
        })?;
        Ok(())
    }

    /// Runs `f` once per partition. At-least-once under task retries.
    pub fn for_each_partition<F>(&self, f: F) -> Result<(), tambakError>
    where
        F: Fn(std::vec::IntoIter<T>) + Sync,
    {
        self.raw
            .run_job("foreachPartition", &|_idx: usize, batch: RecordBatch| {
                f(T::decode_batch(&batch)?.into_iter());
                Ok(())
            })?;
        Ok(())
    }

    /// Folds all elements with `f`, which must be commutative and associative.
    /// Fails with `EmptyCollection` when there is nothing to fold.
    pub fn reduce<F>(&self, f: F) -> Result<T, tambakError>
    where
        F: Fn(T, T) -> T + Sync,
    {
        let partials = self
            .raw
            .run_job("reduce", &|_idx: usize, batch: RecordBatch| {
                Ok(T::decode_batch(&batch)?.into_iter().reduce(&f))
            })?;
        partials
            .into_iter()
            .flatten()
            .reduce(&f)
            .ok_or_else(|| tambakError::EmptyCollection("reduce of an empty collection".to_string()))
    }

    /// Every element, partition by partition.
    pub fn collect(&self) -> Result<Vec<T>, tambakError> {
        let parts = self
            .raw
            .run_job("collect", &|_idx: usize, batch: RecordBatch| T::decode_batch(&batch))?;
        Ok(parts.into_iter().flatten().collect())
    }

    /// The first `n` elements in partition order.
    pub fn take(&self, n: usize) -> Result<Vec<T>, tambakError> {
        let mut items = Vec::with_capacity(n);
        for batch in self.raw.take(n)? {
            items.extend(T::decode_batch(&batch)?);
        }
        Ok(items)
    }

    /// Prints the first `num_rows` elements as a table on stdout. With `truncate`
    /// cells wider than 20 characters are elided.
    pub fn show(&self, num_rows: usize, truncate: bool) -> Result<(), tambakError> {
        let width = if truncate { DEFAULT_TRUNCATE_WIDTH } else { 0 };
        print!("{}", self.show_string(num_rows, width)?);
        Ok(())
    }

    /// The text `show` prints. `truncate_width == 0` disables truncation.
    pub fn show_string(&self, num_rows: usize, truncate_width: usize) -> Result<String, tambakError> {
        show_raw(&self.raw, num_rows, truncate_width)
    }
}

/// Shared by the typed and the generic `show`.
pub(crate) fn show_raw(
    raw: &RawCollection,
    num_rows: usize,
    truncate_width: usize,
) -> Result<String, tambakError> {
    let batches = raw.take(num_rows.saturating_add(1))?;
    let fetched: usize = batches.iter().map(RecordBatch::num_rows).sum();
    render_table(
        &raw.schema(),
        &batches,
        num_rows,
        truncate_width,
        fetched > num_rows,
    )
}

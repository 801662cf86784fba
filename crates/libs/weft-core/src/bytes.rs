use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use crate::error::WeftError;

pub const TIER_SMALL: usize = 256;
pub const TIER_MEDIUM: usize = 512;
pub const TIER_LARGE: usize = 1024;
pub const SLOTS_PER_TIER: usize = 16;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Tier {
    Small,
    Medium,
    Large,
}

impl Tier {
    pub const fn capacity(self) -> usize {
        match self {
            Tier::Small => TIER_SMALL,
            Tier::Medium => TIER_MEDIUM,
            Tier::Large => TIER_LARGE,
        }
    }

    fn fitting(requested: usize) -> Option<Self> {
        if requested <= TIER_SMALL {
            Some(Tier::Small)
        } else if requested <= TIER_MEDIUM {
            Some(Tier::Medium)
        } else if requested <= TIER_LARGE {
            Some(Tier::Large)
        } else {
            None
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub requests: usize,
    pub hits: usize,
    pub misses: usize,
}

struct PoolInner {
    small: Vec<Vec<u8>>,
    medium: Vec<Vec<u8>>,
    large: Vec<Vec<u8>>,
    stats: PoolStats,
}

impl PoolInner {
    fn shelf(&mut self, tier: Tier) -> &mut Vec<Vec<u8>> {
        match tier {
            Tier::Small => &mut self.small,
            Tier::Medium => &mut self.medium,
            Tier::Large => &mut self.large,
        }
    }
}

/// Three-tier fixed-slot storage pool for [`Bytes`].
///
/// Every tier holds [`SLOTS_PER_TIER`] pre-reserved vectors. Oversized or
/// exhausted requests fall through to the heap; correctness never depends
/// on a pool hit. All shelf state sits behind one mutex held only around
/// push/pop.
pub struct BytesPool {
    inner: Mutex<PoolInner>,
}

impl BytesPool {
    pub fn new() -> Arc<Self> {
        fn shelf(capacity: usize) -> Vec<Vec<u8>> {
            (0..SLOTS_PER_TIER).map(|_| Vec::with_capacity(capacity)).collect()
        }

        Arc::new(Self {
            inner: Mutex::new(PoolInner {
                small: shelf(TIER_SMALL),
                medium: shelf(TIER_MEDIUM),
                large: shelf(TIER_LARGE),
                stats: PoolStats::default(),
            }),
        })
    }

    /// Pops a slot from the smallest tier that fits, or `None` on a miss.
    fn acquire(&self, requested: usize) -> Option<(Vec<u8>, Tier)> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };

        inner.stats.requests += 1;

        let taken = Tier::fitting(requested).and_then(|tier| {
            let slot = inner.shelf(tier).pop()?;
            Some((slot, tier))
        });

        if taken.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }

        taken
    }

    /// Returns a slot to its tier shelf, length cleared and capacity kept.
    fn release(&self, mut slot: Vec<u8>, tier: Tier) {
        slot.clear();

        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        let shelf = inner.shelf(tier);
        if shelf.len() < SLOTS_PER_TIER {
            shelf.push(slot);
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().map(|inner| inner.stats).unwrap_or_default()
    }

    pub fn available(&self, tier: Tier) -> usize {
        self.inner.lock().map(|mut inner| inner.shelf(tier).len()).unwrap_or(0)
    }
}

struct Storage {
    vec: Vec<u8>,
    origin: Option<(Tier, Arc<BytesPool>)>,
}

impl Storage {
    fn empty() -> Self {
        Self { vec: Vec::new(), origin: None }
    }
}

impl Clone for Storage {
    // Duplicates into a fresh heap allocation; copies never return to a pool.
    fn clone(&self) -> Self {
        Self { vec: self.vec.clone(), origin: None }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Some((tier, pool)) = self.origin.take() {
            pool.release(std::mem::take(&mut self.vec), tier);
        }
    }
}

/// Reference-counted copy-on-write byte sequence.
///
/// Clones share storage. A mutating call first makes the buffer unique:
/// shared content is duplicated into a fresh allocation, except for
/// [`Bytes::clear`] which detaches to an empty buffer instead of copying.
pub struct Bytes {
    inner: Arc<Storage>,
}

impl Bytes {
    pub fn new() -> Self {
        Self { inner: Arc::new(Storage::empty()) }
    }

    /// Allocates writable capacity from `pool`, heap on miss or oversize.
    pub fn with_capacity(pool: &Arc<BytesPool>, capacity: usize) -> Self {
        let storage = match pool.acquire(capacity) {
            Some((vec, tier)) => Storage { vec, origin: Some((tier, pool.clone())) },
            None => {
                let mut vec = Vec::new();
                if vec.try_reserve(capacity).is_err() {
                    log::warn!("bytes: heap reservation of {} bytes failed", capacity);
                    return Self::new();
                }
                Storage { vec, origin: None }
            }
        };

        Self { inner: Arc::new(storage) }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self { inner: Arc::new(Storage { vec: data.to_vec(), origin: None }) }
    }

    pub fn from_pool_slice(pool: &Arc<BytesPool>, data: &[u8]) -> Self {
        let mut bytes = Self::with_capacity(pool, data.len());
        bytes.append(data);
        bytes
    }

    pub fn from_vec(vec: Vec<u8>) -> Self {
        Self { inner: Arc::new(Storage { vec, origin: None }) }
    }

    pub fn len(&self) -> usize {
        self.inner.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.vec.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.vec.capacity()
    }

    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.inner) > 1
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner.vec
    }

    /// View of the bytes from `offset` to the end.
    pub fn mid(&self, offset: usize) -> &[u8] {
        let offset = offset.min(self.len());
        &self.inner.vec[offset..]
    }

    /// View of `len` bytes starting at `offset`, clamped to the buffer.
    pub fn mid_len(&self, offset: usize, len: usize) -> &[u8] {
        let offset = offset.min(self.len());
        let end = offset.saturating_add(len).min(self.len());
        &self.inner.vec[offset..end]
    }

    /// Ensures exclusive ownership. With `copy` the content is duplicated,
    /// otherwise the buffer detaches to empty.
    fn make_unique(&mut self, copy: bool) {
        if Arc::strong_count(&self.inner) == 1 {
            return;
        }
        self.inner = if copy {
            Arc::new(self.inner.as_ref().clone())
        } else {
            Arc::new(Storage::empty())
        };
    }

    fn vec_mut(&mut self) -> &mut Vec<u8> {
        // make_unique above guarantees a sole owner here
        &mut Arc::get_mut(&mut self.inner).expect("unique storage").vec
    }

    /// Ensures writable capacity for `additional` more bytes.
    pub fn reserve(&mut self, additional: usize) {
        self.make_unique(true);
        if self.vec_mut().try_reserve(additional).is_err() {
            log::warn!("bytes: heap reservation of {} bytes failed", additional);
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.make_unique(true);
        self.vec_mut().extend_from_slice(data);
    }

    pub fn push(&mut self, byte: u8) {
        self.make_unique(true);
        self.vec_mut().push(byte);
    }

    pub fn resize(&mut self, len: usize) {
        self.make_unique(true);
        self.vec_mut().resize(len, 0);
    }

    pub fn clear(&mut self) {
        self.make_unique(false);
        self.vec_mut().clear();
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.make_unique(true);
        self.vec_mut().as_mut_slice()
    }

    pub fn to_hex(&self, upper: bool) -> String {
        if upper {
            hex::encode_upper(self.as_slice())
        } else {
            hex::encode(self.as_slice())
        }
    }

    pub fn from_hex(hex_string: &str) -> Result<Self, WeftError> {
        let vec = hex::decode(hex_string).map_err(|_| WeftError::InvalidArgument)?;
        Ok(Self::from_vec(vec))
    }

    /// Lexicographic comparison of contents.
    pub fn compare(&self, other: &Bytes) -> Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl Clone for Bytes {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl Default for Bytes {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Bytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Bytes {}

impl PartialOrd for Bytes {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bytes {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl std::fmt::Debug for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bytes[{}]<{}>", self.len(), self.to_hex(false))
    }
}

impl From<&[u8]> for Bytes {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(vec: Vec<u8>) -> Self {
        Self::from_vec(vec)
    }
}

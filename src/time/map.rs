//! Ordered time-keyed container with seek-mode lookup

use std::collections::btree_map::{self, BTreeMap};
use std::ops::Bound::{Excluded, Unbounded};

use serde::{Deserialize, Serialize};

use super::stamp::Time;

/// How a requested time resolves to a stored key.
///
/// Lower/upper bound follow the "request is a bound on the result" reading,
/// which is not quite the same as the like-named container searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SeekMode {
    /// Implementation chooses; resolves as [`SeekMode::Nearest`].
    #[default]
    Unspecified,
    /// Closest key; a split distance picks the earlier key.
    Nearest,
    /// Smallest key `>=` the request.
    LowerBound,
    /// Largest key `<=` the request.
    UpperBound,
    /// Only a key equal to the request.
    Exact,
    /// Smallest key strictly after the request.
    Next,
    /// Largest key strictly before the request.
    Previous,
}

/// Ordered map from [`Time`] to `V`.
///
/// Keys iterate in strictly increasing order and inserting an existing key
/// overwrites its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeMap<V> {
    inner: BTreeMap<Time, V>,
}

impl<V> Default for TimeMap<V> {
    fn default() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }
}

impl<V> TimeMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, time: Time, value: V) -> Option<V> {
        self.inner.insert(time, value)
    }

    pub fn remove(&mut self, time: Time) -> Option<V> {
        self.inner.remove(&time)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn get(&self, time: Time) -> Option<&V> {
        self.inner.get(&time)
    }

    pub fn contains(&self, time: Time) -> bool {
        self.inner.contains_key(&time)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn first(&self) -> Option<(Time, &V)> {
        self.inner.first_key_value().map(|(k, v)| (*k, v))
    }

    pub fn last(&self) -> Option<(Time, &V)> {
        self.inner.last_key_value().map(|(k, v)| (*k, v))
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = Time> + '_ {
        self.inner.keys().copied()
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + '_ {
        self.inner.values()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Time, &V)> + '_ {
        self.inner.iter().map(|(k, v)| (*k, v))
    }

    /// The key set of this map, without values.
    pub fn key_map(&self) -> TimeMap<()> {
        self.keys().map(|k| (k, ())).collect()
    }

    /// Resolve `time` under `mode` to a stored entry.
    ///
    /// Returns `None` when nothing satisfies the mode; never substitutes a
    /// different mode.
    pub fn find(&self, time: Time, mode: SeekMode) -> Option<(Time, &V)> {
        let entry = match mode {
            SeekMode::Exact => self.inner.get_key_value(&time),
            SeekMode::LowerBound => self.inner.range(time..).next(),
            SeekMode::UpperBound => self.inner.range(..=time).next_back(),
            SeekMode::Next => self.inner.range((Excluded(time), Unbounded)).next(),
            SeekMode::Previous => self.inner.range(..time).next_back(),
            SeekMode::Nearest | SeekMode::Unspecified => self.find_nearest(time),
        };
        entry.map(|(k, v)| (*k, v))
    }

    /// Key-only form of [`TimeMap::find`].
    pub fn find_key(&self, time: Time, mode: SeekMode) -> Option<Time> {
        self.find(time, mode).map(|(k, _)| k)
    }

    fn find_nearest(&self, time: Time) -> Option<(&Time, &V)> {
        let below = self.inner.range(..=time).next_back();
        let above = self.inner.range((Excluded(time), Unbounded)).next();

        match (below, above) {
            (Some(b), Some(a)) => {
                if a.0.abs_diff(time) < time.abs_diff(*b.0) {
                    Some(a)
                } else {
                    Some(b)
                }
            }
            (b, a) => b.or(a),
        }
    }
}

impl<V: Clone> TimeMap<V> {
    /// Merge `other` into this map; entries from `other` win on collision.
    pub fn insert_all(&mut self, other: &TimeMap<V>) {
        for (k, v) in other.iter() {
            self.inner.insert(k, v.clone());
        }
    }
}

impl<V> FromIterator<(Time, V)> for TimeMap<V> {
    fn from_iter<I: IntoIterator<Item = (Time, V)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl<V> IntoIterator for TimeMap<V> {
    type Item = (Time, V);
    type IntoIter = btree_map::IntoIter<Time, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<V> Extend<(Time, V)> for TimeMap<V> {
    fn extend<I: IntoIterator<Item = (Time, V)>>(&mut self, iter: I) {
        self.inner.extend(iter);
    }
}

//! A multiset (bag) with threshold support.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// A multiset that tracks how many times each element was added.
///
/// A poll tally is a `Bag` of the choices returned by sampled peers. Setting
/// the threshold to α makes [`Bag::threshold`] the set of choices that won
/// the poll.
///
/// ```
/// use apollo_utils::Bag;
///
/// let mut bag = Bag::new();
/// bag.add_count("a", 4);
/// bag.add("b");
/// bag.set_threshold(4);
///
/// assert!(bag.threshold().contains("a"));
/// assert!(!bag.threshold().contains("b"));
/// ```
#[derive(Clone)]
pub struct Bag<T: Eq + Hash + Clone> {
    counts: HashMap<T, usize>,
    size: usize,
    threshold: usize,
    met_threshold: HashSet<T>,
}

impl<T: Eq + Hash + Clone> Default for Bag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> Bag<T> {
    /// Creates a new empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            size: 0,
            threshold: 0,
            met_threshold: HashSet::new(),
        }
    }

    /// Creates a bag from an iterator of elements.
    pub fn of<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut bag = Self::new();
        for item in iter {
            bag.add(item);
        }
        bag
    }

    /// Sets the threshold for the threshold set. A threshold of 0 disables it.
    pub fn set_threshold(&mut self, threshold: usize) {
        if self.threshold == threshold {
            return;
        }

        self.threshold = threshold;
        self.met_threshold.clear();
        if threshold == 0 {
            return;
        }

        for (item, &count) in &self.counts {
            if count >= threshold {
                self.met_threshold.insert(item.clone());
            }
        }
    }

    /// Adds a single element to the bag.
    pub fn add(&mut self, item: T) {
        self.add_count(item, 1);
    }

    /// Adds an element `count` times. A count of 0 is a no-op.
    pub fn add_count(&mut self, item: T, count: usize) {
        if count == 0 {
            return;
        }

        let total = self.counts.entry(item.clone()).or_insert(0);
        *total += count;
        self.size += count;

        if self.threshold > 0 && *total >= self.threshold {
            self.met_threshold.insert(item);
        }
    }

    /// Returns the count of the given element.
    #[must_use]
    pub fn count(&self, item: &T) -> usize {
        self.counts.get(item).copied().unwrap_or(0)
    }

    /// Returns the total number of elements, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the distinct elements in the bag.
    pub fn list(&self) -> Vec<T> {
        self.counts.keys().cloned().collect()
    }

    /// Iterates over distinct elements and their counts.
    pub fn iter(&self) -> impl Iterator<Item = (&T, usize)> {
        self.counts.iter().map(|(item, &count)| (item, count))
    }

    /// Returns the most common element and its count.
    ///
    /// Ties resolve to any of the tied elements. Returns `None` if empty.
    pub fn mode(&self) -> Option<(T, usize)> {
        self.counts
            .iter()
            .max_by_key(|(_, &count)| count)
            .map(|(item, &count)| (item.clone(), count))
    }

    /// Returns the elements whose count reached the threshold.
    #[must_use]
    pub fn threshold(&self) -> &HashSet<T> {
        &self.met_threshold
    }

    /// Returns a new bag containing only elements that satisfy the predicate.
    pub fn filter<F: Fn(&T) -> bool>(&self, predicate: F) -> Self {
        let mut filtered = Self::new();
        filtered.set_threshold(self.threshold);
        for (item, &count) in &self.counts {
            if predicate(item) {
                filtered.add_count(item.clone(), count);
            }
        }
        filtered
    }
}

impl<T: Eq + Hash + Clone> FromIterator<(T, usize)> for Bag<T> {
    fn from_iter<I: IntoIterator<Item = (T, usize)>>(iter: I) -> Self {
        let mut bag = Self::new();
        for (item, count) in iter {
            bag.add_count(item, count);
        }
        bag
    }
}

impl<T: Eq + Hash + Clone + fmt::Debug> fmt::Debug for Bag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bag(size={}): {{", self.size)?;
        let mut first = true;
        for (item, count) in &self.counts {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{:?}: {}", item, count)?;
            first = false;
        }
        write!(f, "}}")
    }
}

//! Bounded resolution cache keyed on `(name, type)`.
//!
//! Size zero disables the cache entirely. Cleared wholesale on every config reload.

use crate::event::MetricType;
use lru::LruCache;
use rand::Rng;
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// A cached resolution: either a hit (rule index + labels) or a remembered miss.
#[derive(Clone, Debug)]
pub enum CachedResolution {
    Hit { rule_idx: usize, labels: Vec<String> },
    Miss,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CachePolicy {
    Lru,
    Random,
}

enum Inner {
    Disabled,
    Lru(LruCache<(String, MetricType), CachedResolution>),
    Random {
        map: HashMap<(String, MetricType), CachedResolution>,
        capacity: usize,
        order: Vec<(String, MetricType)>,
    },
}

/// A resolution cache in front of the mapper's FSM/regex lookup.
pub struct ResolutionCache {
    inner: Inner,
}

impl ResolutionCache {
    pub fn new(policy: CachePolicy, size: usize) -> Self {
        let inner = match (policy, NonZeroUsize::new(size)) {
            (_, None) => Inner::Disabled,
            (CachePolicy::Lru, Some(n)) => Inner::Lru(LruCache::new(n)),
            (CachePolicy::Random, Some(_)) => Inner::Random {
                map: HashMap::new(),
                capacity: size,
                order: Vec::new(),
            },
        };

        Self { inner }
    }

    pub fn get(&mut self, name: &str, mt: MetricType) -> Option<CachedResolution> {
        match &mut self.inner {
            Inner::Disabled => None,
            Inner::Lru(c) => c.get(&(name.to_owned(), mt)).cloned(),
            Inner::Random { map, .. } => map.get(&(name.to_owned(), mt)).cloned(),
        }
    }

    pub fn put(&mut self, name: &str, mt: MetricType, v: CachedResolution) {
        let key = (name.to_owned(), mt);

        match &mut self.inner {
            Inner::Disabled => {}
            Inner::Lru(c) => {
                c.put(key, v);
            }
            Inner::Random {
                map,
                capacity,
                order,
            } => {
                if !map.contains_key(&key) && map.len() >= *capacity && *capacity > 0 {
                    let victim_idx = rand::rng().random_range(0..order.len());
                    let victim = order.swap_remove(victim_idx);
                    map.remove(&victim);
                }

                if !map.contains_key(&key) {
                    order.push(key.clone());
                }

                map.insert(key, v);
            }
        }
    }

    /// Current occupancy, reported on a background length-gauge.
    pub fn len(&self) -> usize {
        match &self.inner {
            Inner::Disabled => 0,
            Inner::Lru(c) => c.len(),
            Inner::Random { map, .. } => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_cache_never_stores() {
        let mut c = ResolutionCache::new(CachePolicy::Lru, 0);
        c.put("a", MetricType::Counter, CachedResolution::Miss);
        assert!(c.get("a", MetricType::Counter).is_none());
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn lru_round_trip() {
        let mut c = ResolutionCache::new(CachePolicy::Lru, 2);
        c.put("a", MetricType::Counter, CachedResolution::Miss);
        assert!(matches!(
            c.get("a", MetricType::Counter),
            Some(CachedResolution::Miss)
        ));
    }

    #[test]
    fn random_cache_bounded() {
        let mut c = ResolutionCache::new(CachePolicy::Random, 1);
        c.put("a", MetricType::Counter, CachedResolution::Miss);
        c.put("b", MetricType::Counter, CachedResolution::Miss);
        assert_eq!(c.len(), 1);
    }
}

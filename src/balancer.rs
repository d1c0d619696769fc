//! Generic load balancer over a fixed set of elements, used wherever a
//! single logical ingress/egress name needs to fan out across several
//! concrete targets (tunnel destinations, multi-homed egresses).

use crate::common::error::{Error, Result};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Random,
    RoundRobin,
    LeastConn,
}

pub struct Balancer<T> {
    items: Vec<T>,
    strategy: Strategy,
    rr_cursor: AtomicUsize,
    use_counts: Vec<AtomicUsize>,
}

impl<T: Clone> Balancer<T> {
    pub fn new(items: Vec<T>, strategy: Strategy) -> Result<Self> {
        if items.is_empty() {
            return Err(Error::misc("balancer requires at least one element"));
        }
        let use_counts = items.iter().map(|_| AtomicUsize::new(0)).collect();
        Ok(Self {
            items,
            strategy,
            rr_cursor: AtomicUsize::new(0),
            use_counts,
        })
    }

    /// Pick an element; returns its index (for a later `release`) and a
    /// clone of the element itself.
    pub fn select(&self) -> (usize, T) {
        let idx = match self.strategy {
            Strategy::Random => rand::thread_rng().gen_range(0..self.items.len()),
            Strategy::RoundRobin => self.rr_cursor.fetch_add(1, Ordering::Relaxed) % self.items.len(),
            Strategy::LeastConn => {
                let idx = self
                    .use_counts
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, c)| c.load(Ordering::Relaxed))
                    .map(|(i, _)| i)
                    .unwrap();
                self.use_counts[idx].fetch_add(1, Ordering::Relaxed);
                idx
            }
        };
        (idx, self.items[idx].clone())
    }

    /// Release a previously-selected element (only meaningful for
    /// least-conn). An out-of-range index is a caller bug, not a runtime
    /// condition, so it is reported rather than silently ignored.
    pub fn release(&self, idx: usize) -> Result<()> {
        let counter = self
            .use_counts
            .get(idx)
            .ok_or_else(|| Error::misc("release of untracked balancer index"))?;
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
            Some(c.saturating_sub(1))
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_wraps() {
        let b = Balancer::new(vec!["a", "b", "c"], Strategy::RoundRobin).unwrap();
        let picks: Vec<_> = (0..6).map(|_| b.select().1).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn least_conn_favors_unused() {
        let b = Balancer::new(vec![1, 2], Strategy::LeastConn).unwrap();
        let (i0, _) = b.select();
        let (i1, _) = b.select();
        assert_ne!(i0, i1);
        b.release(i0).unwrap();
        let (i2, _) = b.select();
        assert_eq!(i2, i0);
    }

    #[test]
    fn release_of_bad_index_is_misc() {
        let b = Balancer::new(vec![1], Strategy::Random).unwrap();
        assert!(matches!(b.release(5), Err(Error::Misc(_))));
    }

    #[test]
    fn empty_balancer_is_rejected() {
        let result: Result<Balancer<i32>> = Balancer::new(vec![], Strategy::Random);
        assert!(result.is_err());
    }

    #[test]
    fn random_always_in_range() {
        let b = Balancer::new(vec!["x", "y", "z"], Strategy::Random).unwrap();
        for _ in 0..50 {
            let (idx, _) = b.select();
            assert!(idx < 3);
        }
    }
}

use std::panic;

use crossbeam_utils::thread;
use log::{debug, info};

/// Fixed-size set of scoped workers for fan-out over a slice.
///
/// # Logic
/// Each call splits its input into at most `workers` contiguous chunks and
/// runs one scoped thread per chunk, so closures may borrow the caller's
/// locks and buffers. Results come back in input order.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    workers: usize,
}

impl WorkerPool {
    pub fn new(name: &'static str, workers: usize) -> Self {
        let workers = workers.max(1);
        info!("Pool {} -> {} workers", name, workers);
        Self { name, workers }
    }

    /// Applies `f` to every item and returns the results in input order.
    ///
    /// A panic on a worker is resumed on the calling thread.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if items.is_empty() {
            return Vec::new();
        }
        if self.workers == 1 || items.len() == 1 {
            return items.iter().map(f).collect();
        }

        let chunk = items.len().div_ceil(self.workers);
        debug!("Pool {} -> {} items in chunks of {}", self.name, items.len(), chunk);
        let f = &f;
        let outcome = thread::scope(|scope| {
            let handles: Vec<_> = items
                .chunks(chunk)
                .map(|part| scope.spawn(move |_| part.iter().map(f).collect::<Vec<R>>()))
                .collect();
            let mut results = Vec::with_capacity(items.len());
            for handle in handles {
                match handle.join() {
                    Ok(part) => results.extend(part),
                    Err(payload) => panic::resume_unwind(payload),
                }
            }
            results
        });
        match outcome {
            Ok(results) => results,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_preserves_order() {
        let pool = WorkerPool::new("test", 4);
        let items: Vec<usize> = (0..103).collect();
        let doubled = pool.map(&items, |x| x * 2);
        assert_eq!(doubled, items.iter().map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_borrows_caller_state() {
        let pool = WorkerPool::new("test", 3);
        let offsets = vec![10u32, 20, 30];
        let sums = pool.map(&[0usize, 1, 2], |&i| offsets[i] + 1);
        assert_eq!(sums, vec![11, 21, 31]);
        assert!(pool.map::<usize, usize, _>(&[], |x| *x).is_empty());
    }

    #[test]
    #[should_panic(expected = "worker failure")]
    fn test_worker_panic_propagates() {
        let pool = WorkerPool::new("test", 2);
        pool.map(&[1, 2, 3, 4], |&x| {
            if x == 3 {
                panic!("worker failure");
            }
            x
        });
    }
}

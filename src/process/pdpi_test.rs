use super::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

struct CountingStarter {
    next: AtomicU64,
    stopped: Mutex<Vec<u64>>,
}

impl PdpiStarter for CountingStarter {
    fn start(&self, _pd: PdHandle) -> Result<u64, VmError> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }

    fn stop(&self, pdpi: u64) {
        self.stopped.lock().unwrap().push(pdpi);
    }
}

#[test]
fn starts_lazily_and_caches() {
    let starter = CountingStarter {
        next: AtomicU64::new(10),
        stopped: Mutex::new(Vec::new()),
    };
    let mut cache = PdpiCache::new(2);
    let first = cache.get_or_start(0, PdHandle(1), 0, &starter).unwrap();
    let second = cache.get_or_start(0, PdHandle(1), 0, &starter).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, 10);
}

#[test]
fn stop_all_releases_only_started_instances() {
    let starter = CountingStarter {
        next: AtomicU64::new(0),
        stopped: Mutex::new(Vec::new()),
    };
    let mut cache = PdpiCache::new(2);
    cache.get_or_start(1, PdHandle(5), 0, &starter).unwrap();
    cache.stop_all(&starter);
    assert_eq!(*starter.stopped.lock().unwrap(), vec![0]);
}

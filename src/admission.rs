use std::sync::{Mutex, MutexGuard};

/// Counts connections that are past the accept stage and refuses new ones once the cap is reached.
#[derive(Debug)]
pub struct Admission {
    active: Mutex<usize>,
    max_connections: usize,
}

impl Admission {
    pub fn new(max_connections: usize) -> Self {
        Self {
            active: Mutex::new(0),
            max_connections,
        }
    }

    /// Count a new connection, or return None if the server is full.
    ///
    /// The returned guard releases the slot when dropped, so every exit path of a session gives it
    /// back exactly once.
    pub fn try_admit(&self) -> Option<AdmissionGuard<'_>> {
        let mut active = self.lock();
        if *active >= self.max_connections {
            return None;
        }
        *active += 1;
        Some(AdmissionGuard { admission: self })
    }

    /// Number of currently admitted connections.
    pub fn active(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        // The counter stays consistent even if a holder panicked.
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An admitted connection's slot.
#[derive(Debug)]
pub struct AdmissionGuard<'a> {
    admission: &'a Admission,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.admission.lock();
        debug_assert!(*active > 0, "admission counter underflow");
        *active = active.saturating_sub(1);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn refuses_past_cap() {
        let admission = Admission::new(2);
        let first = admission.try_admit();
        let second = admission.try_admit();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(admission.try_admit().is_none());
        assert_eq!(admission.active(), 2);

        drop(first);
        assert_eq!(admission.active(), 1);
        assert!(admission.try_admit().is_some());
        drop(second);
        assert_eq!(admission.active(), 0);
    }

    #[test]
    fn release_after_poisoned_lock() {
        let admission = Arc::new(Admission::new(1));
        let guard = admission.try_admit().unwrap();
        let poisoner = Arc::clone(&admission);
        let result = thread::spawn(move || {
            let _active = poisoner.active.lock().unwrap();
            panic!("poison the counter");
        })
        .join();
        assert!(result.is_err());
        drop(guard);
        assert_eq!(admission.active(), 0);
        assert!(admission.try_admit().is_some());
    }

    #[test]
    fn zero_cap_refuses_everything() {
        let admission = Admission::new(0);
        assert!(admission.try_admit().is_none());
        assert_eq!(admission.active(), 0);
    }

    #[test]
    fn released_on_panic() {
        let admission = Arc::new(Admission::new(1));
        let result = {
            let admission = Arc::clone(&admission);
            thread::spawn(move || {
                let _guard = admission.try_admit().unwrap();
                panic!("session failed");
            })
            .join()
        };
        assert!(result.is_err());
        assert_eq!(admission.active(), 0);
    }

    #[test]
    fn concurrent_sessions_net_to_zero() {
        let admission = Arc::new(Admission::new(8));
        let workers: Vec<_> = (0..32)
            .map(|_| {
                let admission = Arc::clone(&admission);
                thread::spawn(move || {
                    let mut admitted = 0;
                    for _ in 0..100 {
                        if let Some(_guard) = admission.try_admit() {
                            assert!(admission.active() <= 8);
                            admitted += 1;
                        }
                    }
                    admitted
                })
            })
            .collect();
        let admitted: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
        assert!(admitted > 0);
        assert_eq!(admission.active(), 0);
    }
}

use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::oneshot;

type Waiters<T> = Mutex<Option<Vec<oneshot::Sender<T>>>>;

/// Collapses concurrent runs of the same operation into one.
///
/// The first caller of [`run`](Self::run) becomes the leader and executes the
/// operation. Callers arriving while it is outstanding wait for the leader's
/// result instead of starting their own. If the leader is dropped before it
/// finishes, the waiters compete again and one of them takes over.
pub struct SingleFlight<T> {
    waiters: Waiters<T>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(None),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.waiters.lock().is_some()
    }

    pub async fn run<F, Fut>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let receiver = {
                let mut waiters = self.waiters.lock();
                match waiters.as_mut() {
                    Some(pending) => {
                        let (tx, rx) = oneshot::channel();
                        pending.push(tx);
                        rx
                    }
                    None => {
                        *waiters = Some(Vec::new());
                        break;
                    }
                }
            };

            if let Ok(value) = receiver.await {
                return value;
            }
            // Leader went away without a result.
        }

        let guard = LeaderGuard {
            waiters: &self.waiters,
            armed: true,
        };
        let value = op().await;

        for waiter in guard.complete() {
            let _ = waiter.send(value.clone());
        }
        value
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct LeaderGuard<'a, T> {
    waiters: &'a Waiters<T>,
    armed: bool,
}

impl<T> LeaderGuard<'_, T> {
    fn complete(mut self) -> Vec<oneshot::Sender<T>> {
        self.armed = false;
        self.waiters.lock().take().unwrap_or_default()
    }
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            // Dropping the senders wakes every waiter with an error.
            self.waiters.lock().take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                flight
                    .run(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        42
                    })
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(flight.is_in_flight());
        release.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!flight.is_in_flight());
    }

    #[tokio::test]
    async fn test_sequential_runs_execute_each_time() {
        let flight = SingleFlight::<u32>::new();
        assert_eq!(flight.run(|| async { 1 }).await, 1);
        assert_eq!(flight.run(|| async { 2 }).await, 2);
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_flight() {
        let flight = Arc::new(SingleFlight::<u32>::new());

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move { flight.run(std::future::pending::<u32>).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(flight.is_in_flight());

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert!(!flight.is_in_flight());

        assert_eq!(flight.run(|| async { 7 }).await, 7);
    }
}

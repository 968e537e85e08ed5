use std::sync::Barrier;
use std::thread;

/// Runs `a` and `b` on two threads released from a common barrier.
///
/// Panics in either closure propagate to the caller.
pub fn race<A, B>(a: A, b: B)
where
    A: FnOnce() + Send,
    B: FnOnce() + Send,
{
    let start = Barrier::new(2);
    thread::scope(|scope| {
        scope.spawn(|| {
            start.wait();
            a();
        });
        start.wait();
        b();
    });
}

/// Like [`race`] with three contenders.
pub fn race3<A, B, C>(a: A, b: B, c: C)
where
    A: FnOnce() + Send,
    B: FnOnce() + Send,
    C: FnOnce() + Send,
{
    let start = Barrier::new(3);
    thread::scope(|scope| {
        scope.spawn(|| {
            start.wait();
            a();
        });
        scope.spawn(|| {
            start.wait();
            b();
        });
        start.wait();
        c();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn all_contenders_run() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("all_contenders_run");
        let runs = AtomicUsize::new(0);
        race3(
            || {
                runs.fetch_add(1, Ordering::SeqCst);
            },
            || {
                runs.fetch_add(1, Ordering::SeqCst);
            },
            || {
                runs.fetch_add(1, Ordering::SeqCst);
            },
        );
        let runs = runs.load(Ordering::SeqCst);
        crate::assert_with_log!(runs == 3, "three runs", 3, runs);
        crate::test_complete!("all_contenders_run");
    }
}

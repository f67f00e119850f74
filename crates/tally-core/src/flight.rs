//! Single-in-flight execution with coalescing.
//!
//! At most one caller runs the guarded work at a time. A caller arriving
//! while the work runs blocks until it finishes and receives a clone of the
//! leader's result instead of running it again.
//!
//! The leader's own thread must not call [`SingleFlight::run`] again from
//! inside the work: it would wait on itself. Check
//! [`SingleFlight::led_by_current_thread`] first at such call sites.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// How a caller's request was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flight<T> {
    /// This caller ran the work.
    Led(T),
    /// Another caller was already running it; this is their result.
    Joined(T),
}

impl<T> Flight<T> {
    #[must_use]
    pub fn into_inner(self) -> T {
        match self {
            Self::Led(value) | Self::Joined(value) => value,
        }
    }

    #[must_use]
    pub const fn joined(&self) -> bool {
        matches!(self, Self::Joined(_))
    }
}

struct State<T> {
    running: bool,
    leader: Option<ThreadId>,
    generation: u64,
    last: Option<T>,
}

pub struct SingleFlight<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SingleFlight")
            .field("running", &state.running)
            .field("generation", &state.generation)
            .finish()
    }
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears `running` even if the work panics, so waiters are never stranded.
struct Landing<'a, T> {
    flight: &'a SingleFlight<T>,
}

impl<T> Drop for Landing<'_, T> {
    fn drop(&mut self) {
        let mut state = self.flight.lock();
        if thread::panicking() {
            state.last = None;
        }
        state.running = false;
        state.leader = None;
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.flight.done.notify_all();
    }
}

impl<T> SingleFlight<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                running: false,
                leader: None,
                generation: 0,
                last: None,
            }),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True while some caller is executing the work.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.lock().running
    }

    /// True when the calling thread is the one executing the work, as for a
    /// callback invoked from inside it.
    #[must_use]
    pub fn led_by_current_thread(&self) -> bool {
        self.lock().leader == Some(thread::current().id())
    }
}

impl<T: Clone> SingleFlight<T> {
    /// Run `work` unless it is already running, in which case wait for the
    /// running call and share its result.
    pub fn run(&self, work: impl FnOnce() -> T) -> Flight<T> {
        let mut state = self.lock();
        if state.running {
            let joined_at = state.generation;
            while state.running && state.generation == joined_at {
                state = self.done.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            if state.generation != joined_at
                && let Some(result) = state.last.clone()
            {
                return Flight::Joined(result);
            }
            // The leader panicked without a result, or another leader
            // started before we woke; fall through and lead.
            if state.running {
                drop(state);
                return self.run(work);
            }
        }

        state.running = true;
        state.leader = Some(thread::current().id());
        drop(state);

        let landing = Landing { flight: self };
        let result = work();
        self.lock().last = Some(result.clone());
        drop(landing);
        Flight::Led(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn sequential_calls_each_lead() {
        let flight = SingleFlight::new();
        assert_eq!(flight.run(|| 1), Flight::Led(1));
        assert_eq!(flight.run(|| 2), Flight::Led(2));
        assert!(!flight.in_flight());
    }

    #[test]
    fn concurrent_caller_joins_the_running_call() {
        let flight = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(Barrier::new(2));

        let leader = {
            let flight = Arc::clone(&flight);
            let runs = Arc::clone(&runs);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                flight.run(|| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    started.wait();
                    thread::sleep(Duration::from_millis(50));
                    7
                })
            })
        };

        started.wait();
        let joined = flight.run(|| {
            runs.fetch_add(1, Ordering::SeqCst);
            99
        });

        assert_eq!(leader.join().unwrap(), Flight::Led(7));
        assert_eq!(joined, Flight::Joined(7));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn leader_thread_is_known_only_while_running() {
        let flight = SingleFlight::new();
        assert!(!flight.led_by_current_thread());
        let inside = flight.run(|| flight.led_by_current_thread());
        assert_eq!(inside, Flight::Led(true));
        assert!(!flight.led_by_current_thread());
    }

    #[test]
    fn other_threads_are_not_the_leader() {
        let flight = Arc::new(SingleFlight::new());
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let leader = {
            let flight = Arc::clone(&flight);
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                flight.run(|| {
                    started.wait();
                    release.wait();
                })
            })
        };
        started.wait();
        assert!(flight.in_flight());
        assert!(!flight.led_by_current_thread());
        release.wait();
        leader.join().unwrap();
    }

    #[test]
    fn panic_in_work_releases_the_flight() {
        let flight = Arc::new(SingleFlight::<u8>::new());
        let inner = Arc::clone(&flight);
        let outcome = thread::spawn(move || inner.run(|| panic!("boom"))).join();
        assert!(outcome.is_err());
        assert!(!flight.in_flight());
        assert_eq!(flight.run(|| 3), Flight::Led(3));
    }
}

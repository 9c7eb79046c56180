// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! One time loading of the programmer sound bank.

use std::fmt;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, span, warn, Level};

use crate::error::BankError;
use crate::middleware::{BankHandle, Middleware, MiddlewareError};

pub mod source;

pub use source::{BankSource, EmbeddedBank, FileBank, MemoryBank};

enum BankState {
    NotLoaded,
    Loading,
    Loaded(BankHandle),
    Failed(BankError),
}

impl fmt::Display for BankState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankState::NotLoaded => write!(f, "not loaded"),
            BankState::Loading => write!(f, "loading"),
            BankState::Loaded(bank) => write!(f, "loaded ({})", bank),
            BankState::Failed(e) => write!(f, "failed ({})", e),
        }
    }
}

/// Loads the bank at most once. Concurrent first callers wait for the one load in
/// progress; a failed load is never retried.
pub struct BankBootstrap {
    source: Box<dyn BankSource>,
    expected_events: Vec<String>,
    state: Mutex<BankState>,
    changed: Condvar,
}

impl BankBootstrap {
    /// Creates a bootstrap for the given source. The expected events are only checked
    /// for diagnostics once the bank has loaded.
    pub fn new(source: Box<dyn BankSource>, expected_events: Vec<String>) -> BankBootstrap {
        BankBootstrap {
            source,
            expected_events,
            state: Mutex::new(BankState::NotLoaded),
            changed: Condvar::new(),
        }
    }

    /// Loads the bank if nothing has tried yet and returns the loaded bank. Once a load
    /// has failed, every call reports the bank as unavailable.
    pub fn ensure_loaded(&self, middleware: &dyn Middleware) -> Result<BankHandle, BankError> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                BankState::Loaded(bank) => return Ok(*bank),
                BankState::Failed(e) => return Err(BankError::Unavailable(Box::new(e.clone()))),
                BankState::NotLoaded => break,
                BankState::Loading => {}
            }
            self.changed.wait(&mut state);
        }
        *state = BankState::Loading;
        drop(state);

        let mut guard = LoadGuard {
            bootstrap: self,
            finished: false,
        };
        let result = self.load(middleware);

        let mut state = self.state.lock();
        *state = match &result {
            Ok(bank) => BankState::Loaded(*bank),
            Err(e) => {
                error!(source = %self.source, err = %e, "Bank load failed, playback is disabled");
                BankState::Failed(e.clone())
            }
        };
        guard.finished = true;
        self.changed.notify_all();
        result
    }

    fn load(&self, middleware: &dyn Middleware) -> Result<BankHandle, BankError> {
        let span = span!(Level::INFO, "bank load", source = %self.source);
        let _enter = span.enter();

        info!("Loading bank");
        let data = self.source.read()?;
        let bank = middleware
            .load_bank_memory(&data)
            .map_err(BankError::LoadFailed)?;

        match middleware.bank_events(bank) {
            Ok(events) => {
                for event in events.iter() {
                    debug!(
                        path = %event.path,
                        id = %event.id,
                        is_3d = event.is_3d,
                        "Bank event"
                    );
                }
                for expected in self.expected_events.iter() {
                    if !events.iter().any(|event| event.matches(expected)) {
                        warn!(event = %expected, "Bank does not contain expected event");
                    }
                }
            }
            Err(e) => warn!(code = e.code(), "Unable to list bank events: {}", e),
        }

        info!(%bank, bytes = data.len(), "Bank loaded");
        Ok(bank)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.lock(), BankState::Loaded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.state.lock(), BankState::Failed(_))
    }
}

/// Fails the bootstrap if the load unwinds before storing its result, so waiters wake
/// up instead of blocking on `Loading` forever.
struct LoadGuard<'a> {
    bootstrap: &'a BankBootstrap,
    finished: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        error!(
            source = %self.bootstrap.source,
            "Bank load panicked, playback is disabled"
        );
        let mut state = self.bootstrap.state.lock();
        *state = BankState::Failed(BankError::LoadFailed(MiddlewareError::Internal));
        self.bootstrap.changed.notify_all();
    }
}

impl fmt::Debug for BankBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BankBootstrap")
            .field("source", &self.source.to_string())
            .field("state", &self.state.lock().to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::middleware::simulated::{SimulatedMiddleware, SimulatorOptions};
    use crate::testutil::TEST_BANK;

    fn bootstrap(data: Option<&str>) -> BankBootstrap {
        BankBootstrap::new(
            Box::new(MemoryBank::new(
                "test.bank",
                data.map(|data| data.as_bytes().to_vec()),
            )),
            vec!["{2e2adb70-14df-4219-bb0d-b5c6ffd8fd4f}".to_string()],
        )
    }

    #[test]
    fn test_loads_once() {
        let simulator = SimulatedMiddleware::new(SimulatorOptions::default());
        let bootstrap = bootstrap(Some(TEST_BANK));
        assert!(!bootstrap.is_loaded());

        let first = bootstrap.ensure_loaded(&simulator).unwrap();
        let second = bootstrap.ensure_loaded(&simulator).unwrap();

        assert_eq!(first, second);
        assert!(bootstrap.is_loaded());
        assert_eq!(simulator.bank_loads(), 1);
    }

    #[test]
    fn test_concurrent_first_calls_load_once() {
        let simulator = Arc::new(SimulatedMiddleware::new(SimulatorOptions {
            bank_load_delay: Duration::from_millis(50),
            ..Default::default()
        }));
        let bootstrap = Arc::new(bootstrap(Some(TEST_BANK)));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let simulator = simulator.clone();
                let bootstrap = bootstrap.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    bootstrap.ensure_loaded(simulator.as_ref())
                })
            })
            .collect();

        let banks: Vec<BankHandle> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert_eq!(simulator.bank_loads(), 1);
        assert!(banks.iter().all(|bank| *bank == banks[0]));
    }

    #[test]
    fn test_missing_stream_disables_playback() {
        let simulator = SimulatedMiddleware::new(SimulatorOptions::default());
        let bootstrap = bootstrap(None);

        assert_eq!(
            bootstrap.ensure_loaded(&simulator),
            Err(BankError::MissingResourceStream("test.bank".to_string()))
        );
        assert!(bootstrap.is_failed());
        assert!(matches!(
            bootstrap.ensure_loaded(&simulator),
            Err(BankError::Unavailable(cause)) if matches!(*cause, BankError::MissingResourceStream(_))
        ));
        assert_eq!(simulator.bank_loads(), 0);
    }

    #[test]
    fn test_load_failure_is_not_retried() {
        let simulator = SimulatedMiddleware::new(SimulatorOptions::default());
        simulator.fail_next_bank_load(MiddlewareError::Memory);
        let bootstrap = bootstrap(Some(TEST_BANK));

        assert_eq!(
            bootstrap.ensure_loaded(&simulator),
            Err(BankError::LoadFailed(MiddlewareError::Memory))
        );
        // The fault only applied once, but the bootstrap never tries again.
        assert!(matches!(
            bootstrap.ensure_loaded(&simulator),
            Err(BankError::Unavailable(_))
        ));
        assert_eq!(simulator.bank_loads(), 1);
    }

    struct PanickingBank;

    impl fmt::Display for PanickingBank {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "panicking.bank")
        }
    }

    impl BankSource for PanickingBank {
        fn read(&self) -> Result<Vec<u8>, BankError> {
            panic!("bank source exploded");
        }
    }

    #[test]
    fn test_panicking_source_disables_playback() {
        let simulator = Arc::new(SimulatedMiddleware::new(SimulatorOptions::default()));
        let bootstrap = Arc::new(BankBootstrap::new(Box::new(PanickingBank), Vec::new()));

        let first = {
            let simulator = simulator.clone();
            let bootstrap = bootstrap.clone();
            thread::spawn(move || bootstrap.ensure_loaded(simulator.as_ref()))
        };
        assert!(first.join().is_err());
        assert!(bootstrap.is_failed());

        // A later caller must see the failure rather than wait on the abandoned load.
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let simulator = simulator.clone();
            let bootstrap = bootstrap.clone();
            thread::spawn(move || tx.send(bootstrap.ensure_loaded(simulator.as_ref())));
        }
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            second,
            Err(BankError::Unavailable(Box::new(BankError::LoadFailed(
                MiddlewareError::Internal
            ))))
        );
        assert_eq!(simulator.bank_loads(), 0);
    }

    #[test]
    fn test_unparseable_bank() {
        let simulator = SimulatedMiddleware::new(SimulatorOptions::default());
        let bootstrap = bootstrap(Some("- not\n- a bank\n"));

        assert_eq!(
            bootstrap.ensure_loaded(&simulator),
            Err(BankError::LoadFailed(MiddlewareError::FileBad))
        );
    }

    #[test]
    fn test_missing_expected_event_still_loads() {
        let simulator = SimulatedMiddleware::new(SimulatorOptions::default());
        let bootstrap = BankBootstrap::new(
            Box::new(MemoryBank::new(
                "test.bank",
                Some(TEST_BANK.as_bytes().to_vec()),
            )),
            vec!["{00000000-0000-0000-0000-000000000000}".to_string()],
        );

        assert!(bootstrap.ensure_loaded(&simulator).is_ok());
    }
}

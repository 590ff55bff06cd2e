use crate::core::{Counter, CounterId, Result};
use crate::facade::Store;
use crate::storage::DurabilityMode;
use crate::worker::Discipline;
use std::path::PathBuf;
use std::time::Duration;

/// One worker to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub name: String,
    /// Sleep inside the transaction
    pub delay: Duration,
}

impl WorkerSpec {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

/// Scenario configuration
///
/// Similar in spirit to a connection string: sensible defaults plus a
/// builder for everything a run can vary.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub discipline: Discipline,

    /// Counter the workers contend on
    pub counter_id: CounterId,

    /// Value written by the reset at the start of the run
    pub initial_value: i64,

    /// Version written by the reset (optimistic runs only)
    pub initial_version: u64,

    pub workers: Vec<WorkerSpec>,

    /// Make optimistic workers wait for each other after their read
    pub read_rendezvous: bool,
}

impl HarnessConfig {
    pub const PESSIMISTIC_COUNTER: CounterId = CounterId(1);
    pub const OPTIMISTIC_COUNTER: CounterId = CounterId(2);

    /// Two workers, `t1` slow and `t2` immediate
    pub fn pessimistic() -> Self {
        Self {
            discipline: Discipline::Pessimistic,
            counter_id: Self::PESSIMISTIC_COUNTER,
            initial_value: Counter::INITIAL_VALUE,
            initial_version: Counter::INITIAL_VERSION,
            workers: vec![
                WorkerSpec::new("t1", Duration::from_millis(200)),
                WorkerSpec::new("t2", Duration::ZERO),
            ],
            read_rendezvous: false,
        }
    }

    /// Two workers that read the same version; `t1` lingers before writing
    pub fn optimistic() -> Self {
        Self {
            discipline: Discipline::Optimistic,
            counter_id: Self::OPTIMISTIC_COUNTER,
            initial_value: Counter::INITIAL_VALUE,
            initial_version: Counter::INITIAL_VERSION,
            workers: vec![
                WorkerSpec::new("t1", Duration::from_millis(500)),
                WorkerSpec::new("t2", Duration::ZERO),
            ],
            read_rendezvous: true,
        }
    }

    pub fn for_discipline(discipline: Discipline) -> Self {
        match discipline {
            Discipline::Pessimistic => Self::pessimistic(),
            Discipline::Optimistic => Self::optimistic(),
        }
    }

    /// Set the counter id
    pub fn counter_id(mut self, id: CounterId) -> Self {
        self.counter_id = id;
        self
    }

    /// Set the initial value
    pub fn initial_value(mut self, value: i64) -> Self {
        self.initial_value = value;
        self
    }

    /// Set the initial version
    pub fn initial_version(mut self, version: u64) -> Self {
        self.initial_version = version;
        self
    }

    /// Replace the worker list
    pub fn workers(mut self, workers: Vec<WorkerSpec>) -> Self {
        self.workers = workers;
        self
    }

    /// Override the delays of the first two workers
    pub fn delays(mut self, first: Duration, second: Duration) -> Self {
        if let Some(w) = self.workers.get_mut(0) {
            w.delay = first;
        }
        if let Some(w) = self.workers.get_mut(1) {
            w.delay = second;
        }
        self
    }

    pub fn read_rendezvous(mut self, enabled: bool) -> Self {
        self.read_rendezvous = enabled;
        self
    }

    /// Counter as written by the reset that starts a run
    pub fn initial_counter(&self) -> Counter {
        match self.discipline {
            Discipline::Pessimistic => Counter::plain(self.counter_id, self.initial_value),
            Discipline::Optimistic => {
                Counter::versioned(self.counter_id, self.initial_value, self.initial_version)
            }
        }
    }
}

/// Where the store keeps its state
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub journal: Option<PathBuf>,
    pub durability: DurabilityMode,
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal = Some(path.into());
        self
    }

    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    pub async fn open(&self) -> Result<Store> {
        match &self.journal {
            Some(path) => Store::open(path, self.durability).await,
            None => Ok(Store::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CounterRow;

    #[test]
    fn test_defaults_mirror_demo() {
        let config = HarnessConfig::optimistic();
        assert_eq!(config.workers.len(), 2);
        assert_eq!(config.workers[0].name, "t1");
        assert!(config.workers[0].delay > config.workers[1].delay);
        assert!(config.read_rendezvous);
        assert_eq!(config.initial_counter().row, CounterRow::versioned(10, 1));
    }

    #[test]
    fn test_builder_overrides() {
        let config = HarnessConfig::pessimistic()
            .initial_value(0)
            .counter_id(CounterId(9))
            .delays(Duration::ZERO, Duration::from_millis(5));

        assert_eq!(config.initial_counter(), Counter::plain(CounterId(9), 0));
        assert_eq!(config.workers[1].delay, Duration::from_millis(5));
    }
}

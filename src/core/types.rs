use serde::{Deserialize, Serialize};

/// Stable identifier of a counter row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterId(pub u64);

impl CounterId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CounterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stored state of a counter.
///
/// `version` is `None` for plain counters (pessimistic demo) and `Some` for
/// versioned counters, where it advances by exactly one on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRow {
    pub value: i64,
    pub version: Option<u64>,
}

impl CounterRow {
    pub fn plain(value: i64) -> Self {
        Self { value, version: None }
    }

    pub fn versioned(value: i64, version: u64) -> Self {
        Self {
            value,
            version: Some(version),
        }
    }

    /// The row after one decrement; `None` when it would go below zero.
    pub fn decremented(&self) -> Option<Self> {
        if self.value <= 0 {
            return None;
        }
        Some(Self {
            value: self.value - 1,
            version: self.version.map(|v| v + 1),
        })
    }
}

/// A counter as created during setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub id: CounterId,
    pub row: CounterRow,
}

impl Counter {
    pub const INITIAL_VALUE: i64 = 10;
    pub const INITIAL_VERSION: u64 = 1;

    pub fn plain(id: CounterId, value: i64) -> Self {
        Self {
            id,
            row: CounterRow::plain(value),
        }
    }

    pub fn versioned(id: CounterId, value: i64, version: u64) -> Self {
        Self {
            id,
            row: CounterRow::versioned(value, version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrement_bumps_version() {
        let row = CounterRow::versioned(10, 1);
        assert_eq!(row.decremented(), Some(CounterRow::versioned(9, 2)));
    }

    #[test]
    fn test_decrement_plain_keeps_no_version() {
        let row = CounterRow::plain(1);
        assert_eq!(row.decremented(), Some(CounterRow::plain(0)));
    }

    #[test]
    fn test_decrement_floor() {
        assert_eq!(CounterRow::plain(0).decremented(), None);
        assert_eq!(CounterRow::versioned(-3, 4).decremented(), None);
    }
}

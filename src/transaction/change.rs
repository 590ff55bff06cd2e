// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// A transaction buffers its writes as Changes. They become visible to other
// transactions only when the store installs them on COMMIT; ROLLBACK simply
// discards them.
//
// ============================================================================

use crate::core::{CounterId, CounterRow};
use serde::{Deserialize, Serialize};

/// A single buffered write against one counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// Decrement by one; `before` is the row the write was computed against
    Decrement {
        id: CounterId,
        before: CounterRow,
        after: CounterRow,
    },
}

impl Change {
    /// Get the counter affected by this change
    pub fn counter_id(&self) -> CounterId {
        match self {
            Change::Decrement { id, .. } => *id,
        }
    }

    /// Row state once this change is applied
    pub fn after(&self) -> CounterRow {
        match self {
            Change::Decrement { after, .. } => *after,
        }
    }

    pub fn before(&self) -> CounterRow {
        match self {
            Change::Decrement { before, .. } => *before,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_accessors() {
        let change = Change::Decrement {
            id: CounterId(1),
            before: CounterRow::versioned(10, 1),
            after: CounterRow::versioned(9, 2),
        };
        assert_eq!(change.counter_id(), CounterId(1));
        assert_eq!(change.before().value, 10);
        assert_eq!(change.after(), CounterRow::versioned(9, 2));
    }
}

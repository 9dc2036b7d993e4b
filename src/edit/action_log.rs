use crate::commons::{ConsoleResult, Error};

use super::ActionRecord;

//------------ ActionLog -----------------------------------------------------

/// An ordered, append-only list of staged records.
///
/// Records are kept in insertion order until the log is drained. Draining
/// hands the records to the caller and leaves the log empty, so that a
/// check-then-drain sequence can never submit the same records twice.
#[derive(Clone, Debug, Default)]
pub struct ActionLog {
    records: Vec<ActionRecord>,
    closed: bool,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record. Fails only if the log was closed.
    pub fn append(&mut self, record: ActionRecord) -> ConsoleResult<()> {
        if self.closed {
            return Err(Error::LogClosed);
        }
        self.records.push(record);
        Ok(())
    }

    /// Appends all records, or none of them if the log is closed.
    pub fn extend(&mut self, records: Vec<ActionRecord>) -> ConsoleResult<()> {
        if self.closed {
            return Err(Error::LogClosed);
        }
        self.records.extend(records);
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    /// Empties the log and returns what it held. A second call returns an
    /// empty sequence.
    pub fn drain(&mut self) -> Vec<ActionRecord> {
        std::mem::take(&mut self.records)
    }

    /// Drops all pending records, returning how many there were.
    pub fn discard(&mut self) -> usize {
        self.drain().len()
    }

    /// Refuses any further appends. Pending records stay until drained.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::Operation;
    use crate::model::ObjectId;

    fn record(name: &str) -> ActionRecord {
        ActionRecord::new(ObjectId::host(name), Operation::Delete)
    }

    #[test]
    fn drain_is_idempotent() {
        let mut log = ActionLog::new();
        log.append(record("a")).unwrap();
        log.append(record("b")).unwrap();
        assert!(log.has_pending());

        let first = log.drain();
        assert_eq!(vec![record("a"), record("b")], first);
        assert!(!log.has_pending());

        let second = log.drain();
        assert!(second.is_empty());
    }

    #[test]
    fn discard_empties_the_log() {
        let mut log = ActionLog::new();
        log.extend(vec![record("a"), record("b"), record("c")]).unwrap();
        assert_eq!(3, log.discard());
        assert_eq!(0, log.discard());
        assert!(log.is_empty());
    }

    #[test]
    fn closed_log_rejects_appends() {
        let mut log = ActionLog::new();
        log.append(record("a")).unwrap();
        log.close();

        assert!(matches!(log.append(record("b")), Err(Error::LogClosed)));
        assert!(matches!(log.extend(vec![record("c")]), Err(Error::LogClosed)));
        assert_eq!(vec![record("a")], log.drain());
    }
}

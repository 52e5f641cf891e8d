//! Transactions, undo history and change notification
//!
//! A [`Transaction`] buffers its write set in memory; nothing reaches the
//! store until the backend commits it. A [`BatchTransaction`] writes straight
//! through and defers reference indexing to a single rebuild at commit.
//!
//! Committed non-batch transactions leave an [`UndoRecord`] holding old and
//! new payloads for every touched record, which is enough to replay the
//! transaction in either direction.

use crate::handle::Handle;
use crate::metadata::MetaValue;
use crate::model::Payload;
use crate::object::ObjectType;
use crossbeam::channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

fn next_txn_id() -> u64 {
    NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Update,
    Delete,
}

impl Action {
    /// The action that reverses this one
    pub fn inverse(self) -> Action {
        match self {
            Action::Add => Action::Delete,
            Action::Update => Action::Update,
            Action::Delete => Action::Add,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One buffered write
#[derive(Debug, Clone, PartialEq)]
pub struct TxnOp {
    pub obj_type: ObjectType,
    pub handle: Handle,
    pub action: Action,
    /// New payload; `None` for deletes
    pub payload: Option<Payload>,
}

/// A write after collapsing every op on the same record
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlannedWrite {
    pub obj_type: ObjectType,
    pub handle: Handle,
    pub action: Action,
    pub payload: Option<Payload>,
}

/// A buffered, all-or-nothing unit of work
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    description: String,
    ops: Vec<TxnOp>,
    metadata: Vec<(String, MetaValue)>,
}

impl Transaction {
    pub(crate) fn new(description: impl Into<String>) -> Self {
        Self {
            id: next_txn_id(),
            description: description.into(),
            ops: Vec::new(),
            metadata: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn ops(&self) -> &[TxnOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len() + self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn push(&mut self, action: Action, payload: Payload) {
        self.ops.push(TxnOp {
            obj_type: payload.object_type(),
            handle: payload.handle().clone(),
            action,
            payload: Some(payload),
        });
    }

    pub(crate) fn push_delete(&mut self, obj_type: ObjectType, handle: Handle) {
        self.ops.push(TxnOp {
            obj_type,
            handle,
            action: Action::Delete,
            payload: None,
        });
    }

    pub(crate) fn push_metadata(&mut self, key: &str, value: MetaValue) {
        self.metadata.push((key.to_string(), value));
    }

    /// Whether any buffered op touches the record
    pub fn touches(&self, obj_type: ObjectType, handle: &Handle) -> bool {
        self.ops.iter().any(|op| op.obj_type == obj_type && &op.handle == handle)
    }

    pub(crate) fn metadata(&self) -> &[(String, MetaValue)] {
        &self.metadata
    }

    /// Collapse the write set into one write per record
    ///
    /// The last payload written wins. A record that was added and then
    /// updated is still an add. Any delete of a record wins over its adds
    /// and updates.
    pub(crate) fn plan(&self) -> Vec<PlannedWrite> {
        let mut planned: BTreeMap<(ObjectType, Handle), PlannedWrite> = BTreeMap::new();
        for op in &self.ops {
            let key = (op.obj_type, op.handle.clone());
            match planned.get_mut(&key) {
                Some(existing) if existing.action == Action::Delete => {}
                Some(existing) => {
                    if op.action == Action::Delete {
                        existing.action = Action::Delete;
                        existing.payload = None;
                    } else {
                        if op.action == Action::Add {
                            existing.action = Action::Add;
                        }
                        existing.payload = op.payload.clone();
                    }
                }
                None => {
                    planned.insert(
                        key,
                        PlannedWrite {
                            obj_type: op.obj_type,
                            handle: op.handle.clone(),
                            action: op.action,
                            payload: op.payload.clone(),
                        },
                    );
                }
            }
        }
        planned.into_values().collect()
    }
}

/// A write-through transaction for bulk imports
///
/// Aborting a batch does not roll back writes that were already applied.
#[derive(Debug)]
pub struct BatchTransaction {
    id: u64,
    description: String,
    written: BTreeMap<ObjectType, usize>,
}

impl BatchTransaction {
    pub(crate) fn new(description: impl Into<String>) -> Self {
        Self {
            id: next_txn_id(),
            description: description.into(),
            written: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn record_write(&mut self, obj_type: ObjectType) {
        *self.written.entry(obj_type).or_default() += 1;
    }

    /// Number of writes applied so far
    pub fn len(&self) -> usize {
        self.written.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }

    pub fn written(&self) -> &BTreeMap<ObjectType, usize> {
        &self.written
    }
}

/// The transaction a write goes through
#[derive(Debug)]
pub enum TxnRef<'a> {
    Buffered(&'a mut Transaction),
    Batch(&'a mut BatchTransaction),
}

impl TxnRef<'_> {
    pub fn id(&self) -> u64 {
        match self {
            TxnRef::Buffered(txn) => txn.id(),
            TxnRef::Batch(txn) => txn.id(),
        }
    }
}

impl<'a> From<&'a mut Transaction> for TxnRef<'a> {
    fn from(txn: &'a mut Transaction) -> Self {
        TxnRef::Buffered(txn)
    }
}

impl<'a> From<&'a mut BatchTransaction> for TxnRef<'a> {
    fn from(txn: &'a mut BatchTransaction) -> Self {
        TxnRef::Batch(txn)
    }
}

/// Before and after image of one record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordChange {
    pub obj_type: ObjectType,
    pub handle: Handle,
    pub action: Action,
    pub old: Option<Payload>,
    pub new: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataChange {
    pub key: String,
    pub old: Option<MetaValue>,
    pub new: MetaValue,
}

/// Everything needed to replay a committed transaction in either direction
#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub description: String,
    pub timestamp: i64,
    pub changes: Vec<RecordChange>,
    pub metadata: Vec<MetadataChange>,
}

/// Bounded undo stack plus redo stack
#[derive(Debug)]
pub struct UndoHistory {
    undo: VecDeque<UndoRecord>,
    redo: Vec<UndoRecord>,
    limit: usize,
}

impl UndoHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit,
        }
    }

    /// Record a fresh commit; invalidates anything that could be redone
    pub fn push(&mut self, record: UndoRecord) {
        self.redo.clear();
        self.push_undo(record);
    }

    fn push_undo(&mut self, record: UndoRecord) {
        if self.limit == 0 {
            return;
        }
        self.undo.push_back(record);
        while self.undo.len() > self.limit {
            self.undo.pop_front();
        }
    }

    pub(crate) fn take_undo(&mut self) -> Option<UndoRecord> {
        self.undo.pop_back()
    }

    pub(crate) fn take_redo(&mut self) -> Option<UndoRecord> {
        self.redo.pop()
    }

    pub(crate) fn undone(&mut self, record: UndoRecord) {
        self.redo.push(record);
    }

    pub(crate) fn redone(&mut self, record: UndoRecord) {
        self.push_undo(record);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Description of the transaction `undo` would revert
    pub fn undo_description(&self) -> Option<&str> {
        self.undo.back().map(|r| r.description.as_str())
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

/// Change notification sent to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Records of one type were added, updated or deleted
    Changed {
        obj_type: ObjectType,
        action: Action,
        handles: Vec<Handle>,
    },
    /// Metadata keys were written
    Metadata(Vec<String>),
    /// A batch or reindex touched too much to describe; refresh everything
    Rebuild,
}

impl Signal {
    /// One `Changed` signal per `(type, action)`, in type then action order
    pub(crate) fn from_changes<'a>(changes: impl IntoIterator<Item = (ObjectType, Action, &'a Handle)>) -> Vec<Signal> {
        let mut grouped: BTreeMap<(ObjectType, Action), Vec<Handle>> = BTreeMap::new();
        for (obj_type, action, handle) in changes {
            grouped.entry((obj_type, action)).or_default().push(handle.clone());
        }
        grouped
            .into_iter()
            .map(|((obj_type, action), handles)| Signal::Changed { obj_type, action, handles })
            .collect()
    }
}

/// Fan-out of signals to any number of channel subscribers
#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: Vec<Sender<Signal>>,
}

impl Notifier {
    pub fn subscribe(&mut self) -> Receiver<Signal> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver to every live subscriber, dropping those whose receiver is gone
    pub fn emit(&mut self, signal: Signal) {
        self.subscribers.retain(|tx| tx.send(signal.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Note, PrimaryObject};

    fn note(handle: &str, text: &str) -> Payload {
        let mut note = Note::new("N1", text);
        note.handle = Handle::new(handle);
        note.into_payload()
    }

    #[test]
    fn test_plan_collapses_ops() {
        let mut txn = Transaction::new("edit");
        txn.push(Action::Add, note("A", "one"));
        txn.push(Action::Update, note("A", "two"));
        txn.push(Action::Update, note("B", "x"));
        txn.push_delete(ObjectType::Note, Handle::new("B"));
        txn.push(Action::Update, note("B", "y"));

        let plan = txn.plan();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].action, Action::Add);
        assert_eq!(plan[0].payload, Some(note("A", "two")));
        assert_eq!(plan[1].action, Action::Delete);
        assert_eq!(plan[1].payload, None);
    }

    #[test]
    fn test_undo_history_limit_and_redo_invalidation() {
        let record = |d: &str| UndoRecord {
            description: d.to_string(),
            timestamp: 0,
            changes: Vec::new(),
            metadata: Vec::new(),
        };
        let mut history = UndoHistory::new(2);
        history.push(record("a"));
        history.push(record("b"));
        history.push(record("c"));

        let c = history.take_undo().unwrap();
        assert_eq!(c.description, "c");
        history.undone(c);
        assert!(history.can_redo());
        assert_eq!(history.undo_description(), Some("b"));

        history.push(record("d"));
        assert!(!history.can_redo());
        assert_eq!(history.take_undo().unwrap().description, "d");
        assert_eq!(history.take_undo().unwrap().description, "b");
        assert!(!history.can_undo());
    }

    #[test]
    fn test_notifier_prunes_disconnected() {
        let mut notifier = Notifier::default();
        let rx = notifier.subscribe();
        let dropped = notifier.subscribe();
        drop(dropped);

        notifier.emit(Signal::Rebuild);
        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(rx.try_recv().unwrap(), Signal::Rebuild);
    }

    #[test]
    fn test_signals_grouped_by_type_and_action() {
        let a = Handle::new("A");
        let b = Handle::new("B");
        let signals = Signal::from_changes([
            (ObjectType::Note, Action::Update, &a),
            (ObjectType::Person, Action::Add, &b),
            (ObjectType::Note, Action::Update, &b),
        ]);
        assert_eq!(signals.len(), 2);
        assert_eq!(
            signals[0],
            Signal::Changed {
                obj_type: ObjectType::Person,
                action: Action::Add,
                handles: vec![b.clone()],
            }
        );
    }
}

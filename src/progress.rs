use crate::object::ObjectType;

/// Long-running phases that report progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressPhase {
    Records(ObjectType),
    Metadata,
    Aggregates,
    References,
    Backfill(ObjectType),
}

impl std::fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressPhase::Records(ty) => write!(f, "Copying {} records", ty),
            ProgressPhase::Metadata => write!(f, "Copying metadata"),
            ProgressPhase::Aggregates => write!(f, "Rebuilding aggregates"),
            ProgressPhase::References => write!(f, "Rebuilding references"),
            ProgressPhase::Backfill(ty) => write!(f, "Backfilling {} records", ty),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ProgressMessage {
    Started { phase: ProgressPhase, total: usize },
    Progress { phase: ProgressPhase, current: usize },
    Finished { phase: ProgressPhase },
    Warning(String),
}

pub type ProgressSender = crossbeam::channel::Sender<ProgressMessage>;

/// Send a progress message if anyone is listening. A gone receiver is not an error.
pub(crate) fn report(progress: Option<&ProgressSender>, msg: ProgressMessage) {
    if let Some(tx) = progress {
        let _ = tx.send(msg);
    }
}

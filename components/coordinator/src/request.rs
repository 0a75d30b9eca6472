use config::ParallelReplicasSettings;
use model::{
    request::{RegisterRequest, WorkRequest},
    response::{Announcement, WorkResponse},
    CoordinationError, PartMarks,
};
use tokio::sync::oneshot;

use crate::coordinator::{Phase, QueryOutcome};

#[derive(Debug)]
pub(crate) enum Request {
    Initialize {
        parts: Vec<PartMarks>,
        settings: ParallelReplicasSettings,
        replica_count: u64,
        tx: oneshot::Sender<Result<Announcement, CoordinationError>>,
    },
    Register {
        request: RegisterRequest,
        tx: oneshot::Sender<Result<Announcement, CoordinationError>>,
    },
    Work {
        request: WorkRequest,
        tx: oneshot::Sender<Result<WorkResponse, CoordinationError>>,
    },
    Phase {
        tx: oneshot::Sender<Phase>,
    },
    WaitFinished {
        tx: oneshot::Sender<Result<QueryOutcome, CoordinationError>>,
    },
}

//! Job Manager control plane (spec §4.E): `REFRESH_EXPERT_SCHEDULES{expert_id?}`
//! and `SHUTDOWN`, delivered over an FIFO channel so submitters never block
//! on the scheduler lock (spec §5 "the UI never blocks on scheduler lock").

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum ControlCommand {
    RefreshExpertSchedules { expert_id: Option<i64> },
    Shutdown,
}

/// Handle submitters use to enqueue control-plane commands. Cheap to clone;
/// every clone shares the same consumer.
#[derive(Clone)]
pub struct ControlPlane {
    tx: mpsc::Sender<ControlCommand>,
}

impl ControlPlane {
    pub(super) fn new(tx: mpsc::Sender<ControlCommand>) -> Self {
        Self { tx }
    }

    pub async fn refresh_expert_schedules(&self, expert_id: Option<i64>) {
        let _ = self.tx.send(ControlCommand::RefreshExpertSchedules { expert_id }).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(ControlCommand::Shutdown).await;
    }
}

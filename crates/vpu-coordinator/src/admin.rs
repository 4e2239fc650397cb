//! Privileged control requests.
//!
//! These are the operations a device-control interface exposes next to the per-instance
//! command path: recovery (`ForceCloseAll`, `RestoreClocks`) and instance bookkeeping.

use serde::{Deserialize, Serialize};

use crate::{Coordinator, CoordinatorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "slot", rename_all = "snake_case")]
pub enum AdminCommand {
    ForceCloseAll,
    RestoreClocks,
    QuerySlotClosed(usize),
    GetInstanceIndex,
    ClearInstanceIndex(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminReply {
    ForceClosed { closed: usize },
    ClocksRestored,
    SlotClosed(bool),
    /// `None` when every slot is open or claimed.
    InstanceIndex(Option<usize>),
    InstanceIndexCleared,
}

impl Coordinator {
    pub fn admin(&self, command: AdminCommand) -> Result<AdminReply, CoordinatorError> {
        tracing::debug!(?command, "admin request");
        match command {
            AdminCommand::ForceCloseAll => Ok(AdminReply::ForceClosed {
                closed: self.force_close_all(),
            }),
            AdminCommand::RestoreClocks => {
                self.restore_clocks()?;
                Ok(AdminReply::ClocksRestored)
            }
            AdminCommand::QuerySlotClosed(index) => {
                self.slot_closed(index).map(AdminReply::SlotClosed)
            }
            AdminCommand::GetInstanceIndex => {
                Ok(AdminReply::InstanceIndex(self.acquire_instance_index()))
            }
            AdminCommand::ClearInstanceIndex(index) => {
                self.release_instance_index(index)?;
                Ok(AdminReply::InstanceIndexCleared)
            }
        }
    }
}

// SPDX-License-Identifier: GPL-3.0-only

use csi_contracts::{BackendError, CsiError, DeviceHandle};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TeardownError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Remaining devices all depend on each other; nothing can be removed.
    #[error("no removable device left below {target}; stuck on {remaining:?}")]
    Cycle {
        target: DeviceHandle,
        remaining: Vec<DeviceHandle>,
    },
}

impl From<TeardownError> for CsiError {
    fn from(err: TeardownError) -> Self {
        match err {
            TeardownError::Backend(err) => err.into(),
            cycle @ TeardownError::Cycle { .. } => CsiError::aborted(cycle.to_string()),
        }
    }
}

// SPDX-License-Identifier: GPL-3.0-only

pub mod errors;
pub mod message;

pub use errors::{BackendError, CsiError, CsiErrorKind};
pub use message::{CsiRequest, CsiResponse, RequestEnvelope};

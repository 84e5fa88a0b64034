//! Shared library for the mrq cluster.
//!
//! Jobs are split by the manager into map and reduce tasks, carried to
//! workers over a durable message queue, and coordinated through a
//! file-backed state store whose on-disk layout both sides agree on. This
//! crate holds everything the manager, the workers and the control CLI
//! share: the protobuf data model, the payload stdio codec, the error
//! taxonomy, layered settings and the state-store path conventions.

pub mod codec;
pub mod error;
pub mod layout;
pub mod settings;
pub mod utils;

pub use error::{Error, Result};

/////////////////////////////////////////////////////////////////////////////
// Generated protobuf types
/////////////////////////////////////////////////////////////////////////////

pub mod pb {
    pub mod datatypes {
        tonic::include_proto!("datatypes");
    }

    pub mod scheduler {
        tonic::include_proto!("scheduler");
    }
}

use pb::datatypes::TaskKind;

impl TaskKind {
    /// Human-readable phase name, used in logs.
    pub fn phase_name(self) -> &'static str {
        match self {
            TaskKind::Map => "map",
            TaskKind::Reduce => "reduce",
        }
    }
}

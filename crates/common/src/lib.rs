//! Shared types and ambient plumbing used by every crate in the pipeline:
//! identifiers, the position/stats/skill data model, the error-kind
//! taxonomy, layered configuration, and tracing initialization.

pub mod config;
pub mod error;
pub mod ids;
pub mod position;
pub mod skill;
pub mod stats;
pub mod telemetry;

pub use error::{ErrorKind, GatewayError};
pub use ids::{EntityId, NodeId, PlayerId, SessionId};
pub use position::Position;
pub use skill::{SkillId, SkillTable};
pub use stats::Stats;

#![forbid(unsafe_code)]

pub mod audio;
pub mod common;
pub mod device;
pub mod document;
pub mod hall_ticket;
pub mod notice;
pub mod phase;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, Validate};

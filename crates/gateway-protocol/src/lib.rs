//! Shared data types for the protocol gateway.
//!
//! This crate has no I/O and no async — it is the DTO layer every other
//! gateway crate builds on: the envelope that flows through the pipeline,
//! the dynamic value type used for parsed/transformed payloads, and the
//! configuration records (`FrameSchema`, `RoutingRule`, `TargetSystem`,
//! `EncryptionKey`) that drive routing and forwarding.

pub mod encryption_key;
pub mod envelope;
pub mod frame_schema;
pub mod message_log;
pub mod protocol;
pub mod routing_rule;
pub mod target_system;
pub mod value;

pub use encryption_key::EncryptionKey;
pub use envelope::Envelope;
pub use frame_schema::{ChecksumSpec, ChecksumType, DataType, FieldSpec, FrameSchema, FrameType};
pub use message_log::{MessageLog, ProcessingStatus};
pub use protocol::Protocol;
pub use routing_rule::{Condition, LogicalOperator, Operator, RoutingRule, SourceConfig};
pub use target_system::{AuthConfig, AuthType, EncryptionRef, ForwarderConfig, TargetSystem, TransformConfig};
pub use value::GatewayValue;

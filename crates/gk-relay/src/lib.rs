//! Request-level policy of the relay: address normalization and the
//! conversion pipeline.

pub mod address;
pub mod convert;

pub use address::FORWARDING_PREFIX;
pub use address::TargetAddress;
pub use address::collapse_slashes;
pub use address::forwarding_path;
pub use address::host_port_key;
pub use convert::ConvertOutcome;
pub use convert::Relay;

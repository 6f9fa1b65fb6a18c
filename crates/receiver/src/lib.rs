//! Receiving side of a multi-connection file transfer.
//!
//! Each accepted connection runs a [`Session`]. Sessions carrying the same
//! file name share one entry in the [`FileRegistry`], which writes blocks
//! in place and verifies the content digest once the last session leaves.

pub mod error;
pub mod finalize;
pub mod registry;
pub mod server;
pub mod session;
pub mod sink;
pub mod validation;

pub use error::ReceiverError;
pub use finalize::{FinalizeOutcome, FinalizeReport, file_digest};
pub use registry::{FileRegistry, SessionId};
pub use server::{ServerConfig, TransferServer};
pub use session::{Session, SessionReport, SessionState};
pub use sink::OutputSink;
pub use validation::validate_file_name;

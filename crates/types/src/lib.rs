//! Core records of the uptime service.
//!
//! A block producer proves it is alive by submitting a batch of artifacts:
//! a JSON document describing the submission and, optionally, the raw block it produced.
//! The batch travels through the service as an [`ObjectsToSave`] and is turned into a
//! canonical [`Submission`] by the [`codec`] before it reaches a storage backend.

mod objects;
mod submission;

pub mod codec;
pub mod path;
pub mod serialization;

pub use codec::{assemble_batch, parse_block, parse_submission, CodecError};
pub use objects::ObjectsToSave;
pub use path::{SubmissionPath, BLOCKS_PREFIX, SUBMISSIONS_PREFIX};
pub use submission::{Block, Submission};

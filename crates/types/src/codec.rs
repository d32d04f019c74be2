//! Turning a batch of raw artifacts into a canonical [`Submission`].

use std::path::Path;

use bytes::Bytes;
use tracing::warn;

use crate::path::SubmissionPath;
use crate::{Block, ObjectsToSave, Submission, BLOCKS_PREFIX, SUBMISSIONS_PREFIX};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("Failed to parse submission time '{value}': {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },

    #[error("Failed to decode submission body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No valid submission in batch")]
    NoValidSubmission,
}

/// Parses the JSON body of a submission artifact stored at `path`.
///
/// The submission date and time come from the path and override anything
/// found in the body.
pub fn parse_submission(data: &[u8], path: &str) -> Result<Submission, CodecError> {
    let parsed_path = SubmissionPath::parse(path)?;

    let mut submission: Submission = serde_json::from_slice(data)?;
    submission.submitted_at_date = parsed_path.submitted_at_date;
    submission.submitted_at = parsed_path.submitted_at;

    Ok(submission)
}

/// Wraps the raw bytes of a block artifact. The hash is the file name without its extension.
pub fn parse_block(data: Bytes, path: &str) -> Block {
    let block_hash = Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    Block {
        block_hash,
        raw_block: data,
    }
}

/// Folds every artifact of a batch into a single [`Submission`].
///
/// Submission entries are applied first, then block entries, each in path order.
/// A block entry sets the block hash and the raw block, overriding the hash
/// announced by the submission body. Entries that cannot be parsed and entries
/// under an unknown prefix are logged and skipped.
pub fn assemble_batch(objects: &ObjectsToSave) -> Result<Submission, CodecError> {
    let mut assembled = Submission::default();

    for (path, data) in objects.with_prefix(SUBMISSIONS_PREFIX) {
        let submission = match parse_submission(data, path) {
            Ok(submission) => submission,
            Err(e) => {
                warn!(%path, "Skipping unparseable submission: {e}");
                continue;
            }
        };

        // The raw block only ever comes from a block entry
        assembled = submission;
        assembled.raw_block = None;
    }

    for (path, data) in objects.with_prefix(BLOCKS_PREFIX) {
        let block = parse_block(data.clone(), path);
        assembled.block_hash = block.block_hash;
        assembled.raw_block = Some(block.raw_block);
    }

    for (path, _) in objects.iter() {
        if !path.starts_with(SUBMISSIONS_PREFIX) && !path.starts_with(BLOCKS_PREFIX) {
            warn!(%path, "Skipping artifact with unknown path prefix");
        }
    }

    if assembled.submitter.is_empty() {
        return Err(CodecError::NoValidSubmission);
    }

    Ok(assembled)
}

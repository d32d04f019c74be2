//! Artifact paths.
//!
//! ```text
//! submissions/<YYYY-MM-DD>/<YYYY-MM-DDTHH:MM:SSZ>-<submitter>.json
//! blocks/<block-hash>.dat
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::CodecError;

pub const SUBMISSIONS_PREFIX: &str = "submissions/";
pub const BLOCKS_PREFIX: &str = "blocks/";

/// Format of the timestamp embedded in a submission path
pub const SUBMITTED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format of the date directory of a submission path
pub const SUBMITTED_AT_DATE_FORMAT: &str = "%Y-%m-%d";

/// The parts of a submission artifact path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionPath {
    pub submitted_at_date: String,
    pub submitted_at: DateTime<Utc>,
    pub submitter: String,
}

impl SubmissionPath {
    /// Parses a path of the form `submissions/<date>/<timestamp>-<submitter>.json`.
    ///
    /// Only the first three segments are looked at. The submitter is split off
    /// the file name at the last hyphen.
    pub fn parse(path: &str) -> Result<Self, CodecError> {
        let parts = path.split('/').collect::<Vec<_>>();
        if parts.len() < 3 {
            return Err(CodecError::InvalidPath(path.to_string()));
        }

        let submitted_at_date = parts[1].to_string();
        let file_name = parts[2].strip_suffix(".json").unwrap_or(parts[2]);

        let Some((timestamp, submitter)) = file_name.rsplit_once('-') else {
            return Err(CodecError::InvalidPath(path.to_string()));
        };

        let submitted_at = NaiveDateTime::parse_from_str(timestamp, SUBMITTED_AT_FORMAT)
            .map_err(|source| CodecError::Timestamp {
                value: timestamp.to_string(),
                source,
            })?
            .and_utc();

        Ok(Self {
            submitted_at_date,
            submitted_at,
            submitter: submitter.to_string(),
        })
    }
}

/// Path under which a submission made at `submitted_at` by `submitter` is stored.
pub fn submission_path(submitted_at: DateTime<Utc>, submitter: &str) -> String {
    format!(
        "{SUBMISSIONS_PREFIX}{}/{}-{submitter}.json",
        submitted_at.format(SUBMITTED_AT_DATE_FORMAT),
        submitted_at.format(SUBMITTED_AT_FORMAT),
    )
}

/// Path under which the raw block with the given hash is stored.
pub fn block_path(block_hash: &str) -> String {
    format!("{BLOCKS_PREFIX}{block_hash}.dat")
}

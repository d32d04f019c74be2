use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serialization::serde_base64_opt;

/// One proof-of-life event sent by a block producer.
///
/// `submitted_at_date` and `submitted_at` are taken from the artifact path and are
/// authoritative; everything else comes from the JSON body of the artifact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Base58check-encoded public key of the submitter
    #[serde(default)]
    pub submitter: String,

    /// `YYYY-MM-DD`, exactly as found in the artifact path
    #[serde(skip)]
    pub submitted_at_date: String,

    /// Submission time, exactly as found in the artifact path
    #[serde(skip)]
    pub submitted_at: DateTime<Utc>,

    /// Time at which the node created the submission, informational only
    #[serde(default)]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub remote_addr: String,

    #[serde(default)]
    pub peer_id: String,

    #[serde(default)]
    pub block_hash: String,

    #[serde(
        default,
        with = "serde_base64_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub snark_work: Option<Bytes>,

    #[serde(
        default,
        with = "serde_base64_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub raw_block: Option<Bytes>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graphql_control_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_with_commit_sha: Option<String>,
}

impl Submission {
    /// Size of the raw block carried by this submission, zero if there is none.
    pub fn raw_block_len(&self) -> usize {
        self.raw_block.as_ref().map_or(0, |b| b.len())
    }

    /// The same submission without its raw block.
    pub fn without_raw_block(&self) -> Self {
        Self {
            raw_block: None,
            ..self.clone()
        }
    }
}

/// Raw block bytes, keyed by the block hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub block_hash: String,
    pub raw_block: Bytes,
}

use sha3::{Digest, Sha3_256};

use uptime_types::Submission;

/// Analytic grouping key of a submitter.
///
/// With IP disambiguation the key covers the public key, the source address and
/// the control port. Without it the source address is blanked, and the port is only
/// kept when the node reported one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: String,
    pub public_key: String,
    pub public_ip: String,
    pub graphql_port: Option<u16>,
}

impl Identity {
    pub fn of(submission: &Submission, ignore_ips: bool) -> Self {
        let public_ip = if ignore_ips {
            String::new()
        } else {
            submission.remote_addr.clone()
        };

        let port = submission.graphql_control_port.unwrap_or(0);

        if !ignore_ips || port != 0 {
            Self::full(&submission.submitter, public_ip, port)
        } else {
            Self::partial(&submission.submitter, public_ip)
        }
    }

    /// Identity keyed by public key, address and port.
    pub fn full(public_key: &str, public_ip: String, graphql_port: u16) -> Self {
        Self {
            id: digest(&format!("{public_key}-{public_ip}-{graphql_port}")),
            public_key: public_key.to_string(),
            public_ip,
            graphql_port: Some(graphql_port),
        }
    }

    /// Identity keyed by public key and address only.
    pub fn partial(public_key: &str, public_ip: String) -> Self {
        Self {
            id: digest(&format!("{public_key}-{public_ip}")),
            public_key: public_key.to_string(),
            public_ip,
            graphql_port: None,
        }
    }
}

fn digest(key: &str) -> String {
    hex::encode(Sha3_256::digest(key.as_bytes()))
}

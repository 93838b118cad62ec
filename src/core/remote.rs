//! Remote target parsing for `user@host[:port]` strings.

use std::fmt;
use std::str::FromStr;

use anyhow::{Error, Result, anyhow};

pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_PORT: &str = "22";

/// A parsed remote execution target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    /// Parsed but currently unused: the transport connects on the standard
    /// port. TODO: honor the parsed port once non-standard sshd setups matter.
    pub port: String,
}

impl FromStr for RemoteTarget {
    type Err = Error;

    fn from_str(remote: &str) -> Result<Self> {
        let (user, host_part) = match remote.split('@').collect::<Vec<_>>()[..] {
            [host] => (DEFAULT_USER, host),
            [user, host] => (user, host),
            _ => return Err(anyhow!("invalid remote format, expected user@host[:port]: {remote}")),
        };

        let (host, port) = if host_part.contains(':') {
            match host_part.split(':').collect::<Vec<_>>()[..] {
                [host, port] => (host, port),
                _ => {
                    return Err(anyhow!(
                        "invalid remote format, expected user@host[:port]: {remote}"
                    ));
                }
            }
        } else {
            (host_part, DEFAULT_PORT)
        };

        if host.is_empty() {
            return Err(anyhow!("invalid remote format, empty host: {remote}"));
        }

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            port: port.to_string(),
        })
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

//! Normalized hostnames used as watchlist keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::{Host, Url};

use crate::WatchError;

/// A normalized hostname: lowercase, without scheme, `www.`, port or path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Domain(String);

impl Domain {
    /// Normalize a hostname or URL into a domain.
    ///
    /// Accepts bare hostnames (`Reddit.com`), hostnames with a `www.` prefix,
    /// and full URLs (`https://www.reddit.com:443/r/rust?x=1`). Internationalized
    /// names are stored in their punycode form. Returns `None` when nothing
    /// resembling a hostname remains.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        let url = if input.contains("://") {
            Url::parse(input).ok()?
        } else {
            Url::parse(&format!("http://{input}")).ok()?
        };

        let host = match url.host()? {
            Host::Domain(name) => {
                let name = name.to_ascii_lowercase();
                let name = name.trim_end_matches('.');
                let name = name.strip_prefix("www.").unwrap_or(name);
                if !is_valid_name(name) {
                    return None;
                }
                name.to_string()
            }
            Host::Ipv4(addr) => addr.to_string(),
            Host::Ipv6(addr) => format!("[{addr}]"),
        };

        Some(Self(host))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Domain {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::parse(s).ok_or_else(|| WatchError::InvalidDomain(s.to_string()))
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

//! Host identities derived from addresses.
//!
//! A provisioned node is named `rack-<c>-<base>-<d>` where `c` and `d` are the
//! third and fourth octets of its IPv4 address, so nodes sharing a rack prefix
//! stay distinguishable by address.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("'{0}' is not an IPv4 address, cannot derive a host name from it")]
    NotIpv4(String),

    #[error("base name must not be empty")]
    EmptyBase,
}

/// Name of a provisioned host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostIdentity(String);

impl HostIdentity {
    /// Derives the identity for `addr` within a batch named `base`.
    pub fn derive(base: &str, addr: &str) -> Result<Self, IdentityError> {
        if base.is_empty() {
            return Err(IdentityError::EmptyBase);
        }

        let ip = addr
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| IdentityError::NotIpv4(addr.to_string()))?;
        let [_, _, c, d] = ip.octets();

        Ok(Self(format!("rack-{c}-{base}-{d}")))
    }

    /// Wraps an existing name, e.g. one read back from the host store.
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HostIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn embeds_third_and_fourth_octets() {
        let id = HostIdentity::derive("web", "192.168.7.42").unwrap();
        assert_eq!(id.as_str(), "rack-7-web-42");
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = HostIdentity::derive("db", "10.1.2.3").unwrap();
        let b = HostIdentity::derive("db", "10.1.2.3").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_low_octets_never_collide() {
        let ids: HashSet<HostIdentity> = (1..=254)
            .flat_map(|c| [1u8, 200].map(move |d| format!("10.0.{c}.{d}")))
            .map(|addr| HostIdentity::derive("node", &addr).unwrap())
            .collect();
        assert_eq!(ids.len(), 254 * 2);
    }

    #[test]
    fn upper_octets_do_not_take_part_in_the_name() {
        assert_eq!(
            HostIdentity::derive("t", "10.0.5.1").unwrap(),
            HostIdentity::derive("t", "10.1.5.1").unwrap()
        );
    }

    #[test]
    fn rejects_non_ipv4_input() {
        assert_eq!(
            HostIdentity::derive("node", "fe80::1"),
            Err(IdentityError::NotIpv4("fe80::1".to_string()))
        );
        assert!(HostIdentity::derive("node", "10.0.0.[x:y]").is_err());
        assert!(HostIdentity::derive("node", "pi.local").is_err());
    }

    #[test]
    fn rejects_empty_base() {
        assert_eq!(HostIdentity::derive("", "10.0.0.1"), Err(IdentityError::EmptyBase));
    }
}

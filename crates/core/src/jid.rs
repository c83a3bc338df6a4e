//! Address handling on top of the `jid` crate.
//!
//! Contacts are keyed by the normalised bare JID. Callers treat anything
//! that fails to parse as a malformed address and drop it.

pub use ::jid::{BareJid, Error as JidError, Jid};

pub fn parse(value: &str) -> Result<Jid, JidError> {
    Jid::new(value)
}

/// Normalised bare form of `value`, resource stripped.
pub fn bare(value: &str) -> Result<BareJid, JidError> {
    Ok(parse(value)?.to_bare())
}

/// Roster lookup key, or `None` for a malformed address.
pub fn key(value: &str) -> Option<String> {
    bare(value).ok().map(|bare| bare.to_string())
}

pub fn same_bare(a: &str, b: &str) -> bool {
    match (bare(a), bare(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// The node of `jid`, falling back to the whole bare address for
/// domain-only JIDs.
pub fn node_or_bare(jid: &BareJid) -> &str {
    jid.node().map_or(jid.as_str(), |node| node.as_str())
}

//! Legacy `jabber:iq:auth` login.
//!
//! The client first asks which fields the server accepts, then answers with
//! either a SHA-1 digest of the stream id and password or the plaintext
//! password.

use sha1::{Digest, Sha1};

use crate::stanza::{IqType, StanzaNode, ns};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Digest,
    Plaintext,
}

/// `hex(sha1(stream_id ++ password))`, lower-case.
pub fn digest(stream_id: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// The field discovery query sent once the server stream is open.
pub fn discovery_query(id: &str, username: &str) -> StanzaNode {
    let mut iq = StanzaNode::iq(IqType::Get, id);
    iq.append_child(StanzaNode::with_namespace("query", ns::AUTH))
        .append_child(StanzaNode::new("username"))
        .set_text(username);
    iq
}

/// Digest is used only when the server offers it and a stream id is known.
pub fn select_method(response: &StanzaNode, stream_id: Option<&str>) -> AuthMethod {
    let offers_digest = response
        .child("query")
        .is_some_and(|query| query.child("digest").is_some());
    match (offers_digest, stream_id) {
        (true, Some(id)) if !id.is_empty() => AuthMethod::Digest,
        _ => AuthMethod::Plaintext,
    }
}

pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub resource: &'a str,
}

/// The credentials IQ answering `response`.
pub fn credentials_query(
    id: &str,
    credentials: &Credentials<'_>,
    response: &StanzaNode,
    stream_id: Option<&str>,
) -> (AuthMethod, StanzaNode) {
    let method = select_method(response, stream_id);

    let mut query = StanzaNode::with_namespace("query", ns::AUTH);
    query
        .append_child(StanzaNode::new("username"))
        .set_text(credentials.username);
    match (method, stream_id) {
        (AuthMethod::Digest, Some(stream_id)) => {
            query
                .append_child(StanzaNode::new("digest"))
                .set_text(digest(stream_id, credentials.password));
        }
        _ => {
            query
                .append_child(StanzaNode::new("password"))
                .set_text(credentials.password);
        }
    }
    query
        .append_child(StanzaNode::new("resource"))
        .set_text(credentials.resource);

    let mut iq = StanzaNode::iq(IqType::Set, id);
    iq.push_child(query);
    (method, iq)
}

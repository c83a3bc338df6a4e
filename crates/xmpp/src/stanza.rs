use quick_xml::Reader;
use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};

use natter_core::MessageKind;

use crate::error::StanzaError;

pub mod ns {
    pub const CLIENT: &str = "jabber:client";
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    pub const AUTH: &str = "jabber:iq:auth";
    pub const ROSTER: &str = "jabber:iq:roster";
    pub const AGENTS: &str = "jabber:iq:agents";
    pub const AGENT: &str = "jabber:iq:agent";
    pub const REGISTER: &str = "jabber:iq:register";
    pub const SEARCH: &str = "jabber:iq:search";
    pub const VERSION: &str = "jabber:iq:version";
    pub const TIME: &str = "jabber:iq:time";
    pub const LAST: &str = "jabber:iq:last";
    pub const PRIVATE: &str = "jabber:iq:private";
    pub const VCARD: &str = "vcard-temp";
    pub const ENCRYPTED: &str = "jabber:x:encrypted";
    pub const DELAY: &str = "jabber:x:delay";
    pub const BOOKMARKS: &str = "storage:bookmarks";
    pub const ROSTER_NOTES: &str = "storage:rosternotes";
    pub const MUC: &str = "http://jabber.org/protocol/muc";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

impl IqType {
    pub fn as_str(self) -> &'static str {
        match self {
            IqType::Get => "get",
            IqType::Set => "set",
            IqType::Result => "result",
            IqType::Error => "error",
        }
    }

    pub fn from_attr(value: Option<&str>) -> Option<Self> {
        match value? {
            "get" => Some(IqType::Get),
            "set" => Some(IqType::Set),
            "result" => Some(IqType::Result),
            "error" => Some(IqType::Error),
            _ => None,
        }
    }
}

/// Top-level classification used by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaKind {
    Message,
    Presence,
    Iq,
    Subscription,
    Other,
}

/// An owned XML element: name, ordered attributes, children and text.
///
/// The element namespace is kept as an ordinary `xmlns` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StanzaNode {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<StanzaNode>,
    text: Option<String>,
}

impl StanzaNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_namespace(name: impl Into<String>, namespace: &str) -> Self {
        let mut node = Self::new(name);
        node.set_attr("xmlns", namespace);
        node
    }

    pub fn iq(kind: IqType, id: &str) -> Self {
        let mut iq = Self::new("iq");
        iq.set_attr("type", kind.as_str());
        if !id.is_empty() {
            iq.set_attr("id", id);
        }
        iq
    }

    /// An IQ with a single `<query xmlns=namespace/>` child.
    pub fn iq_query(kind: IqType, id: &str, to: Option<&str>, namespace: &str) -> Self {
        let mut iq = Self::iq(kind, id);
        if let Some(to) = to {
            iq.set_attr("to", to);
        }
        iq.push_child(Self::with_namespace("query", namespace));
        iq
    }

    pub fn message(to: &str, kind: MessageKind, body: &str) -> Self {
        let mut message = Self::new("message");
        message.set_attr("to", to);
        if kind != MessageKind::Normal {
            message.set_attr("type", kind.as_str());
        }
        message.append_child(Self::new("body")).set_text(body);
        message
    }

    pub fn presence() -> Self {
        Self::new("presence")
    }

    pub fn presence_typed(to: &str, kind: &str) -> Self {
        let mut presence = Self::presence();
        presence.set_attr("to", to);
        presence.set_attr("type", kind);
        presence
    }

    /// Multi-user chat join presence addressed to `room/nickname`.
    pub fn muc_join(room: &str, nickname: &str, password: Option<&str>) -> Self {
        let mut presence = Self::presence();
        presence.set_attr("to", format!("{room}/{nickname}"));
        let muc = presence.append_child(Self::with_namespace("x", ns::MUC));
        if let Some(password) = password {
            muc.append_child(Self::new("password")).set_text(password);
        }
        presence
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is(&self, name: &str, namespace: &str) -> bool {
        self.name == name && self.namespace() == Some(namespace)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.attr("xmlns")
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Sets or replaces an attribute, keeping its original position.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.attrs.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attrs.push((name.to_string(), value)),
        }
        self
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attrs.iter().position(|(key, _)| key == name)?;
        Some(self.attrs.remove(index).1)
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(text.into());
        self
    }

    /// The node's own text payload only.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Own text if present, otherwise the first child's value.
    pub fn value(&self) -> Option<&str> {
        match self.text.as_deref() {
            Some(text) if !text.is_empty() => Some(text),
            _ => self.children.first().and_then(StanzaNode::value),
        }
    }

    /// Appends a child and returns a handle to it for further building.
    pub fn append_child(&mut self, child: StanzaNode) -> &mut StanzaNode {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn push_child(&mut self, child: StanzaNode) -> &mut Self {
        self.children.push(child);
        self
    }

    pub fn children(&self) -> &[StanzaNode] {
        &self.children
    }

    pub fn first_child(&self) -> Option<&StanzaNode> {
        self.children.first()
    }

    pub fn child(&self, name: &str) -> Option<&StanzaNode> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut StanzaNode> {
        self.children.iter_mut().find(|child| child.name == name)
    }

    pub fn child_ns(&self, name: &str, namespace: &str) -> Option<&StanzaNode> {
        self.children.iter().find(|child| child.is(name, namespace))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a StanzaNode> {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn child_value(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(StanzaNode::value)
    }

    pub fn kind(&self) -> StanzaKind {
        match self.name.as_str() {
            "message" => StanzaKind::Message,
            "iq" => StanzaKind::Iq,
            "presence" => match self.attr("type") {
                Some("subscribe" | "subscribed" | "unsubscribe" | "unsubscribed") => {
                    StanzaKind::Subscription
                }
                _ => StanzaKind::Presence,
            },
            _ => StanzaKind::Other,
        }
    }

    /// Parses exactly one complete element.
    pub fn parse(xml: &str) -> Result<Self, StanzaError> {
        let trimmed = xml.trim();
        if trimmed.is_empty() {
            return Err(StanzaError::Empty);
        }

        let mut reader = Reader::from_str(trimmed);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<StanzaNode> = Vec::new();
        loop {
            let event = reader
                .read_event()
                .map_err(|error| StanzaError::Parse(error.to_string()))?;
            match event {
                Event::Start(start) => stack.push(node_from_start(&start)?),
                Event::Empty(start) => {
                    let node = node_from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => return Ok(node),
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        let text = text
                            .unescape()
                            .map_err(|error| StanzaError::Parse(error.to_string()))?;
                        current.text.get_or_insert_with(String::new).push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        let data = String::from_utf8_lossy(&data);
                        current.text.get_or_insert_with(String::new).push_str(&data);
                    }
                }
                Event::End(_) => {
                    let Some(mut node) = stack.pop() else {
                        return Err(StanzaError::Parse("unexpected closing tag".to_string()));
                    };
                    node.normalize_text();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => return Ok(node),
                    }
                }
                Event::Eof => {
                    return Err(if stack.is_empty() {
                        StanzaError::Empty
                    } else {
                        StanzaError::Incomplete
                    });
                }
                Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {}
            }
        }
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("='");
            out.push_str(&escape(value.as_str()));
            out.push('\'');
        }

        let text = self.text.as_deref().filter(|text| !text.is_empty());
        if text.is_none() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }

        out.push('>');
        if let Some(text) = text {
            out.push_str(&partial_escape(text));
        }
        for child in &self.children {
            child.write_xml(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    /// Whitespace between child elements is layout, not content.
    fn normalize_text(&mut self) {
        let drop = match &self.text {
            Some(text) => text.is_empty() || (!self.children.is_empty() && text.trim().is_empty()),
            None => false,
        };
        if drop {
            self.text = None;
        }
    }
}

impl std::fmt::Display for StanzaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_xml())
    }
}

pub(crate) fn node_from_start(start: &BytesStart<'_>) -> Result<StanzaNode, StanzaError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut node = StanzaNode::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|error| StanzaError::Parse(error.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|error| StanzaError::Parse(error.to_string()))?;
        node.attrs.push((key, value.into_owned()));
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const ROSTER_RESULT: &str = "<iq type='result' id='Roster'>\n  <query xmlns='jabber:iq:roster'>\n    <item jid='alice@example.com' name='Alice &amp; Co'><group>Friends</group></item>\n    <item jid='bob@example.com'/>\n  </query>\n</iq>";

    #[test]
    fn parses_nested_element() {
        let iq = StanzaNode::parse(ROSTER_RESULT).unwrap();
        assert_eq!(iq.name(), "iq");
        assert_eq!(iq.attr("id"), Some("Roster"));
        assert_eq!(iq.text(), None);

        let query = iq.child_ns("query", ns::ROSTER).unwrap();
        let items: Vec<_> = query.children_named("item").collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].attr("name"), Some("Alice & Co"));
        assert_eq!(items[0].child_value("group"), Some("Friends"));
    }

    #[test]
    fn value_falls_back_to_first_child() {
        let node = StanzaNode::parse("<a><b><c>deep</c></b><d>other</d></a>").unwrap();
        assert_eq!(node.text(), None);
        assert_eq!(node.value(), Some("deep"));
        assert_eq!(node.child_value("d"), Some("other"));
        assert_eq!(node.child_value("missing"), None);
    }

    #[test]
    fn body_whitespace_is_preserved() {
        let node = StanzaNode::parse("<message><body>  two  spaces </body></message>").unwrap();
        assert_eq!(node.child_value("body"), Some("  two  spaces "));
    }

    #[test]
    fn serializes_with_escaping() {
        let mut message = StanzaNode::message("bob@example.com", MessageKind::Chat, "1 < 2 & 3");
        message.set_attr("id", "a'b");

        let xml = message.to_xml();
        assert_eq!(
            xml,
            "<message to='bob@example.com' type='chat' id='a&apos;b'><body>1 &lt; 2 &amp; 3</body></message>"
        );

        let parsed = StanzaNode::parse(&xml).unwrap();
        assert_eq!(parsed.child_value("body"), Some("1 < 2 & 3"));
        assert_eq!(parsed.attr("id"), Some("a'b"));
    }

    #[test]
    fn builds_iq_query() {
        let iq = StanzaNode::iq_query(IqType::Get, "7", Some("example.com"), ns::VERSION);
        assert_eq!(
            iq.to_xml(),
            "<iq type='get' id='7' to='example.com'><query xmlns='jabber:iq:version'/></iq>"
        );
    }

    #[test]
    fn set_attr_replaces_in_place() {
        let mut node = StanzaNode::new("x");
        node.set_attr("a", "1").set_attr("b", "2").set_attr("a", "3");
        assert_eq!(node.to_xml(), "<x a='3' b='2'/>");
        assert_eq!(node.remove_attr("a"), Some("3".to_string()));
        assert_eq!(node.attr("a"), None);
    }

    #[test]
    fn classifies_stanzas() {
        let parse = |xml: &str| StanzaNode::parse(xml).unwrap().kind();
        assert_eq!(parse("<message/>"), StanzaKind::Message);
        assert_eq!(parse("<presence/>"), StanzaKind::Presence);
        assert_eq!(parse("<presence type='unavailable'/>"), StanzaKind::Presence);
        assert_eq!(parse("<presence type='subscribe'/>"), StanzaKind::Subscription);
        assert_eq!(parse("<iq type='get'/>"), StanzaKind::Iq);
        assert_eq!(parse("<stream:features/>"), StanzaKind::Other);
    }

    #[test]
    fn rejects_incomplete_and_empty_input() {
        assert_matches!(StanzaNode::parse("   "), Err(StanzaError::Empty));
        assert_matches!(
            StanzaNode::parse("<iq><query>"),
            Err(StanzaError::Incomplete)
        );
        assert_matches!(StanzaNode::parse("<iq a='&bogus;'/>"), Err(StanzaError::Parse(_)));
    }

    #[test]
    fn append_child_returns_child_handle() {
        let mut iq = StanzaNode::iq(IqType::Set, "1");
        iq.append_child(StanzaNode::with_namespace("query", ns::ROSTER))
            .append_child(StanzaNode::new("item"))
            .set_attr("jid", "carol@example.com");

        let item = iq
            .child("query")
            .and_then(|query| query.child("item"))
            .unwrap();
        assert_eq!(item.attr("jid"), Some("carol@example.com"));
    }
}

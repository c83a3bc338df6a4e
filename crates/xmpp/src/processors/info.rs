//! Version, time, last-activity and vCard query results.
//!
//! Each result is announced in the log and written to the sender's bare-JID
//! conversation: one header line flagged as info, then continuation lines.

use tracing::debug;

use natter_core::{IncomingMessage, LogLevel, MessageFlags, jid};

use super::HandlerContext;
use crate::iq::HandlerKind;
use crate::stanza::{IqType, StanzaNode, ns};

const SECONDS_PER_DAY: u64 = 86_400;

/// Contact information that can be requested with `Session::request_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQuery {
    Version,
    Time,
    LastActivity,
    Vcard,
}

impl InfoQuery {
    pub fn namespace(self) -> &'static str {
        match self {
            InfoQuery::Version => ns::VERSION,
            InfoQuery::Time => ns::TIME,
            InfoQuery::LastActivity => ns::LAST,
            InfoQuery::Vcard => ns::VCARD,
        }
    }

    pub fn handler_kind(self) -> HandlerKind {
        match self {
            InfoQuery::Version => HandlerKind::VersionInfo,
            InfoQuery::Time => HandlerKind::TimeInfo,
            InfoQuery::LastActivity => HandlerKind::LastActivity,
            InfoQuery::Vcard => HandlerKind::VcardInfo,
        }
    }

    /// Name used in log lines, e.g. `IQ:version`.
    pub fn label(self) -> &'static str {
        match self {
            InfoQuery::Version => "version",
            InfoQuery::Time => "time",
            InfoQuery::LastActivity => "last",
            InfoQuery::Vcard => "vCard",
        }
    }

    fn payload_name(self) -> &'static str {
        match self {
            InfoQuery::Vcard => "vCard",
            _ => "query",
        }
    }

    /// The IQ get asking `to` for this information.
    pub fn request(self, id: &str, to: &str) -> StanzaNode {
        let mut iq = StanzaNode::iq(IqType::Get, id);
        iq.set_attr("to", to);
        iq.push_child(StanzaNode::with_namespace(
            self.payload_name(),
            self.namespace(),
        ));
        iq
    }

    pub fn from_handler_kind(kind: HandlerKind) -> Option<Self> {
        match kind {
            HandlerKind::VersionInfo => Some(InfoQuery::Version),
            HandlerKind::TimeInfo => Some(InfoQuery::Time),
            HandlerKind::LastActivity => Some(InfoQuery::LastActivity),
            HandlerKind::VcardInfo => Some(InfoQuery::Vcard),
            _ => None,
        }
    }
}

pub fn handle_info_result(ctx: &mut HandlerContext<'_>, query: InfoQuery, stanza: &StanzaNode) {
    match query {
        InfoQuery::Vcard => handle_vcard(ctx, stanza),
        _ => handle_query_result(ctx, query, stanza),
    }
}

fn handle_query_result(ctx: &mut HandlerContext<'_>, query: InfoQuery, stanza: &StanzaNode) {
    let label = query.label();
    let Some(answer) = stanza.child("query") else {
        ctx.log(LogLevel::Normal, &format!("Invalid IQ:{label} result!"));
        return;
    };
    let Some((from, conversation)) = sender(stanza) else {
        ctx.log(
            LogLevel::Normal,
            &format!("Invalid IQ:{label} result (no sender name)."),
        );
        return;
    };

    let mut display = InfoDisplay::start(ctx, label, from, conversation);
    match query {
        InfoQuery::Version => {
            display.field("Name:    ", answer.child_value("name"));
            display.field("Version: ", answer.child_value("version"));
            display.field("OS:      ", answer.child_value("os"));
        }
        InfoQuery::Time => {
            display.field("UTC:  ", answer.child_value("utc"));
            display.field("TZ:   ", answer.child_value("tz"));
            display.field("Time: ", answer.child_value("display"));
        }
        InfoQuery::LastActivity => {
            let idle = answer
                .attr("seconds")
                .map(|seconds| format_idle_time(seconds.trim().parse().unwrap_or(0)));
            display.continued(idle.as_deref().unwrap_or("No idle time reported."));

            let status = answer.text().map(str::trim).filter(|text| !text.is_empty());
            if let Some(status) = status {
                display.write(&format!("Status message: {status}"), MessageFlags::INFO);
            }
        }
        InfoQuery::Vcard => {}
    }
}

fn handle_vcard(ctx: &mut HandlerContext<'_>, stanza: &StanzaNode) {
    let Some((from, conversation)) = sender(stanza) else {
        ctx.log(
            LogLevel::Normal,
            "Invalid IQ:vCard result (no sender name).",
        );
        return;
    };

    let Some(vcard) = stanza.child("vCard") else {
        ctx.log(
            LogLevel::Normal,
            &format!("Received IQ:vCard result from <{from}>"),
        );
        ctx.log(LogLevel::Normal, "Empty IQ:vCard result!");
        return;
    };

    let mut display = InfoDisplay::start(ctx, InfoQuery::Vcard.label(), from, conversation);
    for field in vcard.children() {
        display_vcard_field(&mut display, field);
    }
}

/// `[home]` `[work]` ... markers on vCard address, phone and email fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct VcardTags {
    home: bool,
    work: bool,
    postal: bool,
    voice: bool,
    fax: bool,
    cell: bool,
    inet: bool,
    pref: bool,
}

impl VcardTags {
    fn common(field: &StanzaNode) -> Self {
        Self {
            home: field.child("HOME").is_some(),
            work: field.child("WORK").is_some(),
            pref: field.child("PREF").is_some(),
            ..Self::default()
        }
    }

    fn render(self) -> String {
        let markers = [
            (self.home, "[home]"),
            (self.work, "[work]"),
            (self.postal, "[postal]"),
            (self.voice, "[voice]"),
            (self.fax, "[fax]"),
            (self.cell, "[cell]"),
            (self.inet, "[inet]"),
            (self.pref, "[pref]"),
        ];
        let mut out: String = markers
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, marker)| *marker)
            .collect();
        if !out.is_empty() {
            out.push(' ');
        }
        out
    }
}

fn display_vcard_field(display: &mut InfoDisplay<'_, '_>, field: &StanzaNode) {
    let plain = |name: &str| field.child_value(name);
    let untagged = VcardTags::default();

    let simple_label = match field.name() {
        "FN" => Some("Name"),
        "NICKNAME" => Some("Nickname"),
        "URL" => Some("URL"),
        "BDAY" => Some("Birthday"),
        "TZ" => Some("Timezone"),
        "TITLE" => Some("Title"),
        "ROLE" => Some("Role"),
        "DESC" => Some("Comment"),
        _ => None,
    };
    if let Some(label) = simple_label {
        display.vcard_item(label, untagged, field.text());
        return;
    }

    match field.name() {
        "N" => {
            display.vcard_item("Family Name", untagged, plain("FAMILY"));
            display.vcard_item("Given Name", untagged, plain("GIVEN"));
            display.vcard_item("Middle Name", untagged, plain("MIDDLE"));
        }
        "ORG" => {
            display.vcard_item("Organisation name", untagged, plain("ORGNAME"));
            display.vcard_item("Organisation unit", untagged, plain("ORGUNIT"));
        }
        "ADR" => {
            let tags = VcardTags {
                postal: field.child("POSTAL").is_some(),
                ..VcardTags::common(field)
            };
            display.vcard_item("Addr (ext)", tags, plain("EXTADD"));
            display.vcard_item("Street", tags, plain("STREET"));
            display.vcard_item("Locality", tags, plain("LOCALITY"));
            display.vcard_item("Region", tags, plain("REGION"));
            display.vcard_item("Postal code", tags, plain("PCODE"));
            display.vcard_item("Country", tags, plain("CTRY"));
        }
        "TEL" => {
            let tags = VcardTags {
                voice: field.child("VOICE").is_some(),
                fax: field.child("FAX").is_some(),
                cell: field.child("CELL").is_some(),
                ..VcardTags::common(field)
            };
            display.vcard_item("Phone", tags, plain("NUMBER"));
        }
        "EMAIL" => {
            let tags = VcardTags {
                inet: field.child("INTERNET").is_some(),
                ..VcardTags::common(field)
            };
            display.vcard_item("Email", tags, plain("USERID"));
        }
        other => debug!(field = other, "skipping vCard field"),
    }
}

/// `Idle time: [Nd ]HH:MM:SS`; days are shown only past a full day.
pub fn format_idle_time(seconds: u64) -> String {
    let mut out = String::from("Idle time: ");
    let mut rest = seconds;
    if rest > SECONDS_PER_DAY {
        out.push_str(&format!("{}d ", rest / SECONDS_PER_DAY));
        rest %= SECONDS_PER_DAY;
    }
    out.push_str(&format!(
        "{:02}:{:02}:{:02}",
        rest / 3600,
        (rest % 3600) / 60,
        rest % 60
    ));
    out
}

/// The sender and its conversation key. A malformed sender counts as
/// missing.
fn sender(stanza: &StanzaNode) -> Option<(&str, String)> {
    let from = stanza.attr("from")?;
    let conversation = jid::key(from);
    if conversation.is_none() {
        debug!(from = %from, "info result from malformed address");
    }
    Some((from, conversation?))
}

/// Writes one info block into a conversation.
struct InfoDisplay<'c, 'a> {
    ctx: &'c mut HandlerContext<'a>,
    conversation: String,
}

impl<'c, 'a> InfoDisplay<'c, 'a> {
    fn start(
        ctx: &'c mut HandlerContext<'a>,
        label: &str,
        from: &str,
        conversation: String,
    ) -> Self {
        let header = format!("Received IQ:{label} result from <{from}>");
        ctx.log(LogLevel::Normal, &header);

        let mut display = Self { ctx, conversation };
        display.write(&header, MessageFlags::INFO);
        display
    }

    fn write(&mut self, text: &str, flags: MessageFlags) {
        let line = IncomingMessage::info(self.conversation.as_str(), text, flags);
        self.ctx.observer.display_incoming_message(&line);
    }

    fn continued(&mut self, text: &str) {
        self.write(text, MessageFlags::INFO_CONTINUED);
    }

    fn field(&mut self, prefix: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.continued(&format!("{prefix}{value}"));
        }
    }

    fn vcard_item(&mut self, label: &str, tags: VcardTags, text: Option<&str>) {
        if let Some(text) = text {
            self.continued(&format!("{label}: {}{text}", tags.render()));
        }
    }
}

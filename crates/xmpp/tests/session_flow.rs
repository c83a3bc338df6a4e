mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};

use natter_core::config::SubscriptionPolicy;
use natter_core::{MessageKind, RosterChange, Status};
use natter_roster::RosterKind;
use natter_xmpp::stanza::ns;
use natter_xmpp::stream::KEEPALIVE_PAYLOAD;
use natter_xmpp::{
    Bookmark, ConnectionError, InfoQuery, SessionError, SessionState, StanzaNode,
    StorageNamespace,
};

use common::{MockServer, TICK, log_in_with_roster, payload_namespace, session, session_with, settings};

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn presence_is_resource_insensitive_and_idempotent() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;

    server.push_fixture("presence-away.xml", "");
    session.poll(TICK).await;
    server.push_fixture("presence-away.xml", "");
    session.poll(TICK).await;
    server.push("<presence from='BOB@example.com/phone'><show>away</show><status>Out to lunch</status></presence>");
    session.poll(TICK).await;

    let bob = session.roster().lookup("bob@example.com").unwrap();
    assert_eq!(bob.status, Status::Away);
    assert_eq!(bob.status_message.as_deref(), Some("Out to lunch"));

    let changes = &session.observer().status_changes;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].jid, "bob@example.com");
    assert_eq!((changes[0].old, changes[0].new), (Status::Offline, Status::Away));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn presence_from_strangers_adds_them() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;

    server.push("<presence from='dave@example.com/home'/>");
    session.poll(TICK).await;

    let dave = session.roster().lookup("dave@example.com").unwrap();
    assert_eq!(dave.kind, RosterKind::User);
    assert_eq!(dave.status, Status::Available);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn roster_remove_item_drops_contact() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;

    server.push(
        "<iq type='result' id='push-1'><query xmlns='jabber:iq:roster'>\
         <item jid='bob@example.com' subscription='remove'/></query></iq>",
    );
    session.poll(TICK).await;

    assert!(!session.roster().contains("bob@example.com"));
    assert!(session.roster().contains("carol@example.com"));
    assert_eq!(
        session.observer().roster_changes.last(),
        Some(&RosterChange::Removed("bob@example.com".to_string()))
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn missing_storage_is_silent_but_other_errors_are_reported() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;

    let bookmarks_id = server.iq_id_for(ns::BOOKMARKS);
    let notes_id = server.iq_id_for(ns::ROSTER_NOTES);

    server.push_fixture("storage-not-found.xml", &bookmarks_id);
    session.poll(TICK).await;
    assert!(session.storage().is_loaded(StorageNamespace::Bookmarks));
    assert!(session.storage().bookmarks().is_empty());
    assert!(!session.observer().logged("Error code from server"));

    server.push_fixture("storage-unavailable.xml", &notes_id);
    session.poll(TICK).await;
    assert!(!session.storage().is_loaded(StorageNamespace::RosterNotes));
    assert!(
        session
            .observer()
            .logged("Error code from server: 503 Service Unavailable")
    );
    assert!(session.pending_requests().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn bookmarks_autojoin_rooms() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;
    let id = server.iq_id_for(ns::BOOKMARKS);
    server.take_sent_stanzas();

    server.push_fixture("bookmarks-result.xml", &id);
    session.poll(TICK).await;

    let sent = server.sent_stanzas();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].attr("to"), Some("dev@conference.example.com/alice"));
    assert!(sent[0].child_ns("x", ns::MUC).is_some());

    let observer = session.observer();
    assert!(observer.logged("Auto-join bookmark <dev@conference.example.com>"));
    assert_eq!(observer.joined_rooms.len(), 1);
    assert_eq!(observer.joined_rooms[0].nickname, "alice");

    let dev = session.roster().lookup("dev@conference.example.com").unwrap();
    assert_eq!(dev.kind, RosterKind::Room);
    assert_eq!(dev.name, "Developers");
    assert_eq!(
        session.roster().lookup("lobby@conference.example.com").map(|entry| entry.kind),
        Some(RosterKind::Room)
    );
    assert_eq!(session.storage().bookmarks().len(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn roster_notes_are_cached() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;

    server.push_fixture("rosternotes-result.xml", &server.iq_id_for(ns::ROSTER_NOTES));
    session.poll(TICK).await;

    let note = session.storage().roster_note("bob@example.com").unwrap();
    assert_eq!(note.text, "Met at the conference");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn disconnect_clears_state_and_drops_stray_results() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;
    let notes_id = server.iq_id_for(ns::ROSTER_NOTES);

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.roster().is_empty());
    assert!(session.pending_requests().is_empty());
    assert_eq!(session.own_status(), Status::Offline);

    let unavailable = server
        .sent_stanzas()
        .into_iter()
        .rev()
        .find(|stanza| stanza.name() == "presence")
        .unwrap();
    assert_eq!(unavailable.attr("type"), Some("unavailable"));

    session.disconnect().await;
    let observer = session.observer();
    assert_eq!(observer.connection_lost.len(), 1);
    assert_eq!(observer.count_logged("[Jabber] Not connected to the server"), 1);
    assert_eq!(observer.roster_changes.last(), Some(&RosterChange::Cleared));

    let stray = StanzaNode::parse(
        &natter_test_support::fixtures::stanza("rosternotes-result.xml").replace("{id}", &notes_id),
    )
    .unwrap();
    session.handle_stanza(&stray);
    assert!(session.storage().roster_note("bob@example.com").is_none());
    assert_eq!(session.poll(TICK).await, SessionState::Disconnected);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn server_hang_up_disconnects() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;

    server.hang_up();
    assert_eq!(session.poll(TICK).await, SessionState::Disconnected);
    assert_eq!(
        session.observer().connection_lost,
        vec!["connection closed by server".to_string()]
    );
    assert!(session.roster().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn stream_error_disconnects() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;

    server.push("<stream:error><conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>");
    assert_eq!(session.poll(TICK).await, SessionState::Disconnected);
    assert_eq!(
        session.observer().connection_lost,
        vec!["stream error: conflict".to_string()]
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn subscription_requests_follow_policy() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;
    server.take_sent_stanzas();

    server.push("<presence from='eve@example.com' type='subscribe'/>");
    session.poll(TICK).await;
    let sent = server.take_sent_stanzas();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].attr("to"), Some("eve@example.com"));
    assert_eq!(sent[0].attr("type"), Some("subscribed"));

    let mut manual = settings();
    manual.subscription_policy = SubscriptionPolicy::Manual;
    let server = MockServer::install();
    let mut session = session_with(manual);
    log_in_with_roster(&server, &mut session).await;
    server.take_sent_stanzas();

    server.push("<presence from='eve@example.com' type='subscribe'/>");
    session.poll(TICK).await;
    assert!(server.sent_stanzas().is_empty());
    assert!(
        session
            .observer()
            .logged("<eve@example.com> wants to subscribe to your network presence updates")
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn delayed_messages_keep_their_timestamp() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;

    server.push_fixture("message-delayed.xml", "");
    session.poll(TICK).await;

    let messages = &session.observer().messages;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].conversation, "bob@example.com");
    assert_eq!(messages[0].text, "sent while you were away");
    assert_eq!(messages[0].kind, MessageKind::Chat);
    assert_eq!(
        messages[0].timestamp,
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap())
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn vcard_request_is_displayed() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;

    let id = session
        .request_info("bob@example.com", InfoQuery::Vcard)
        .await
        .unwrap();
    let request = server.sent_stanzas().pop().unwrap();
    assert_eq!(request.attr("to"), Some("bob@example.com"));
    assert_eq!(payload_namespace(&request), Some(ns::VCARD));

    server.push_fixture("vcard-result.xml", &id);
    session.poll(TICK).await;

    let messages = &session.observer().messages;
    let texts: Vec<&str> = messages.iter().map(|message| message.text.as_str()).collect();
    assert_eq!(
        texts,
        vec![
            "Received IQ:vCard result from <bob@example.com>",
            "Name: Bob Builder",
            "Nickname: bob",
            "Phone: [home][cell] +44 20 7946 0000",
            "Email: [inet] bob@example.org",
        ]
    );
    assert!(messages[0].flags.info);
    assert!(messages[1].flags.continuation);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn actions_require_an_established_session() {
    let _server = MockServer::install();
    let mut session = session();

    assert_matches!(
        session.send_message("bob@example.com", MessageKind::Chat, "hi").await,
        Err(SessionError::Connection(ConnectionError::NotConnected))
    );
    assert_matches!(
        session.join_room("dev@conference.example.com", None, None).await,
        Err(SessionError::Connection(ConnectionError::NotConnected))
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn status_changes_are_announced() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;
    server.take_sent_stanzas();

    session.set_status(Status::Away, Some("brb")).await.unwrap();
    let sent = server.take_sent_stanzas();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].child_value("show"), Some("away"));
    assert_eq!(sent[0].child_value("status"), Some("brb"));
    assert_eq!(sent[0].child_value("priority"), Some("5"));
    assert_eq!(session.own_status(), Status::Away);
    assert_eq!(session.own_message(), Some("brb"));

    session.set_status(Status::Invisible, None).await.unwrap();
    assert_eq!(server.take_sent_stanzas()[0].attr("type"), Some("invisible"));

    session.set_status(Status::Offline, None).await.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.observer().connection_lost.len(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn buddies_are_added_and_removed() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;
    server.take_sent_stanzas();

    session
        .add_buddy("dave@example.com/home", Some("Dave"), Some("Work"))
        .await
        .unwrap();
    let sent = server.take_sent_stanzas();
    assert_eq!(sent[0].attr("to"), Some("dave@example.com"));
    assert_eq!(sent[0].attr("type"), Some("subscribe"));
    let item = sent[1].child_ns("query", ns::ROSTER).unwrap().child("item").unwrap();
    assert_eq!(item.attr("jid"), Some("dave@example.com"));
    assert_eq!(item.attr("name"), Some("Dave"));
    assert_eq!(item.child_value("group"), Some("Work"));
    assert_eq!(session.roster().lookup("dave@example.com").unwrap().name, "Dave");

    session
        .update_buddy("dave@example.com", "David", None)
        .await
        .unwrap();
    let entry = session.roster().lookup("dave@example.com").unwrap();
    assert_eq!(entry.name, "David");
    assert_eq!(entry.group.as_deref(), Some("Work"));
    server.take_sent_stanzas();

    session.remove_buddy("dave@example.com").await.unwrap();
    let sent = server.take_sent_stanzas();
    assert_eq!(sent[0].attr("type"), Some("unsubscribe"));
    let item = sent[1].child_ns("query", ns::ROSTER).unwrap().child("item").unwrap();
    assert_eq!(item.attr("subscription"), Some("remove"));
    assert!(!session.roster().contains("dave@example.com"));

    assert_matches!(
        session.update_buddy("nobody@example.com", "x", None).await,
        Err(SessionError::UnknownContact(jid)) if jid == "nobody@example.com"
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn malformed_addresses_are_refused_before_sending() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;
    server.take_sent_stanzas();

    assert_matches!(
        session.add_buddy("@example.com", None, None).await,
        Err(SessionError::InvalidJid { jid, .. }) if jid == "@example.com"
    );
    assert_matches!(
        session.send_message("bob@", MessageKind::Chat, "hi").await,
        Err(SessionError::InvalidJid { .. })
    );
    assert_matches!(
        session.join_room("dev@conference.example.com/", None, None).await,
        Err(SessionError::InvalidJid { .. })
    );

    assert!(server.take_sent_stanzas().is_empty());
    assert!(!session.roster().iter().any(|entry| entry.jid.starts_with('@')));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn removing_an_agent_unregisters_first() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;
    server.push_fixture("agents-result.xml", "");
    session.poll(TICK).await;
    assert_eq!(
        session.roster().lookup("icq.example.com").map(|entry| entry.kind),
        Some(RosterKind::Agent)
    );
    server.take_sent_stanzas();

    session.remove_buddy("icq.example.com").await.unwrap();
    assert!(session.observer().logged("Unregistering from the icq.example.com agent"));

    let sent = server.take_sent_stanzas();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].attr("to"), Some("icq.example.com"));
    let query = sent[0].child_ns("query", ns::REGISTER).unwrap();
    assert!(query.child("remove").is_some());
    assert_eq!(sent[1].attr("type"), Some("unsubscribe"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn bookmark_edits_need_fetched_storage() {
    let server = MockServer::install();
    let mut settings = settings();
    settings.fetch_private_storage = false;
    let mut session = session_with(settings);
    log_in_with_roster(&server, &mut session).await;

    let bookmark = Bookmark {
        jid: "dev@conference.example.com".to_string(),
        autojoin: true,
        ..Bookmark::default()
    };
    assert_matches!(
        session.set_bookmark(&bookmark).await,
        Err(SessionError::StorageNotLoaded(_))
    );

    let id = session.request_storage(StorageNamespace::Bookmarks).await.unwrap();
    server.push_fixture("storage-not-found.xml", &id);
    session.poll(TICK).await;
    server.take_sent_stanzas();

    session.set_bookmark(&bookmark).await.unwrap();
    let sent = server.take_sent_stanzas();
    assert_eq!(sent[0].attr("type"), Some("set"));
    assert_eq!(payload_namespace(&sent[0]), Some(ns::BOOKMARKS));
    assert_eq!(session.storage().bookmarks().len(), 1);

    session.remove_bookmark("dev@conference.example.com").await.unwrap();
    assert!(session.storage().bookmarks().is_empty());
    assert_matches!(
        session.remove_bookmark("dev@conference.example.com").await,
        Err(SessionError::UnknownBookmark(_))
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn idle_links_get_keepalives() {
    let server = MockServer::install();
    let mut session = session();
    log_in_with_roster(&server, &mut session).await;
    let keepalive = String::from_utf8_lossy(KEEPALIVE_PAYLOAD).into_owned();
    assert!(!server.raw_sent().contains(&keepalive));

    tokio::time::advance(Duration::from_secs(41)).await;
    session.poll(TICK).await;
    assert_eq!(server.raw_sent().last(), Some(&keepalive));
}

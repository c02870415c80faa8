use core_types::{NodeId, Timestamp};
use dom::{Dom, HostTree, MutationObserver, NodeRef, NodeSpec, ScrollOffset, el, text};
use recorder::{EventLog, ManualClock, RecordError, Recorder, RecorderConfig, RecorderState};
use snapshot::{
    Event, EventData, IncrementalData, MASK_TOKEN, Mirror, NodeKind, OutlineOptions, PatchBatch,
    PointerKind, SerializeScope, Serializer, SnapshotNode,
};

struct Session {
    dom: Dom,
    doc: NodeRef,
    observer: MutationObserver<NodeRef>,
    clock: ManualClock,
    recorder: Recorder<NodeRef, EventLog>,
}

impl Session {
    fn new(config: RecorderConfig, body: NodeSpec) -> Self {
        let mut dom = Dom::new();
        let observer = dom.observe();
        let doc = dom.build_document(
            Some("https://app.example/inbox"),
            &[el("html").child(el("head")).child(body)],
        );
        observer.take_records();
        let clock = ManualClock::new();
        let recorder = Recorder::new(config, EventLog::new()).with_clock(clock.clone());
        Self {
            dom,
            doc,
            observer,
            clock,
            recorder,
        }
    }

    fn start(config: RecorderConfig, body: NodeSpec) -> Self {
        let mut session = Self::new(config, body);
        session
            .recorder
            .start(&session.dom, session.doc)
            .expect("start");
        session
    }

    fn deliver(&mut self) -> Result<(), RecordError> {
        let records = self.observer.take_records();
        self.recorder.on_mutations(&self.dom, &records)
    }

    fn find(&self, id: &str) -> NodeRef {
        dom::traverse::find_element_by_id(&self.dom, self.doc, id).expect("element")
    }

    fn id(&self, node: NodeRef) -> NodeId {
        self.recorder.mirror().id_of(node).expect("recorded")
    }

    fn events(&self) -> &[Event] {
        self.recorder.sink().events()
    }

    fn last_patch(&self) -> &PatchBatch {
        self.recorder
            .sink()
            .mutations()
            .last()
            .expect("a mutation event")
    }

    fn assert_replay_matches(&self) {
        let replayed = replay::replay(self.events()).expect("replay");
        let config = self.recorder.config();
        let live = Serializer::new(&self.dom, &config.privacy, &config.serialize)
            .serialize(
                &mut Mirror::new(),
                self.doc,
                SerializeScope::document(&config.serialize),
            )
            .expect("serialize")
            .expect("document")
            .node;
        snapshot::assert_snapshot_eq(&live, &replayed, OutlineOptions::default());
    }
}

fn inbox() -> NodeSpec {
    el("body")
        .child(
            el("ul")
                .attr("id", "list")
                .child(el("li").attr("id", "first").child(text("Hello")))
                .child(el("li").attr("id", "second").child(text("Invoice"))),
        )
        .child(el("input").attr("type", "password").attr("id", "pw"))
        .child(el("p").attr("id", "status").child(text("idle")))
}

fn find_tag<'a>(node: &'a SnapshotNode, tag: &str) -> Option<&'a SnapshotNode> {
    let mut found = None;
    node.walk(&mut |n| {
        if found.is_none() && n.tag() == Some(tag) {
            found = Some(n);
        }
    });
    found
}

fn texts_of(node: &SnapshotNode) -> Vec<String> {
    let mut out = Vec::new();
    node.walk(&mut |n| {
        if let Some(text) = n.text() {
            out.push(text.to_string());
        }
    });
    out
}

#[test]
fn start_emits_meta_then_checkpoint() {
    let session = Session::start(RecorderConfig::default(), inbox());
    let events = session.events();
    assert_eq!(events.len(), 2);
    match &events[0].data {
        EventData::Meta { href, .. } => assert_eq!(href, "https://app.example/inbox"),
        other => panic!("expected meta, got {other:?}"),
    }
    assert!(events[1].is_full_snapshot());
    assert_eq!(session.recorder.state(), RecorderState::Recording);
    assert_eq!(session.recorder.stats().checkpoints, 1);
    assert_eq!(session.recorder.sink().checkpoints(), 1);
    session.assert_replay_matches();
}

#[test]
fn appended_element_is_one_add() {
    let mut session = Session::start(RecorderConfig::default(), inbox());
    let list = session.find("list");
    session
        .dom
        .append_spec(list, &el("li").child(el("b").child(text("yo"))))
        .expect("append");
    session.deliver().expect("deliver");

    let patch = session.last_patch();
    assert_eq!(patch.adds.len(), 1);
    assert!(patch.removes.is_empty());
    assert_eq!(patch.adds[0].parent_id, session.id(list));
    assert_eq!(patch.adds[0].next_id, None);
    assert_eq!(texts_of(&patch.adds[0].node), vec!["yo".to_string()]);
    session.assert_replay_matches();
}

#[test]
fn mixed_callback_replays_cleanly() {
    let mut session = Session::start(RecorderConfig::default(), inbox());
    let first = session.find("first");
    let second = session.find("second");
    let status = session.find("status");
    let list = session.find("list");

    let status_text = session.dom.children(status)[0];
    session
        .dom
        .set_character_data(status_text, "syncing")
        .expect("text");
    session
        .dom
        .set_attribute(second, "class", "unread")
        .expect("attr");
    session.dom.remove(first);
    let fresh = session.dom.build(&el("li").child(text("Welcome")));
    session
        .dom
        .insert_before(list, fresh, Some(second))
        .expect("insert");
    session.dom.append_child(list, first).expect("move back");
    session.deliver().expect("deliver");

    let patch = session.last_patch();
    assert_eq!(patch.texts.len(), 1);
    assert_eq!(patch.texts[0].value, "syncing");
    assert_eq!(patch.attributes.len(), 1);
    assert_eq!(
        patch.attributes[0].attributes.get("class"),
        Some(&Some("unread".to_string()))
    );
    session.assert_replay_matches();
}

#[test]
fn password_typing_is_masked_in_patches_and_input_events() {
    let mut session = Session::start(RecorderConfig::default(), inbox());
    let pw = session.find("pw");
    session.dom.set_value(pw, "hunter2").expect("type");
    session.deliver().expect("deliver");

    let patch = session.last_patch();
    assert_eq!(
        patch.attributes[0].attributes.get("value"),
        Some(&Some(MASK_TOKEN.to_string()))
    );

    assert!(session.recorder.record_input(&session.dom, pw));
    match &session.events().last().expect("event").data {
        EventData::Incremental(IncrementalData::Input { text, .. }) => {
            assert_eq!(text, MASK_TOKEN)
        }
        other => panic!("expected input, got {other:?}"),
    }
    let json = session.recorder.sink().to_json_lines().expect("json");
    assert!(!json.contains("hunter2"));
}

#[test]
fn add_then_remove_in_one_callback_is_silent() {
    let mut session = Session::start(RecorderConfig::default(), inbox());
    let list = session.find("list");
    let temp = session
        .dom
        .append_spec(list, &el("li").child(text("flash")))
        .expect("append");
    session.dom.remove(temp);
    session.deliver().expect("deliver");
    assert_eq!(session.events().len(), 2);
    assert_eq!(session.recorder.stats().patches, 0);
}

#[test]
fn empty_callback_emits_nothing() {
    let mut session = Session::start(RecorderConfig::default(), inbox());
    session.recorder.on_mutations(&session.dom, &[]).expect("empty");
    assert_eq!(session.events().len(), 2);
}

#[test]
fn every_nth_event_triggers_a_checkpoint() {
    let config = RecorderConfig {
        checkpoint_every_nth: Some(2),
        ..RecorderConfig::default()
    };
    let mut session = Session::start(config, inbox());
    let status = session.find("status");
    for value in ["a", "b"] {
        session
            .dom
            .set_attribute(status, "data-step", value)
            .expect("attr");
        session.deliver().expect("deliver");
    }

    let kinds: Vec<bool> = session.events().iter().map(Event::is_full_snapshot).collect();
    assert_eq!(kinds, vec![false, true, false, false, false, true]);
    assert_eq!(session.recorder.stats().checkpoints, 2);
    session.assert_replay_matches();
}

#[test]
fn elapsed_time_triggers_a_checkpoint_on_tick() {
    let config = RecorderConfig {
        checkpoint_every_ms: Some(1_000),
        ..RecorderConfig::default()
    };
    let mut session = Session::start(config, inbox());
    session.clock.advance(1_000);
    session.recorder.tick(&session.dom).expect("tick");
    assert_eq!(session.recorder.stats().checkpoints, 1);

    session.clock.advance(1);
    session.recorder.tick(&session.dom).expect("tick");
    assert_eq!(session.recorder.stats().checkpoints, 2);
    let last = session.events().last().expect("event");
    assert!(last.is_full_snapshot());
    assert_eq!(last.timestamp, Timestamp(1_001));
}

#[test]
fn too_many_pending_inserts_force_a_checkpoint() {
    let config = RecorderConfig {
        max_pending_inserts: 1,
        ..RecorderConfig::default()
    };
    let mut session = Session::start(config, inbox());
    let body = dom::traverse::find_first_element(&session.dom, session.doc, "body").expect("body");
    let menu = session.dom.build(&el("menu"));
    session.dom.append_child(body, menu).expect("menu");
    for label in ["Open", "Archive"] {
        let item = session.dom.build(&el("li").child(text(label)));
        session.dom.append_child(menu, item).expect("item");
    }
    // The host loses the record that introduced the menu.
    let records = session.observer.take_records();
    session
        .recorder
        .on_mutations(&session.dom, &records[1..])
        .expect("deliver");

    let stats = session.recorder.stats();
    assert_eq!(stats.capacity_exceeded, 1);
    assert_eq!(stats.forced_checkpoints, 1);
    assert_eq!(stats.checkpoints, 2);
    assert_eq!(session.recorder.pending_inserts(), 0);
    let checkpoint = session.recorder.sink().last_checkpoint().expect("checkpoint");
    assert!(find_tag(checkpoint, "menu").is_some());
    session.assert_replay_matches();
}

#[test]
fn frozen_recorder_holds_patches_until_unfreeze() {
    let mut session = Session::start(RecorderConfig::default(), inbox());
    let list = session.find("list");
    session.recorder.freeze();
    assert!(session.recorder.is_frozen());

    session.dom.append_spec(list, &el("li")).expect("append");
    session.deliver().expect("deliver");
    session
        .dom
        .append_spec(list, &el("li").child(text("later")))
        .expect("append");
    session.deliver().expect("deliver");
    assert_eq!(session.events().len(), 2);

    session.recorder.unfreeze(&session.dom).expect("unfreeze");
    assert_eq!(session.events().len(), 3);
    assert_eq!(session.last_patch().adds.len(), 2);
    session.assert_replay_matches();
}

#[test]
fn stop_flushes_even_when_frozen() {
    let mut session = Session::start(RecorderConfig::default(), inbox());
    let status = session.find("status");
    session.recorder.freeze();
    session.dom.set_attribute(status, "hidden", "").expect("attr");
    let records = session.observer.take_records();
    session.recorder.stop(&session.dom, &records).expect("stop");

    assert_eq!(session.recorder.state(), RecorderState::Stopped);
    assert_eq!(session.recorder.stats().patches, 1);
    assert!(session.recorder.observed_roots().is_empty());
    assert_eq!(
        session.recorder.on_mutations(&session.dom, &[]),
        Err(RecordError::NotRecording)
    );
    session.assert_replay_matches();
}

#[test]
fn lifecycle_errors() {
    let mut session = Session::new(RecorderConfig::default(), inbox());
    assert_eq!(
        session.recorder.on_mutations(&session.dom, &[]),
        Err(RecordError::NotRecording)
    );
    assert_eq!(
        session
            .recorder
            .add_custom_marker("early", serde_json::Value::Null),
        Err(RecordError::NotRecording)
    );
    let body = dom::traverse::find_first_element(&session.dom, session.doc, "body").expect("body");
    assert_eq!(
        session.recorder.start(&session.dom, body),
        Err(RecordError::NotADocument)
    );
    assert_eq!(session.recorder.state(), RecorderState::NotStarted);

    session.recorder.start(&session.dom, session.doc).expect("start");
    assert_eq!(
        session.recorder.start(&session.dom, session.doc),
        Err(RecordError::AlreadyStarted)
    );
}

#[test]
fn timestamps_count_from_the_session_offset() {
    let config = RecorderConfig {
        session_offset_ms: 5_000,
        ..RecorderConfig::default()
    };
    let mut session = Session::start(config, inbox());
    assert_eq!(session.events()[0].timestamp, Timestamp(5_000));

    session.clock.advance(250);
    let status = session.find("status");
    session.dom.set_attribute(status, "title", "now").expect("attr");
    session.deliver().expect("deliver");
    assert_eq!(
        session.events().last().expect("event").timestamp,
        Timestamp(5_250)
    );

    session
        .recorder
        .add_custom_marker("checkout", serde_json::json!({ "step": 2 }))
        .expect("marker");
    match &session.events().last().expect("event").data {
        EventData::Custom { tag, payload } => {
            assert_eq!(tag, "checkout");
            assert_eq!(payload["step"], 2);
        }
        other => panic!("expected custom event, got {other:?}"),
    }
}

#[test]
fn shadow_content_is_recorded_under_its_host() {
    let mut session = Session::new(
        RecorderConfig::default(),
        el("body")
            .child(el("div").attr("id", "host").child(text("light")))
            .child(el("p").attr("id", "loose").child(text("moving"))),
    );
    let host = session.find("host");
    let shadow = session.dom.attach_shadow(host).expect("shadow");
    session
        .dom
        .append_spec(shadow, &el("slot"))
        .expect("slot");
    session.observer.take_records();
    session
        .recorder
        .start(&session.dom, session.doc)
        .expect("start");
    assert!(session.recorder.observed_roots().contains(&shadow));

    session
        .dom
        .append_spec(shadow, &el("em").child(text("inside")))
        .expect("append");
    session.deliver().expect("deliver");
    let patch = session.last_patch();
    assert_eq!(patch.adds[0].parent_id, session.id(host));
    assert!(patch.adds[0].node.is_shadow);

    session.dom.append_spec(host, &el("span")).expect("light");
    let loose = session.find("loose");
    session.dom.append_child(shadow, loose).expect("into shadow");
    session.deliver().expect("deliver");
    session.assert_replay_matches();
}

#[test]
fn same_origin_frames_get_their_own_buffer() {
    let mut session = Session::start(
        RecorderConfig::default(),
        el("body").child(el("iframe").attr("id", "frame")),
    );
    let frame = session.find("frame");
    let inner = session
        .dom
        .load_frame(frame, Some("https://app.example/widget"))
        .expect("load");
    session.deliver().expect("deliver");

    let patch = session.last_patch();
    assert_eq!(patch.adds[0].parent_id, session.id(frame));
    assert!(matches!(patch.adds[0].node.kind, NodeKind::Document { .. }));
    assert!(session.recorder.observed_roots().contains(&inner));

    session
        .dom
        .append_spec(inner, &el("html").child(el("body").child(text("widget"))))
        .expect("fill frame");
    session.deliver().expect("deliver");
    assert_eq!(session.last_patch().adds[0].parent_id, session.id(inner));
    session.assert_replay_matches();
}

#[test]
fn frame_streams_are_merged_into_the_page() {
    let mut page = Session::start(
        RecorderConfig::default(),
        el("body").child(el("iframe").attr("id", "ad")),
    );
    let frame = page.find("ad");
    page.dom.deny_frame_access(frame).expect("deny");

    let mut remote = Session::start(
        RecorderConfig::default(),
        el("body").child(el("div").attr("id", "slot")),
    );
    let slot = remote.find("slot");
    remote
        .dom
        .append_spec(slot, &el("a").child(text("Buy now")))
        .expect("append");
    remote.deliver().expect("deliver");

    for event in remote.events().to_vec() {
        page.recorder
            .ingest_frame_event(&page.dom, frame, event)
            .expect("ingest");
    }

    let replayed = replay::replay(page.events()).expect("replay");
    let iframe = find_tag(&replayed, "iframe").expect("iframe");
    let document = &iframe.children()[0];
    assert!(matches!(document.kind, NodeKind::Document { .. }));
    assert!(texts_of(document).contains(&"Buy now".to_string()));
    assert!(
        document
            .children()
            .iter()
            .all(|child| child.root_id == Some(document.id))
    );

    let detached = page.dom.build(&el("iframe"));
    assert_eq!(
        page.recorder.ingest_frame_event(
            &page.dom,
            detached,
            remote.events()[0].clone()
        ),
        Err(RecordError::UnknownFrame)
    );
}

#[test]
fn auxiliary_events_need_a_recorded_target() {
    let mut session = Session::start(RecorderConfig::default(), inbox());
    let status = session.find("status");
    let stray = session.dom.build(&el("div"));

    assert!(session
        .recorder
        .record_pointer(PointerKind::Click, status, 10.0, 20.0));
    assert!(!session
        .recorder
        .record_pointer(PointerKind::Click, stray, 0.0, 0.0));
    assert!(session.recorder.record_scroll(
        status,
        ScrollOffset {
            left: 0.0,
            top: 40.0
        }
    ));
    assert!(session.recorder.record_viewport_resize(1280, 720));
    assert!(!session
        .recorder
        .record_canvas_mutation(status, "fillRect", Vec::new()));

    let stats = session.recorder.stats();
    assert_eq!(stats.auxiliary_events, 3);
    assert_eq!(stats.dropped_events, 1);
    match &session.events()[2].data {
        EventData::Incremental(IncrementalData::Pointer { id, .. }) => {
            assert_eq!(*id, session.id(status))
        }
        other => panic!("expected pointer, got {other:?}"),
    }
}

#[test]
fn json_lines_replay_like_the_live_log() {
    let mut session = Session::start(RecorderConfig::default(), inbox());
    let list = session.find("list");
    session
        .dom
        .append_spec(list, &el("li").child(text("from json")))
        .expect("append");
    session.deliver().expect("deliver");

    let lines = session.recorder.sink().to_json_lines().expect("json");
    let events: Vec<Event> = lines
        .lines()
        .map(|line| serde_json::from_str(line).expect("event"))
        .collect();
    assert_eq!(events.as_slice(), session.events());
    let from_json = replay::replay(&events).expect("replay");
    let live = replay::replay(session.events()).expect("replay");
    snapshot::assert_snapshot_eq(&live, &from_json, OutlineOptions { ignore_ids: false });
}

#![no_main]

//! Each input byte pair is one edit; a zero opcode ends the current host
//! callback. The replayed log must match the live tree after every callback.

use dom::{Dom, HostTree, NodeRef, NodeType, el, text};
use libfuzzer_sys::fuzz_target;
use recorder::{EventLog, Recorder, RecorderConfig};
use replay::Replayer;
use snapshot::{Mirror, OutlineOptions, SerializeScope, Serializer};

const TAGS: [&str; 5] = ["div", "ul", "li", "p", "span"];
const WORDS: [&str; 4] = ["a", "bb", "ccc", ""];

fn pick<T: Copy>(items: &[T], byte: u8) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[byte as usize % items.len()])
    }
}

fn nodes(dom: &Dom, doc: NodeRef) -> (Vec<NodeRef>, Vec<NodeRef>) {
    let mut containers = Vec::new();
    let mut movable = Vec::new();
    for node in dom::traverse::composed_descendants(dom, doc) {
        match dom.node_type(node) {
            NodeType::ShadowRoot => containers.push(node),
            NodeType::Text => movable.push(node),
            NodeType::Element => match dom.tag_name(node).unwrap_or_default() {
                "html" | "head" => {}
                "body" => containers.push(node),
                _ => {
                    containers.push(node);
                    movable.push(node);
                }
            },
            _ => {}
        }
    }
    (containers, movable)
}

fn is_composed_ancestor(dom: &Dom, node: NodeRef, of: NodeRef) -> bool {
    let mut current = Some(of);
    while let Some(n) = current {
        if n == node {
            return true;
        }
        current = dom.composed_parent(n);
    }
    false
}

fn edit(dom: &mut Dom, doc: NodeRef, op: u8, arg: u8) {
    let (containers, movable) = nodes(dom, doc);
    let word = pick(&WORDS, arg).unwrap_or_default();
    match op % 8 {
        1 => {
            if let (Some(parent), Some(tag)) = (pick(&containers, arg), pick(&TAGS, op / 8)) {
                let _ = dom.append_spec(parent, &el(tag).child(text(word)));
            }
        }
        2 => {
            if let Some(node) = pick(&movable, arg) {
                dom.remove(node);
            }
        }
        3 => {
            if let (Some(node), Some(parent)) = (pick(&movable, arg), pick(&containers, op))
                && !is_composed_ancestor(dom, node, parent)
            {
                let reference = pick(dom.children(parent), arg / 2).filter(|r| *r != node);
                let _ = dom.insert_before(parent, node, reference);
            }
        }
        4 => {
            if let Some(node) = pick(&movable, arg) {
                let _ = dom.set_attribute(node, "title", word);
            }
        }
        5 => {
            if let Some(node) = pick(&movable, arg) {
                let _ = dom.set_character_data(node, word);
            }
        }
        6 => {
            if let Some(host) = pick(&movable, arg)
                && dom.is_element_named(host, "div")
                && let Ok(shadow) = dom.attach_shadow(host)
            {
                let _ = dom.append_spec(shadow, &el("p").child(text(word)));
            }
        }
        _ => {
            if let Some(node) = pick(&movable, arg) {
                let _ = dom.remove_attribute(node, "title");
            }
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let mut dom = Dom::new();
    let observer = dom.observe();
    let doc = dom.build_document(
        Some("https://fuzz.example/"),
        &[el("html")
            .child(el("head"))
            .child(el("body").child(el("div").child(text("seed"))))],
    );
    observer.take_records();

    let config = RecorderConfig::default();
    let mut recorder = Recorder::new(config.clone(), EventLog::new());
    recorder.start(&dom, doc).expect("start");
    let mut replayer = Replayer::new();
    let mut applied = 0;

    let mut chunks = data.chunks_exact(2).peekable();
    while chunks.peek().is_some() {
        for pair in chunks.by_ref() {
            if pair[0] == 0 {
                break;
            }
            edit(&mut dom, doc, pair[0], pair[1]);
        }
        recorder
            .on_mutations(&dom, &observer.take_records())
            .expect("mutations");

        let events = recorder.sink().events();
        for event in &events[applied..] {
            replayer.apply_event(event).expect("replay");
        }
        applied = events.len();

        let live = Serializer::new(&dom, &config.privacy, &config.serialize)
            .serialize(
                &mut Mirror::new(),
                doc,
                SerializeScope::document(&config.serialize),
            )
            .expect("serialize")
            .expect("document")
            .node;
        let replayed = replayer.materialize().expect("materialize");
        snapshot::assert_snapshot_eq(&live, &replayed, OutlineOptions::default());
    }
});

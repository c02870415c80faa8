//! Seeded random edit sessions: after every host callback the replayed log
//! must match a fresh serialization of the live document.

use dom::{Dom, HostTree, NodeRef, NodeSpec, NodeType, el, text};
use recorder::{EventLog, ManualClock, Recorder, RecorderConfig};
use replay::Replayer;
use snapshot::{Mirror, OutlineOptions, SerializeScope, Serializer, SnapshotNode};

const DEFAULT_SEEDS_CI: usize = 64;
const DEFAULT_SEEDS_LOCAL: usize = 16;
const DEFAULT_STEPS: usize = 40;

const CONTAINERS: [&str; 6] = ["div", "section", "ul", "li", "p", "span"];
const WORDS: [&str; 6] = ["alpha", "beta", "gamma", "inbox", "card", "x"];
const ATTRIBUTES: [&str; 3] = ["title", "data-k", "class"];

fn seed_count() -> usize {
    if let Ok(value) = std::env::var("DOMTAPE_SOAK_SEEDS")
        && let Ok(parsed) = value.parse::<usize>()
        && parsed > 0
    {
        return parsed;
    }
    if std::env::var("CI").is_ok() {
        DEFAULT_SEEDS_CI
    } else {
        DEFAULT_SEEDS_LOCAL
    }
}

fn step_count() -> usize {
    if let Ok(value) = std::env::var("DOMTAPE_SOAK_STEPS")
        && let Ok(parsed) = value.parse::<usize>()
        && parsed > 0
    {
        return parsed;
    }
    DEFAULT_STEPS
}

struct LcgRng {
    state: u64,
}

impl LcgRng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0x9e3779b97f4a7c15 } else { seed };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    fn gen_range_usize(&mut self, start: usize, end: usize) -> usize {
        assert!(start < end, "invalid range: {start}..{end}");
        let span = (end - start) as u64;
        (self.next_u64() % span) as usize + start
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> Option<T> {
        if items.is_empty() {
            return None;
        }
        Some(items[self.gen_range_usize(0, items.len())])
    }
}

struct Candidates {
    containers: Vec<NodeRef>,
    movable: Vec<NodeRef>,
    elements: Vec<NodeRef>,
    texts: Vec<NodeRef>,
    inputs: Vec<NodeRef>,
    hosts: Vec<NodeRef>,
}

fn candidates(dom: &Dom, doc: NodeRef) -> Candidates {
    let mut out = Candidates {
        containers: Vec::new(),
        movable: Vec::new(),
        elements: Vec::new(),
        texts: Vec::new(),
        inputs: Vec::new(),
        hosts: Vec::new(),
    };
    for node in dom::traverse::composed_descendants(dom, doc) {
        match dom.node_type(node) {
            NodeType::ShadowRoot => out.containers.push(node),
            NodeType::Text => {
                out.texts.push(node);
                out.movable.push(node);
            }
            NodeType::Comment => out.movable.push(node),
            NodeType::Element => {
                let tag = dom.tag_name(node).unwrap_or_default();
                if matches!(tag, "html" | "head" | "body") {
                    out.containers.extend((tag == "body").then_some(node));
                    continue;
                }
                out.elements.push(node);
                out.movable.push(node);
                if CONTAINERS.contains(&tag) {
                    out.containers.push(node);
                }
                if matches!(tag, "div" | "section") {
                    out.hosts.push(node);
                }
                if tag == "input" {
                    out.inputs.push(node);
                }
            }
            _ => {}
        }
    }
    out
}

fn random_spec(rng: &mut LcgRng, depth: usize) -> NodeSpec {
    let word = rng.pick(&WORDS).unwrap_or("x");
    match rng.gen_range_usize(0, 6) {
        0 => text(word),
        1 => el("input").attr("type", "text").attr("value", word),
        2 => dom::comment(word),
        _ => {
            let tag = rng.pick(&CONTAINERS).unwrap_or("div");
            let mut spec = el(tag).attr("data-k", word);
            if depth < 2 {
                for _ in 0..rng.gen_range_usize(0, 3) {
                    spec = spec.child(random_spec(rng, depth + 1));
                }
            } else {
                spec = spec.child(text(word));
            }
            spec
        }
    }
}

/// True when `node` is `target` or one of its composed ancestors.
fn composed_contains(dom: &Dom, node: NodeRef, target: NodeRef) -> bool {
    let mut current = Some(target);
    while let Some(n) = current {
        if n == node {
            return true;
        }
        current = dom.composed_parent(n);
    }
    false
}

fn random_edit(rng: &mut LcgRng, dom: &mut Dom, doc: NodeRef, detached: &mut Vec<NodeRef>) {
    let c = candidates(dom, doc);
    let word = rng.pick(&WORDS).unwrap_or("x");
    // Failed edits (cycles, wrong node kinds) leave the tree untouched.
    match rng.gen_range_usize(0, 11) {
        0 => {
            if let Some(parent) = rng.pick(&c.containers) {
                let spec = random_spec(rng, 0);
                let _ = dom.append_spec(parent, &spec);
            }
        }
        1 => {
            if let Some(parent) = rng.pick(&c.containers) {
                let reference = rng.pick(dom.children(parent));
                let node = dom.build(&text(word));
                let _ = dom.insert_before(parent, node, reference);
            }
        }
        2 => {
            if let Some(node) = rng.pick(&c.movable) {
                dom.remove(node);
                detached.push(node);
            }
        }
        3 => {
            if let (Some(node), Some(parent)) = (rng.pick(&c.movable), rng.pick(&c.containers))
                && !composed_contains(dom, node, parent)
            {
                let reference = rng.pick(dom.children(parent)).filter(|r| *r != node);
                let _ = dom.insert_before(parent, node, reference);
            }
        }
        4 => {
            if let (Some(node), Some(name)) = (rng.pick(&c.elements), rng.pick(&ATTRIBUTES)) {
                let _ = dom.set_attribute(node, name, word);
            }
        }
        5 => {
            if let (Some(node), Some(name)) = (rng.pick(&c.elements), rng.pick(&ATTRIBUTES)) {
                let _ = dom.remove_attribute(node, name);
            }
        }
        6 => {
            if let Some(node) = rng.pick(&c.texts) {
                let _ = dom.set_character_data(node, word);
            }
        }
        7 => {
            if let Some(node) = rng.pick(&c.inputs) {
                let _ = dom.set_value(node, word);
            }
        }
        8 => {
            if let Some(host) = rng.pick(&c.hosts)
                && let Ok(shadow) = dom.attach_shadow(host)
            {
                let spec = random_spec(rng, 1);
                let _ = dom.append_spec(shadow, &spec);
            }
        }
        9 => {
            if let Some(parent) = rng.pick(&c.containers) {
                let node = dom.build(&el("div").child(text(word)));
                let _ = dom.set_attribute(node, "title", "built offline");
                let _ = dom.append_child(parent, node);
            }
        }
        _ => {
            if let (Some(node), Some(parent)) = (detached.pop(), rng.pick(&c.containers))
                && !dom.is_connected(node)
                && !composed_contains(dom, node, parent)
            {
                let _ = dom.append_child(parent, node);
            }
        }
    }
}

fn live_snapshot(dom: &Dom, doc: NodeRef, config: &RecorderConfig) -> SnapshotNode {
    Serializer::new(dom, &config.privacy, &config.serialize)
        .serialize(
            &mut Mirror::new(),
            doc,
            SerializeScope::document(&config.serialize),
        )
        .expect("serialize")
        .expect("document")
        .node
}

fn run_seed(seed: u64, steps: usize) {
    let mut rng = LcgRng::new(seed);
    let mut dom = Dom::new();
    let observer = dom.observe();
    let doc = dom.build_document(
        Some("https://soak.example/"),
        &[el("html").child(el("head")).child(
            el("body")
                .child(el("div").attr("id", "app").child(text("start")))
                .child(el("ul").child(el("li").child(text("one")))),
        )],
    );
    observer.take_records();

    let config = RecorderConfig::default();
    let clock = ManualClock::new();
    let mut recorder =
        Recorder::new(config.clone(), EventLog::new()).with_clock(clock.clone());
    recorder.start(&dom, doc).expect("start");

    let mut replayer = Replayer::new();
    let mut applied = 0;
    let mut detached = Vec::new();
    for step in 0..steps {
        for _ in 0..rng.gen_range_usize(1, 6) {
            random_edit(&mut rng, &mut dom, doc, &mut detached);
        }
        clock.advance(16);
        let records = observer.take_records();
        recorder
            .on_mutations(&dom, &records)
            .unwrap_or_else(|err| panic!("seed {seed} step {step}: {err}"));
        if rng.gen_range_usize(0, 20) == 0 {
            recorder.take_checkpoint(&dom).expect("checkpoint");
        }

        let events = recorder.sink().events();
        for event in &events[applied..] {
            replayer
                .apply_event(event)
                .unwrap_or_else(|err| panic!("seed {seed} step {step}: {err}"));
        }
        applied = events.len();

        let replayed = replayer.materialize().expect("materialize");
        let live = live_snapshot(&dom, doc, &config);
        if let Err(mismatch) =
            snapshot::compare_snapshots(&live, &replayed, OutlineOptions::default())
        {
            panic!("seed {seed} step {step}: {mismatch}");
        }
    }
    assert_eq!(recorder.pending_inserts(), 0, "seed {seed}");
}

#[test]
fn random_edit_sessions_replay_to_the_live_tree() {
    let steps = step_count();
    for seed in 0..seed_count() as u64 {
        run_seed(seed, steps);
    }
}

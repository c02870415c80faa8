//! Records a scripted editing session against an in-memory document and
//! prints the event log as JSON lines.
//!
//! Usage: `domtape [config.toml]`. Set `DOMTAPE_LOG=debug` for diagnostics on
//! stderr.

use dom::{Dom, HostTree, NodeRef, el, text};
use log::{LevelFilter, Log, Metadata, Record};
use mimalloc::MiMalloc;
use recorder::{EventLog, Recorder, RecorderConfig};
use snapshot::{Mirror, OutlineOptions, PointerKind, SerializeScope, Serializer};
use std::error::Error;
use std::io::Write;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("[{} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn main() {
    if let Err(err) = run() {
        eprintln!("domtape: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let level = std::env::var("DOMTAPE_LOG")
        .ok()
        .and_then(|value| value.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Warn);
    log::set_logger(&LOGGER).map_err(|err| err.to_string())?;
    log::set_max_level(level);

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let source = std::fs::read_to_string(&path)?;
            let config = RecorderConfig::from_toml_str(&source)?;
            config.validate()?;
            config
        }
        None => RecorderConfig::default(),
    };

    let (log, page) = record_session(config.clone())?;
    verify(&log, &page, &config)?;

    let mut out = std::io::stdout().lock();
    out.write_all(log.to_json_lines()?.as_bytes())?;
    out.flush()?;
    Ok(())
}

struct Page {
    dom: Dom,
    doc: NodeRef,
}

impl Page {
    fn new() -> Self {
        let mut dom = Dom::new();
        let doc = dom.build_document(
            Some("https://mail.example/inbox"),
            &[el("html")
                .child(el("head").child(el("title").child(text("Inbox"))))
                .child(
                    el("body")
                        .child(el("h1").attr("id", "status").child(text("3 unread")))
                        .child(
                            el("ul")
                                .attr("id", "messages")
                                .child(el("li").attr("id", "m1").child(text("Welcome")))
                                .child(el("li").attr("id", "m2").child(text("Invoice #42"))),
                        )
                        .child(
                            el("form")
                                .child(el("input").attr("type", "email").attr("id", "user"))
                                .child(el("input").attr("type", "password").attr("id", "pass")),
                        )
                        .child(el("div").attr("id", "widget"))
                        .child(el("iframe").attr("id", "preview")),
                )],
        );
        Self { dom, doc }
    }

    fn find(&self, id: &str) -> Result<NodeRef, String> {
        dom::traverse::find_element_by_id(&self.dom, self.doc, id)
            .ok_or_else(|| format!("no element #{id}"))
    }
}

fn record_session(config: RecorderConfig) -> Result<(EventLog, Page), Box<dyn Error>> {
    let mut page = Page::new();
    let widget = page.find("widget")?;
    let shadow = page.dom.attach_shadow(widget)?;
    page.dom
        .append_spec(shadow, &el("button").child(text("Compose")))?;

    let observer = page.dom.observe();
    let mut recorder = Recorder::new(config, EventLog::new());
    recorder.start(&page.dom, page.doc)?;

    let pass = page.find("pass")?;
    page.dom.set_value(pass, "correct horse")?;
    recorder.on_mutations(&page.dom, &observer.take_records())?;
    recorder.record_input(&page.dom, pass);

    let messages = page.find("messages")?;
    let first = page.find("m1")?;
    let fresh = page
        .dom
        .build(&el("li").attr("id", "m3").child(text("Lunch?")));
    page.dom.insert_before(messages, fresh, Some(first))?;
    let second = page.find("m2")?;
    page.dom.insert_before(messages, second, Some(fresh))?;
    let status = page.find("status")?;
    if let Some(&label) = page.dom.children(status).first() {
        page.dom.set_character_data(label, "2 unread")?;
    }
    recorder.on_mutations(&page.dom, &observer.take_records())?;
    recorder.record_pointer(PointerKind::Click, second, 120.0, 48.0);

    let preview = page.find("preview")?;
    let inner = page
        .dom
        .load_frame(preview, Some("https://mail.example/preview/42"))?;
    page.dom.append_spec(
        inner,
        &el("html").child(el("body").child(el("p").child(text("Amount due: 42")))),
    )?;
    recorder.on_mutations(&page.dom, &observer.take_records())?;

    page.dom
        .append_spec(shadow, &el("span").attr("class", "badge").child(text("1")))?;
    recorder.add_custom_marker("opened-preview", serde_json::json!({ "message": 42 }))?;
    recorder.stop(&page.dom, &observer.take_records())?;

    log::info!(target: "domtape", "recorded: {:?}", recorder.stats());
    Ok((recorder.into_sink(), page))
}

/// Replay the log from scratch and compare it with the document it was
/// recorded from.
fn verify(log: &EventLog, page: &Page, config: &RecorderConfig) -> Result<(), Box<dyn Error>> {
    let replayed = replay::replay(log.events())?;
    let live = Serializer::new(&page.dom, &config.privacy, &config.serialize)
        .serialize(
            &mut Mirror::new(),
            page.doc,
            SerializeScope::document(&config.serialize),
        )?
        .ok_or("document not serialized")?
        .node;
    snapshot::compare_snapshots(&live, &replayed, OutlineOptions::default())
        .map_err(|mismatch| mismatch.to_string())?;
    log::info!(
        target: "domtape",
        "replay of {} events matches the live document ({} nodes)",
        log.len(),
        replayed.node_count()
    );
    Ok(())
}

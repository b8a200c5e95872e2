//! IIS `web.config` renderer.
//!
//! The document is streamed through `quick-xml` and every foreign event is
//! written back as read. Under `configuration/system.webServer/httpProtocol/customHeaders`
//! the headers live between two comment markers; that region is dropped and
//! rebuilt on every write. Missing path levels are created.
//!
//! IIS refuses duplicate `<add name>` entries, so a foreign `<add>` whose name
//! collides with a managed header is removed and the managed block takes it over.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::services::policy::ResolvedHeaderEntry;
use crate::services::static_config::managed::{ManagedRegion, SpliceError};

const PATH: [&str; 4] = [
    "configuration",
    "system.webServer",
    "httpProtocol",
    "customHeaders",
];

const BEGIN_MARKER: &str = "BEGIN httpheader";
const END_MARKER: &str = "END httpheader";
const INDENT: &str = "  ";
const BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, Default)]
pub struct WebConfig;

impl ManagedRegion for WebConfig {
    fn rules(&self, headers: &[&ResolvedHeaderEntry]) -> String {
        let layout = Layout { newline: "\n" };
        let mut events = layout.tree(&PATH[1..], 0, headers);
        events.push(layout.text(0));
        serialize(events).unwrap_or_default()
    }

    fn splice(&self, existing: &str, headers: &[&ResolvedHeaderEntry]) -> Result<String, SpliceError> {
        let (bom, body) = match existing.strip_prefix(BOM) {
            Some(rest) => (true, rest),
            None => (false, existing),
        };

        let layout = Layout {
            newline: if body.contains("\r\n") { "\r\n" } else { "\n" },
        };

        let events = parse(body)?;
        let chain = locate(&events);

        let Some(deepest) = chain.last() else {
            return Err(SpliceError("missing <configuration> root element".into()));
        };
        let depth = chain.len() - 1;
        let existing_levels = chain.len();

        let names: Vec<String> = headers
            .iter()
            .map(|e| e.name().to_ascii_lowercase())
            .collect();

        let mut out: Vec<Event<'static>> = Vec::with_capacity(events.len() + headers.len() * 2 + 8);
        out.extend_from_slice(&events[..deepest.index]);

        match &events[deepest.index] {
            Event::Start(start) => out.push(Event::Start(start.clone())),
            Event::Empty(start) => out.push(Event::Start(reopen(start))),
            _ => return Err(SpliceError("unexpected node at managed path".into())),
        }

        let mut children = match deepest.end {
            Some(end) => events[deepest.index + 1..end].to_vec(),
            None => Vec::new(),
        };

        let inner = if existing_levels == PATH.len() {
            children = strip_managed(children, &names);
            layout.block(depth, headers)
        } else {
            let mut tree = layout.tree(&PATH[existing_levels..], depth + 1, headers);
            tree.push(layout.text(depth));
            tree
        };

        match children.last_mut() {
            Some(last) if is_whitespace(last) => *last = layout.text(depth + 1),
            _ => children.push(layout.text(depth + 1)),
        }
        out.extend(children);
        out.extend(inner);
        out.push(Event::End(BytesEnd::new(PATH[depth])));

        let rest = match deepest.end {
            Some(end) => end + 1,
            None => deepest.index + 1,
        };
        out.extend_from_slice(&events[rest..]);

        let mut xml = serialize(out)?;
        if bom {
            xml.insert(0, BOM);
        }
        Ok(xml)
    }
}

#[derive(Debug, Clone, Copy)]
struct Located {
    index: usize,
    // `None` for `<element />`.
    end: Option<usize>,
}

struct Layout {
    newline: &'static str,
}

impl Layout {
    fn text(&self, depth: usize) -> Event<'static> {
        Event::Text(BytesText::from_escaped(format!(
            "{}{}",
            self.newline,
            INDENT.repeat(depth)
        )))
    }

    /// Managed region for a `customHeaders` element at `depth`, closing whitespace included.
    fn block(&self, depth: usize, headers: &[&ResolvedHeaderEntry]) -> Vec<Event<'static>> {
        let mut events = Vec::with_capacity(headers.len() * 2 + 4);
        events.push(Event::Comment(BytesText::from_escaped(format!(" {BEGIN_MARKER} "))));
        for entry in headers {
            events.push(self.text(depth + 1));
            events.push(Event::Empty(
                BytesStart::new("add")
                    .with_attributes([("name", entry.name()), ("value", entry.value.as_str())]),
            ));
        }
        events.push(self.text(depth + 1));
        events.push(Event::Comment(BytesText::from_escaped(format!(" {END_MARKER} "))));
        events.push(self.text(depth));
        events
    }

    /// New elements for `levels`, the first one opening at `depth`.
    fn tree(&self, levels: &[&'static str], depth: usize, headers: &[&ResolvedHeaderEntry]) -> Vec<Event<'static>> {
        let name = levels[0];
        let mut events = vec![Event::Start(BytesStart::new(name)), self.text(depth + 1)];
        if levels.len() == 1 {
            events.extend(self.block(depth, headers));
        } else {
            events.extend(self.tree(&levels[1..], depth + 1, headers));
            events.push(self.text(depth));
        }
        events.push(Event::End(BytesEnd::new(name)));
        events
    }
}

fn parse(xml: &str) -> Result<Vec<Event<'static>>, SpliceError> {
    let mut reader = Reader::from_str(xml);
    let mut events = Vec::new();
    let mut open = 0usize;

    loop {
        let event = reader.read_event().map_err(|e| {
            SpliceError(format!(
                "malformed XML near byte {}: {e}",
                reader.buffer_position()
            ))
        })?;

        match &event {
            Event::Eof => break,
            Event::Start(_) => open += 1,
            Event::End(_) => {
                open = open
                    .checked_sub(1)
                    .ok_or_else(|| SpliceError("unexpected closing tag".into()))?;
            }
            _ => {}
        }
        events.push(event.into_owned());
    }

    if open != 0 {
        return Err(SpliceError("unclosed element at end of document".into()));
    }
    Ok(events)
}

/// First occurrence of each level of `PATH`, as deep as it goes.
fn locate(events: &[Event<'static>]) -> Vec<Located> {
    let mut chain: Vec<Located> = Vec::new();
    // One slot per open element: the `PATH` level it matched, if any.
    let mut stack: Vec<Option<usize>> = Vec::new();

    for (index, event) in events.iter().enumerate() {
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let level = chain.len();
                let matched = level < PATH.len()
                    && stack.len() == level
                    && stack.iter().all(Option::is_some)
                    && e.name().as_ref() == PATH[level].as_bytes();

                if matched {
                    chain.push(Located { index, end: None });
                }
                if matches!(event, Event::Start(_)) {
                    stack.push(matched.then_some(level));
                }
            }
            Event::End(_) => {
                if let Some(Some(level)) = stack.pop() {
                    chain[level].end = Some(index);
                }
            }
            _ => {}
        }
    }

    chain
}

/// Drop the previous managed region and any foreign `<add>` that collides with `names`.
fn strip_managed(children: Vec<Event<'static>>, names: &[String]) -> Vec<Event<'static>> {
    let mut kept: Vec<Event<'static>> = Vec::with_capacity(children.len());
    let mut depth = 0usize;
    let mut in_block = false;
    let mut dropping_element = false;
    let mut drop_next_whitespace = false;

    for event in children {
        if dropping_element || in_block {
            match &event {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if dropping_element && depth == 0 {
                        dropping_element = false;
                    }
                }
                Event::Comment(_) if in_block && depth == 0 && is_marker(&event, END_MARKER) => {
                    in_block = false;
                    drop_next_whitespace = true;
                }
                _ => {}
            }
            continue;
        }

        if drop_next_whitespace {
            drop_next_whitespace = false;
            if is_whitespace(&event) {
                continue;
            }
        }

        if depth == 0 {
            if is_marker(&event, BEGIN_MARKER) {
                in_block = true;
                continue;
            }
            match &event {
                Event::Empty(e) if collides(e, names) => {
                    pop_whitespace(&mut kept);
                    continue;
                }
                Event::Start(e) if collides(e, names) => {
                    pop_whitespace(&mut kept);
                    dropping_element = true;
                    depth += 1;
                    continue;
                }
                _ => {}
            }
        }

        match &event {
            Event::Start(_) => depth += 1,
            Event::End(_) => depth = depth.saturating_sub(1),
            _ => {}
        }
        kept.push(event);
    }

    kept
}

/// `<name attr="v" />` as an opening tag, without the space before `/>`.
fn reopen(start: &BytesStart<'_>) -> BytesStart<'static> {
    let name_len = start.name().as_ref().len();
    let content = String::from_utf8_lossy(start).trim_end().to_string();
    BytesStart::from_content(content, name_len)
}

fn collides(element: &BytesStart<'_>, names: &[String]) -> bool {
    if element.name().as_ref() != b"add" {
        return false;
    }
    let Ok(Some(attr)) = element.try_get_attribute("name") else {
        return false;
    };
    let name = String::from_utf8_lossy(&attr.value).trim().to_ascii_lowercase();
    names.contains(&name)
}

fn is_marker(event: &Event<'_>, marker: &str) -> bool {
    match event {
        Event::Comment(text) => String::from_utf8_lossy(text).trim() == marker,
        _ => false,
    }
}

fn is_whitespace(event: &Event<'_>) -> bool {
    match event {
        Event::Text(text) => text.iter().all(u8::is_ascii_whitespace),
        _ => false,
    }
}

fn pop_whitespace(events: &mut Vec<Event<'static>>) {
    if events.last().is_some_and(is_whitespace) {
        events.pop();
    }
}

fn serialize(events: Vec<Event<'static>>) -> Result<String, SpliceError> {
    let mut writer = Writer::new(Vec::new());
    for event in events {
        writer
            .write_event(event)
            .map_err(|e| SpliceError(format!("failed to write XML: {e}")))?;
    }
    String::from_utf8(writer.into_inner())
        .map_err(|e| SpliceError(format!("written XML is not UTF-8: {e}")))
}

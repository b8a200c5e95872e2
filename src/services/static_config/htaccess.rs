//! Apache `.htaccess` renderer.

use crate::services::policy::ResolvedHeaderEntry;
use crate::services::static_config::managed::{ManagedRegion, SpliceError};

pub const BEGIN_MARKER: &str = "# BEGIN httpheader";
pub const END_MARKER: &str = "# END httpheader";

#[derive(Debug, Clone, Copy, Default)]
pub struct Htaccess;

impl Htaccess {
    fn block(headers: &[&ResolvedHeaderEntry]) -> Vec<String> {
        let mut lines = Vec::with_capacity(headers.len() + 4);
        lines.push(BEGIN_MARKER.to_string());
        lines.push("<IfModule mod_headers.c>".to_string());
        for entry in headers {
            lines.push(format!(
                "  Header set {} \"{}\"",
                entry.name(),
                escape(&entry.value)
            ));
        }
        lines.push("</IfModule>".to_string());
        lines.push(END_MARKER.to_string());
        lines
    }
}

impl ManagedRegion for Htaccess {
    fn rules(&self, headers: &[&ResolvedHeaderEntry]) -> String {
        let mut rules = Self::block(headers).join("\n");
        rules.push('\n');
        rules
    }

    fn splice(&self, existing: &str, headers: &[&ResolvedHeaderEntry]) -> Result<String, SpliceError> {
        let newline = newline_of(existing);

        // Foreign lines keep their own terminators; only generated lines use `newline`.
        let mut kept: Vec<&str> = Vec::new();
        let mut block_at: Option<usize> = None;
        let mut inside = false;

        for (number, line) in existing.split_inclusive('\n').enumerate() {
            let trimmed = line.trim();
            if inside {
                if trimmed == END_MARKER {
                    inside = false;
                }
                continue;
            }
            if trimmed == BEGIN_MARKER {
                if block_at.is_some() {
                    return Err(SpliceError(format!(
                        "duplicate managed block starting at line {}",
                        number + 1
                    )));
                }
                block_at = Some(kept.len());
                inside = true;
                continue;
            }
            if trimmed == END_MARKER {
                return Err(SpliceError(format!(
                    "managed block end without start at line {}",
                    number + 1
                )));
            }
            kept.push(line);
        }

        if inside {
            return Err(SpliceError("managed block is never closed".into()));
        }

        let block = if headers.is_empty() {
            Vec::new()
        } else {
            Self::block(headers)
        };

        if block_at.is_none() && block.is_empty() {
            return Ok(existing.to_string());
        }

        let mut out = String::with_capacity(existing.len() + block.len() * 64);
        match block_at {
            Some(at) => {
                out.extend(kept[..at].iter().copied());
                push_lines(&mut out, &block, newline);
                out.extend(kept[at..].iter().copied());
            }
            None => {
                while kept.last().is_some_and(|line| line.trim().is_empty()) {
                    kept.pop();
                }
                out.extend(kept.iter().copied());
                if !out.is_empty() {
                    if !out.ends_with('\n') {
                        out.push_str(newline);
                    }
                    out.push_str(newline);
                }
                push_lines(&mut out, &block, newline);
            }
        }

        Ok(out)
    }
}

/// Line ending of the file's first line, LF when there is none.
fn newline_of(text: &str) -> &'static str {
    match text.find('\n') {
        Some(at) if text[..at].ends_with('\r') => "\r\n",
        _ => "\n",
    }
}

fn push_lines(out: &mut String, lines: &[String], newline: &str) {
    for line in lines {
        out.push_str(line);
        out.push_str(newline);
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

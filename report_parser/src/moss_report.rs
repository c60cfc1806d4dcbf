//! MOSS-dialect span extraction from one side's match frame.
//!
//! The frame renders the submission inside `<PRE>` with marked regions
//! wrapped in paired `<FONT color=...>` / `</FONT>` markers preceded by an
//! `<A NAME=..>` anchor. The dialect only ever marks whole-line boundaries,
//! so spans normally begin at column 1 and end one past the last character
//! of the closing line; when one region ends exactly where the next begins
//! on the same line, the boundary column splits them.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ParseError;
use crate::spans::{RawSpan, SpanPos};

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<A\s+NAME\s*=\s*"?(?P<name>\w+)"?\s*>"#).unwrap())
}

fn font_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<FONT\s+color\s*=\s*(?P<color>#[0-9A-Fa-f]{6})\s*>").unwrap()
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap())
}

/// Character count of a frame line once markup is stripped.
fn stripped_len(line: &str) -> u32 {
    let stripped = tag_re().replace_all(line, "");
    decode_entities(&stripped).chars().count() as u32
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Extracts raw spans from one match frame. `other` is the display id of the
/// opposite side, attached to every span so the merge step can accumulate
/// contributors per region.
pub fn extract_spans(frame_html: &str, other: &str) -> Result<Vec<RawSpan>, ParseError> {
    let mut lines = frame_html.lines();

    // Skip to the <PRE> block; everything before it is page chrome.
    let mut found_pre = false;
    for line in lines.by_ref() {
        if line.to_ascii_uppercase().contains("<PRE>") {
            found_pre = true;
            break;
        }
    }
    if !found_pre {
        return Err(ParseError::corrupted("match frame has no <PRE> block"));
    }

    let mut out = Vec::new();
    let mut source_line: u32 = 0;
    let mut open: Option<(SpanPos, String, String)> = None; // (begin, color, anchor)
    let mut pending_anchor: Option<String> = None;
    let mut closed_pre = false;

    for line in lines {
        if line.to_ascii_uppercase().contains("</PRE>") {
            closed_pre = true;
            break;
        }
        source_line += 1;

        if let Some(caps) = anchor_re().captures(line) {
            pending_anchor = Some(caps["name"].to_string());
        }

        let open_caps = font_open_re().captures(line);
        let open_at = open_caps
            .as_ref()
            .and_then(|c| c.get(0))
            .map(|m| m.start());
        let close_at = line.find("</FONT>");

        // One region may end exactly where the next begins, putting the
        // close before a new open on the same line.
        let close_first = matches!((close_at, open_at), (Some(c), Some(o)) if c < o);
        if close_first {
            close_span(&mut open, &mut out, line, close_at, source_line, other)?;
        }

        if let Some(caps) = open_caps {
            if open.is_some() {
                return Err(ParseError::corrupted(format!(
                    "nested <FONT> marker at frame line {source_line}"
                )));
            }
            let color = caps["color"].to_ascii_lowercase();
            let anchor = pending_anchor.take().unwrap_or_else(|| "0".into());
            let begin_ch = match open_at {
                Some(o) => stripped_len(&line[..o]) + 1,
                None => 1,
            };
            open = Some((SpanPos::new(source_line, begin_ch), color, anchor));
        }

        if close_at.is_some() && !close_first {
            close_span(&mut open, &mut out, line, close_at, source_line, other)?;
        }
    }

    if !closed_pre {
        return Err(ParseError::corrupted("match frame truncated before </PRE>"));
    }
    if open.is_some() {
        return Err(ParseError::corrupted("unterminated <FONT> marker in frame"));
    }
    Ok(out)
}

/// Closes the currently open region at `close_at` on this line. The end
/// column counts the stripped characters before the close marker, one past
/// the last included column.
fn close_span(
    open: &mut Option<(SpanPos, String, String)>,
    out: &mut Vec<RawSpan>,
    line: &str,
    close_at: Option<usize>,
    source_line: u32,
    other: &str,
) -> Result<(), ParseError> {
    let Some((begin, color, anchor)) = open.take() else {
        return Err(ParseError::corrupted(format!(
            "</FONT> without matching open at frame line {source_line}"
        )));
    };
    let end_ch = match close_at {
        Some(c) => stripped_len(&line[..c]) + 1,
        None => stripped_len(line) + 1,
    };
    out.push(RawSpan {
        begin,
        end: SpanPos::new(source_line, end_ch),
        other: other.to_string(),
        color,
        anchor,
    });
    Ok(())
}

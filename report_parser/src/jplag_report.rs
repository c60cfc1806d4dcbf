//! JPlag-dialect span extraction with exact character offsets.
//!
//! This dialect renders the submission inside `<pre>` and wraps matched
//! regions in nested inline `<span data-anchor=.. data-color=..>` markup, so
//! begin/end columns are exact. Offsets are recovered by a small scanner that
//! walks the markup character by character: tags take no space, entities
//! count as one character, newlines advance the line counter.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ParseError;
use crate::spans::{RawSpan, SpanPos};

fn anchor_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"data-anchor\s*=\s*"(?P<a>[^"]*)""#).unwrap())
}

fn color_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"data-color\s*=\s*"(?P<c>#[0-9A-Fa-f]{6})""#).unwrap())
}

/// Extracts raw spans from one side's match frame. `other` is the display id
/// of the opposite side.
pub fn extract_spans(frame_html: &str, other: &str) -> Result<Vec<RawSpan>, ParseError> {
    let lower = frame_html.to_ascii_lowercase();
    let pre_open = lower
        .find("<pre>")
        .ok_or_else(|| ParseError::corrupted("match frame has no <pre> block"))?;
    let body_start = pre_open + "<pre>".len();
    let pre_close = lower[body_start..]
        .find("</pre>")
        .map(|i| body_start + i)
        .ok_or_else(|| ParseError::corrupted("match frame truncated before </pre>"))?;

    let mut body = &frame_html[body_start..pre_close];
    // A newline directly after <pre> is markup convention, not content.
    if let Some(rest) = body.strip_prefix('\n') {
        body = rest;
    }

    let mut line: u32 = 1;
    let mut col: u32 = 1;
    let mut stack: Vec<(SpanPos, String, String)> = Vec::new();
    let mut out = Vec::new();

    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '<' => {
                let rest = &body[i..];
                let close = rest
                    .find('>')
                    .ok_or_else(|| ParseError::corrupted("unterminated tag in match frame"))?;
                let tag = &rest[..=close];
                // Consume the tag body without advancing the text position.
                while let Some(&(j, _)) = chars.peek() {
                    if j > i + close {
                        break;
                    }
                    chars.next();
                }

                let tag_lower = tag.to_ascii_lowercase();
                if tag_lower.starts_with("<span") {
                    let color = color_attr_re()
                        .captures(tag)
                        .map(|c| c["c"].to_ascii_lowercase())
                        .ok_or_else(|| {
                            ParseError::corrupted("match span without data-color attribute")
                        })?;
                    let anchor = anchor_attr_re()
                        .captures(tag)
                        .map(|c| c["a"].to_string())
                        .unwrap_or_else(|| "0".into());
                    stack.push((SpanPos::new(line, col), color, anchor));
                } else if tag_lower.starts_with("</span") {
                    let Some((begin, color, anchor)) = stack.pop() else {
                        return Err(ParseError::corrupted(
                            "</span> without matching open in match frame",
                        ));
                    };
                    out.push(RawSpan {
                        begin,
                        end: SpanPos::new(line, col),
                        other: other.to_string(),
                        color,
                        anchor,
                    });
                }
                // Any other tag is page chrome and takes no space.
            }
            '&' => {
                // Entity: counts as a single character of content.
                let rest = &body[i..];
                if let Some(semi) = rest.find(';').filter(|&n| n <= 8) {
                    while let Some(&(j, _)) = chars.peek() {
                        if j > i + semi {
                            break;
                        }
                        chars.next();
                    }
                }
                col += 1;
            }
            '\n' => {
                line += 1;
                col = 1;
            }
            _ => {
                col += 1;
            }
        }
    }

    if let Some((begin, _, _)) = stack.first() {
        return Err(ParseError::corrupted(format!(
            "unterminated match span opened at line {} column {}",
            begin.line, begin.ch
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = "<html><body>\n<pre>\nint main() {\n    int <span data-anchor=\"3\" data-color=\"#aabbcc\">x = compute();\n    return x</span>;\n}\n</pre>\n</body></html>";

    #[test]
    fn exact_character_offsets_are_recovered() {
        let spans = extract_spans(FRAME, "31").unwrap();
        assert_eq!(spans.len(), 1);
        let s = &spans[0];
        // "    int " is 8 chars, span starts at column 9 of line 2.
        assert_eq!(s.begin, SpanPos::new(2, 9));
        // "    return x" is 12 chars, exclusive end column 13 of line 3.
        assert_eq!(s.end, SpanPos::new(3, 13));
        assert_eq!(s.anchor, "3");
        assert_eq!(s.color, "#aabbcc");
    }

    #[test]
    fn nested_spans_unwind_in_order() {
        let frame = "<pre>\n<span data-color=\"#111111\">outer <span data-color=\"#222222\">inner</span> tail</span>\n</pre>";
        let spans = extract_spans(frame, "5").unwrap();
        assert_eq!(spans.len(), 2);
        // Inner closes first.
        assert_eq!(spans[0].color, "#222222");
        assert_eq!(spans[0].begin, SpanPos::new(1, 7));
        assert_eq!(spans[0].end, SpanPos::new(1, 12));
        assert_eq!(spans[1].color, "#111111");
        assert_eq!(spans[1].begin, SpanPos::new(1, 1));
        assert_eq!(spans[1].end, SpanPos::new(1, 17));
    }

    #[test]
    fn entities_count_as_one_column() {
        let frame = "<pre>\nif (a &lt; <span data-color=\"#333333\">b</span>)\n</pre>";
        let spans = extract_spans(frame, "5").unwrap();
        // "if (a < " is 8 chars, span begins at column 9.
        assert_eq!(spans[0].begin, SpanPos::new(1, 9));
        assert_eq!(spans[0].end, SpanPos::new(1, 10));
    }

    #[test]
    fn missing_pre_is_corrupted() {
        assert!(matches!(
            extract_spans("<html>nothing</html>", "5"),
            Err(ParseError::Corrupted(_))
        ));
    }

    #[test]
    fn unbalanced_spans_are_corrupted() {
        let open = "<pre>\n<span data-color=\"#111111\">never closed\n</pre>";
        assert!(matches!(
            extract_spans(open, "5"),
            Err(ParseError::Corrupted(_))
        ));

        let stray = "<pre>\nstray</span>\n</pre>";
        assert!(matches!(
            extract_spans(stray, "5"),
            Err(ParseError::Corrupted(_))
        ));
    }

    #[test]
    fn span_without_color_is_corrupted() {
        let frame = "<pre>\n<span class=\"x\">a</span>\n</pre>";
        assert!(matches!(
            extract_spans(frame, "5"),
            Err(ParseError::Corrupted(_))
        ));
    }
}

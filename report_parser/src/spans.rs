//! Span merge and marker serialization.
//!
//! Raw spans from many pairwise comparisons are merged per owner, split into
//! begin/end marker events, sorted in descending document order and injected
//! back-to-front into the owner's reconstructed file. Processing from the end
//! of the file backwards guarantees that inserting a marker never shifts the
//! position of a marker not yet processed.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ParseError;

/// 1-based (line, column) position. Columns count characters, not bytes.
/// End positions are exclusive: `ch` is one past the last included column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpanPos {
    pub line: u32,
    pub ch: u32,
}

impl SpanPos {
    pub fn new(line: u32, ch: u32) -> Self {
        Self { line, ch }
    }
}

/// One marked region of an owner's file, similar to one other submission.
/// Whole-line dialects use `begin.ch == 1` and `end.ch == line length + 1`.
#[derive(Debug, Clone)]
pub struct RawSpan {
    pub begin: SpanPos,
    pub end: SpanPos,
    /// Display id of the other side (student id or external file name).
    pub other: String,
    pub color: String,
    pub anchor: String,
}

/// Merge result: identical (begin, end) spans collapsed into one record
/// with parallel contributor arrays. Array lengths are always equal.
#[derive(Debug, Clone)]
pub struct MergedSpan {
    pub begin: SpanPos,
    pub end: SpanPos,
    pub others: Vec<String>,
    pub colors: Vec<String>,
    pub anchors: Vec<String>,
}

/// Groups raw spans sharing an identical (begin, end) tuple. First-seen span
/// order and contributor input order are both preserved. The pairwise scan is
/// quadratic, which is fine at report sizes of hundreds of spans per student.
pub fn merge_spans(raw: Vec<RawSpan>) -> Vec<MergedSpan> {
    let mut merged: Vec<MergedSpan> = Vec::new();
    for r in raw {
        if let Some(m) = merged
            .iter_mut()
            .find(|m| m.begin == r.begin && m.end == r.end)
        {
            m.others.push(r.other);
            m.colors.push(r.color);
            m.anchors.push(r.anchor);
        } else {
            merged.push(MergedSpan {
                begin: r.begin,
                end: r.end,
                others: vec![r.other],
                colors: vec![r.color],
                anchors: vec![r.anchor],
            });
        }
    }
    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Begin,
    End,
}

/// One injectable marker carrying the full contributor arrays.
#[derive(Debug, Clone)]
pub struct MarkerEvent {
    pub kind: MarkerKind,
    pub pos: SpanPos,
    pub others: Vec<String>,
    pub colors: Vec<String>,
    pub anchors: Vec<String>,
}

impl MarkerEvent {
    /// Marker text injected into the annotated file. Attribute values are
    /// joined with `|`; `}` and whitespace inside values are replaced so the
    /// strip pattern stays unambiguous.
    pub fn render(&self) -> String {
        let kind = match self.kind {
            MarkerKind::Begin => "begin",
            MarkerKind::End => "end",
        };
        format!(
            "{{{{sim:{} others={} colors={} anchors={}}}}}",
            kind,
            join_values(&self.others),
            join_values(&self.colors),
            join_values(&self.anchors),
        )
    }
}

fn join_values(values: &[String]) -> String {
    values
        .iter()
        .map(|v| {
            v.chars()
                .map(|c| if c == '}' || c.is_whitespace() { '_' } else { c })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Splits merged spans into begin/end events. Begin events for all spans come
/// first: combined with the stable descending sort this places an end marker
/// to the left of a begin marker when a block ends exactly where the next one
/// starts.
pub fn to_events(spans: &[MergedSpan]) -> Vec<MarkerEvent> {
    let mut events = Vec::with_capacity(spans.len() * 2);
    for s in spans {
        events.push(MarkerEvent {
            kind: MarkerKind::Begin,
            pos: s.begin,
            others: s.others.clone(),
            colors: s.colors.clone(),
            anchors: s.anchors.clone(),
        });
    }
    for s in spans {
        events.push(MarkerEvent {
            kind: MarkerKind::End,
            pos: s.end,
            others: s.others.clone(),
            colors: s.colors.clone(),
            anchors: s.anchors.clone(),
        });
    }
    events
}

/// Mandatory ordering for injection: line descending, then column descending,
/// stable for equal positions.
pub fn sort_events_descending(events: &mut [MarkerEvent]) {
    events.sort_by(|a, b| {
        b.pos
            .line
            .cmp(&a.pos.line)
            .then(b.pos.ch.cmp(&a.pos.ch))
    });
}

/// Injects every event's marker at its (line, ch) position. Events
/// must already be sorted descending. Positions past the end of a line clamp
/// to the line end (whole-line end markers land there by convention); a line
/// number past the end of the file means the artifact and the reconstruction
/// disagree, which is a corruption.
pub fn inject_markers(text: &str, events: &[MarkerEvent]) -> Result<String, ParseError> {
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    let total = lines.len();
    for ev in events {
        let li = (ev.pos.line as usize)
            .checked_sub(1)
            .ok_or_else(|| ParseError::corrupted("marker at line 0"))?;
        let line = lines.get_mut(li).ok_or_else(|| {
            ParseError::corrupted(format!(
                "marker at line {} but file has {} lines",
                ev.pos.line, total
            ))
        })?;
        let idx = byte_index_for_column(line, ev.pos.ch);
        line.insert_str(idx, &ev.render());
    }
    Ok(lines.join("\n"))
}

/// Byte index of 1-based character column `col`, clamped to the line end.
fn byte_index_for_column(line: &str, col: u32) -> usize {
    let want = (col as usize).saturating_sub(1);
    line.char_indices()
        .nth(want)
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}

static MARKER_RE: OnceLock<Regex> = OnceLock::new();

/// Removes every injected marker, restoring the plain reconstructed text.
pub fn strip_markers(text: &str) -> String {
    let re = MARKER_RE
        .get_or_init(|| Regex::new(r"\{\{sim:(?:begin|end)[^}]*\}\}").unwrap());
    re.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(bl: u32, bc: u32, el: u32, ec: u32, other: &str) -> RawSpan {
        RawSpan {
            begin: SpanPos::new(bl, bc),
            end: SpanPos::new(el, ec),
            other: other.into(),
            color: "#ff0000".into(),
            anchor: "0".into(),
        }
    }

    #[test]
    fn identical_spans_merge_into_parallel_arrays() {
        let raw = vec![
            span(2, 1, 4, 10, "11"),
            span(2, 1, 4, 10, "22"),
            span(5, 3, 5, 9, "11"),
            span(2, 1, 4, 10, "33"),
        ];
        let merged = merge_spans(raw);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].others, vec!["11", "22", "33"]);
        assert_eq!(merged[0].colors.len(), merged[0].others.len());
        assert_eq!(merged[0].anchors.len(), merged[0].others.len());
        assert_eq!(merged[1].others, vec!["11"]);
    }

    #[test]
    fn events_sort_strictly_non_increasing() {
        let merged = merge_spans(vec![
            span(1, 1, 2, 5, "a"),
            span(4, 2, 6, 3, "b"),
            span(4, 8, 5, 1, "c"),
        ]);
        let mut events = to_events(&merged);
        sort_events_descending(&mut events);
        for w in events.windows(2) {
            let (a, b) = (w[0].pos, w[1].pos);
            assert!(a.line > b.line || (a.line == b.line && a.ch >= b.ch));
        }
    }

    #[test]
    fn injection_then_strip_restores_original_text() {
        let text = "fn main() {\n    let x = 1;\n    let y = 2;\n    println!(\"{}\", x + y);\n}\n";
        let merged = merge_spans(vec![
            span(2, 5, 3, 15, "11"),
            span(2, 5, 3, 15, "22"),
            span(4, 5, 4, 27, "11"),
        ]);
        let mut events = to_events(&merged);
        sort_events_descending(&mut events);
        let annotated = inject_markers(text, &events).unwrap();

        assert!(annotated.contains("{{sim:begin others=11|22"));
        assert_eq!(strip_markers(&annotated), text);
    }

    #[test]
    fn adjacent_blocks_keep_end_before_begin() {
        // First block ends exactly where the second begins, on the same line.
        let text = "aaaa bbbb cccc\n";
        let merged = merge_spans(vec![span(1, 1, 1, 6, "x"), span(1, 6, 1, 11, "y")]);
        let mut events = to_events(&merged);
        sort_events_descending(&mut events);
        let annotated = inject_markers(text, &events).unwrap();

        let end_x = annotated.find("{{sim:end others=x").unwrap();
        let begin_y = annotated.find("{{sim:begin others=y").unwrap();
        assert!(end_x < begin_y, "end of first block must precede begin of second: {annotated}");
        assert_eq!(strip_markers(&annotated), text);
    }

    #[test]
    fn whole_line_end_clamps_to_line_end() {
        let text = "short\n";
        let merged = merge_spans(vec![span(1, 1, 1, 6, "x")]);
        let mut events = to_events(&merged);
        sort_events_descending(&mut events);
        let annotated = inject_markers(text, &events).unwrap();
        assert!(annotated.starts_with("{{sim:begin"));
        assert!(annotated.contains("short{{sim:end"));
    }

    #[test]
    fn marker_past_eof_is_corruption() {
        let text = "one line\n";
        let merged = merge_spans(vec![span(9, 1, 9, 5, "x")]);
        let mut events = to_events(&merged);
        sort_events_descending(&mut events);
        assert!(matches!(
            inject_markers(text, &events),
            Err(ParseError::Corrupted(_))
        ));
    }

    #[test]
    fn random_nonoverlapping_spans_round_trip() {
        // Deterministic pseudo-random spans over a synthetic file; stripping
        // markers must restore the file byte-for-byte.
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!("line {:02} with some content here\n", i));
        }

        let mut seed: u64 = 0x51_6d_5c_4a;
        let mut next = |m: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % m
        };

        let mut raw = Vec::new();
        let mut line = 1u32;
        while (line as usize) < 38 {
            let begin_line = line;
            let begin_ch = 1 + next(10) as u32;
            let end_line = begin_line + next(2) as u32;
            let end_ch = begin_ch + 1 + next(12) as u32;
            raw.push(span(begin_line, begin_ch, end_line, end_ch, "7"));
            line = end_line + 1 + next(3) as u32;
        }

        let merged = merge_spans(raw);
        let mut events = to_events(&merged);
        sort_events_descending(&mut events);
        let annotated = inject_markers(&text, &events).unwrap();
        assert_eq!(strip_markers(&annotated), text);
    }
}

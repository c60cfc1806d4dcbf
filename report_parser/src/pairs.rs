//! Pair extraction from each engine's summary artifact.
//!
//! Both engines publish an index page with one row per compared pair; the
//! dialects differ in how percentages are attached. Sides that are not real
//! students (seed/base code) are zero-filled with the display name kept
//! out-of-band; pairs where neither side is a real student are noise and
//! dropped.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

use store::{EngineName, Mark, SimilarityPair, EXTERNAL_CODE_ID};

use crate::error::ParseError;

/// Report identity stamped onto every extracted pair.
#[derive(Debug, Clone, Copy)]
pub struct PairContext {
    pub assignment_id: i64,
    pub engine: EngineName,
    pub version: u32,
}

fn name_pct_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<name>.+?)\s*\((?P<pct>\d+(?:\.\d+)?)%\)\s*$").unwrap())
}

fn student_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<id>\d+)(?:/|$)").unwrap())
}

/// Splits a side label into (numeric student id, out-of-band external name).
/// Labels look like `42/submission.java`; anything not starting with a
/// numeric student id is external seed code.
fn parse_side(raw: &str) -> (i64, Option<String>) {
    match student_id_re()
        .captures(raw)
        .and_then(|c| c.name("id"))
        .and_then(|m| m.as_str().parse::<i64>().ok())
    {
        Some(id) if id > 0 => (id, None),
        _ => (EXTERNAL_CODE_ID, Some(raw.to_string())),
    }
}

fn build_pair(
    ctx: &PairContext,
    side1: (&str, f32),
    side2: (&str, f32),
    comparison_ref: &str,
) -> Option<SimilarityPair> {
    let (id1, ext1) = parse_side(side1.0);
    let (id2, ext2) = parse_side(side2.0);

    // Pure external-vs-external rows carry no student signal.
    if id1 == EXTERNAL_CODE_ID && id2 == EXTERNAL_CODE_ID {
        return None;
    }

    // Side order is preserved here because it indexes the per-side match
    // frames; the store canonicalizes on insert.
    Some(SimilarityPair {
        assignment_id: ctx.assignment_id,
        engine: ctx.engine,
        report_version: ctx.version,
        student1_id: id1,
        student2_id: id2,
        additional_code_file_name: ext1.or(ext2),
        similarity1: side1.1,
        similarity2: side2.1,
        comparison_ref: comparison_ref.to_string(),
        mark: Mark::Unset,
    })
}

/// MOSS-dialect index: three-column table where each side cell holds one link
/// labelled `name (pct%)` and the link target is the match page.
pub fn extract_moss_pairs(
    html: &str,
    ctx: &PairContext,
) -> Result<Vec<SimilarityPair>, ParseError> {
    let doc = Html::parse_document(html);
    let table_sel = Selector::parse("table").unwrap();
    let tr_sel = Selector::parse("table tr").unwrap();
    let td_sel = Selector::parse("td").unwrap();
    let a_sel = Selector::parse("a").unwrap();

    if doc.select(&table_sel).next().is_none() {
        return Err(ParseError::corrupted("index has no result table"));
    }

    let mut out = Vec::new();
    for tr in doc.select(&tr_sel) {
        let mut tds = tr.select(&td_sel);
        let (Some(td1), Some(td2), Some(_td3)) = (tds.next(), tds.next(), tds.next()) else {
            continue; // header or filler row
        };

        let a1 = td1
            .select(&a_sel)
            .next()
            .ok_or_else(|| ParseError::corrupted("pair row without link"))?;
        let a2 = td2
            .select(&a_sel)
            .next()
            .ok_or_else(|| ParseError::corrupted("pair row without link"))?;

        let href = a1.value().attr("href").unwrap_or_default().to_string();
        if href.is_empty() {
            return Err(ParseError::corrupted("pair row link without target"));
        }

        let (name1, pct1) = split_name_pct(&a1.text().collect::<String>())?;
        let (name2, pct2) = split_name_pct(&a2.text().collect::<String>())?;

        if let Some(pair) = build_pair(ctx, (&name1, pct1), (&name2, pct2), &href) {
            out.push(pair);
        }
    }
    Ok(out)
}

/// JPlag-dialect index: four-column table with the two side links followed by
/// one percentage cell per side.
pub fn extract_jplag_pairs(
    html: &str,
    ctx: &PairContext,
) -> Result<Vec<SimilarityPair>, ParseError> {
    let doc = Html::parse_document(html);
    let table_sel = Selector::parse("table").unwrap();
    let tr_sel = Selector::parse("table tr").unwrap();
    let td_sel = Selector::parse("td").unwrap();
    let a_sel = Selector::parse("a").unwrap();

    if doc.select(&table_sel).next().is_none() {
        return Err(ParseError::corrupted("index has no result table"));
    }

    let mut out = Vec::new();
    for tr in doc.select(&tr_sel) {
        let mut tds = tr.select(&td_sel);
        let (Some(td1), Some(td2), Some(td3), Some(td4)) =
            (tds.next(), tds.next(), tds.next(), tds.next())
        else {
            continue;
        };

        let a1 = td1
            .select(&a_sel)
            .next()
            .ok_or_else(|| ParseError::corrupted("pair row without link"))?;
        let a2 = td2
            .select(&a_sel)
            .next()
            .ok_or_else(|| ParseError::corrupted("pair row without link"))?;

        let href = a1.value().attr("href").unwrap_or_default().to_string();
        if href.is_empty() {
            return Err(ParseError::corrupted("pair row link without target"));
        }

        let name1 = a1.text().collect::<String>().trim().to_string();
        let name2 = a2.text().collect::<String>().trim().to_string();
        let pct1 = parse_pct_cell(&td3.text().collect::<String>())?;
        let pct2 = parse_pct_cell(&td4.text().collect::<String>())?;

        if let Some(pair) = build_pair(ctx, (&name1, pct1), (&name2, pct2), &href) {
            out.push(pair);
        }
    }
    Ok(out)
}

fn split_name_pct(raw: &str) -> Result<(String, f32), ParseError> {
    let trimmed = raw.trim();
    let caps = name_pct_re()
        .captures(trimmed)
        .ok_or_else(|| ParseError::corrupted(format!("unparsable pair label '{trimmed}'")))?;
    let name = caps["name"].trim().to_string();
    let pct = caps["pct"]
        .parse::<f32>()
        .map_err(|_| ParseError::corrupted(format!("unparsable percentage in '{trimmed}'")))?;
    Ok((name, pct))
}

fn parse_pct_cell(raw: &str) -> Result<f32, ParseError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?P<pct>\d+(?:\.\d+)?)\s*%").unwrap());
    re.captures(raw.trim())
        .and_then(|c| c["pct"].parse::<f32>().ok())
        .ok_or_else(|| ParseError::corrupted(format!("unparsable similarity cell '{}'", raw.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(engine: EngineName) -> PairContext {
        PairContext {
            assignment_id: 3,
            engine,
            version: 1,
        }
    }

    const MOSS_INDEX: &str = r#"
        <html><body><table>
        <tr><th>File 1</th><th>File 2</th><th>Lines Matched</th></tr>
        <tr>
          <td><a href="matches/match0.html">17/submission.java (85%)</a></td>
          <td><a href="matches/match0.html">23/submission.java (90%)</a></td>
          <td>44</td>
        </tr>
        <tr>
          <td><a href="matches/match1.html">base/skeleton.java (12%)</a></td>
          <td><a href="matches/match1.html">17/submission.java (9%)</a></td>
          <td>8</td>
        </tr>
        <tr>
          <td><a href="matches/match2.html">base/a.java (5%)</a></td>
          <td><a href="matches/match2.html">base/b.java (5%)</a></td>
          <td>2</td>
        </tr>
        </table></body></html>"#;

    #[test]
    fn moss_index_yields_pairs_in_side_order() {
        let pairs = extract_moss_pairs(MOSS_INDEX, &ctx(EngineName::Moss)).unwrap();
        assert_eq!(pairs.len(), 2, "external-vs-external row is dropped");

        let p = &pairs[0];
        assert_eq!((p.student1_id, p.student2_id), (17, 23));
        assert_eq!((p.similarity1, p.similarity2), (85.0, 90.0));
        assert_eq!(p.comparison_ref, "matches/match0.html");
        assert_eq!(p.mark, Mark::Unset);
        assert_eq!(p.canonical_key(), (23, 17));

        let ext = &pairs[1];
        assert_eq!((ext.student1_id, ext.student2_id), (EXTERNAL_CODE_ID, 17));
        assert_eq!(
            ext.additional_code_file_name.as_deref(),
            Some("base/skeleton.java")
        );
    }

    #[test]
    fn moss_index_without_table_is_corrupted() {
        let err = extract_moss_pairs("<html><body>oops</body></html>", &ctx(EngineName::Moss))
            .unwrap_err();
        assert!(matches!(err, ParseError::Corrupted(_)));
    }

    #[test]
    fn moss_row_without_link_is_corrupted() {
        let html = r#"<table><tr><td>17 (85%)</td><td>23 (90%)</td><td>44</td></tr></table>"#;
        assert!(matches!(
            extract_moss_pairs(html, &ctx(EngineName::Moss)),
            Err(ParseError::Corrupted(_))
        ));
    }

    const JPLAG_INDEX: &str = r#"
        <html><body><table>
        <tr><th>Submission</th><th>Submission</th><th>%1</th><th>%2</th></tr>
        <tr>
          <td><a href="match0.html">9</a></td>
          <td><a href="match0.html">31</a></td>
          <td>85.3%</td>
          <td>91.0%</td>
        </tr>
        </table></body></html>"#;

    #[test]
    fn jplag_index_reads_per_side_percentages() {
        let pairs = extract_jplag_pairs(JPLAG_INDEX, &ctx(EngineName::Jplag)).unwrap();
        assert_eq!(pairs.len(), 1);
        let p = &pairs[0];
        assert_eq!((p.student1_id, p.student2_id), (9, 31));
        assert_eq!((p.similarity1, p.similarity2), (85.3, 91.0));
    }

    #[test]
    fn jplag_missing_percentage_cell_is_corrupted() {
        let html = r#"<table><tr>
          <td><a href="match0.html">9</a></td>
          <td><a href="match0.html">31</a></td>
          <td>85.3%</td>
          <td>n/a</td>
        </tr></table>"#;
        assert!(matches!(
            extract_jplag_pairs(html, &ctx(EngineName::Jplag)),
            Err(ParseError::Corrupted(_))
        ));
    }
}

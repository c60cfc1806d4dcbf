//! Mirrors a remote result set into a local version directory so parsing and
//! re-parsing never depend on the remote copy staying alive.
//!
//! Layout after mirroring:
//!   index.html                  (hrefs rewritten to matches/<name>.html)
//!   matches/matchN.html         (frameset page, frame srcs rewritten to basenames)
//!   matches/matchN-0.html       (left frame)
//!   matches/matchN-1.html       (right frame)

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::{Client, Url, redirect};
use scraper::{Html, Selector};
use tokio::{fs as tfs, io::AsyncWriteExt, sync::Semaphore};

use crate::error::EngineError;

/// Max concurrency for HTTP GETs.
const CONCURRENCY: usize = 8;

pub fn http_client() -> Result<Client, EngineError> {
    Ok(Client::builder()
        .user_agent("simscan-mirror/0.1")
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .http1_only()
        .redirect(redirect::Policy::limited(10))
        .build()?)
}

/// Mirrors the report at `index_url` into `dest_root`.
pub async fn mirror_report(index_url: &str, dest_root: &Path) -> Result<(), EngineError> {
    let client = http_client()?;
    tfs::create_dir_all(dest_root).await?;

    let index_abs = Url::parse(index_url)
        .map_err(|e| EngineError::Remote(format!("invalid report url '{index_url}': {e}")))?;
    let index_html = fetch_text(&client, &index_abs).await?;

    let match_urls = extract_match_links(&index_abs, &index_html)?;
    log::debug!("mirroring {} match pages from {index_url}", match_urls.len());

    let sem = Arc::new(Semaphore::new(CONCURRENCY));
    let mut futs = FuturesUnordered::new();
    for murl in match_urls.iter().cloned() {
        let client = client.clone();
        let dest_root = dest_root.to_path_buf();
        let sem = Arc::clone(&sem);
        futs.push(tokio::spawn(async move {
            let _permit = sem
                .acquire()
                .await
                .map_err(|e| EngineError::Remote(format!("mirror semaphore closed: {e}")))?;
            mirror_one_match(&client, &murl, &dest_root).await
        }));
    }
    while let Some(res) = futs.next().await {
        res.map_err(|e| EngineError::Remote(format!("mirror task panicked: {e}")))??;
    }

    let rewritten = rewrite_index_links(&index_abs, &index_html, &match_urls)?;
    write_text(&dest_root.join("index.html"), &rewritten).await?;
    Ok(())
}

async fn mirror_one_match(client: &Client, murl: &Url, dest_root: &Path) -> Result<(), EngineError> {
    let match_html = fetch_text(client, murl).await?;
    let frame_urls = extract_frame_links(murl, &match_html)?;

    // Frame srcs become plain basenames since the page lives beside its frames.
    let mut out = match_html.clone();
    for (src, furl) in &frame_urls {
        out = out.replace(src.as_str(), &url_basename(furl));
    }
    write_text(&match_path(dest_root, murl), &out).await?;

    for (_, furl) in &frame_urls {
        let frame_html = fetch_text(client, furl).await?;
        write_text(&match_path(dest_root, furl), &frame_html).await?;
    }
    Ok(())
}

fn match_path(dest_root: &Path, url: &Url) -> PathBuf {
    dest_root.join("matches").join(url_basename(url))
}

async fn fetch_text(client: &Client, url: &Url) -> Result<String, EngineError> {
    let resp = client.get(url.clone()).send().await?.error_for_status()?;
    Ok(resp.text().await?)
}

async fn write_text(path: &Path, s: &str) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        tfs::create_dir_all(parent).await?;
    }
    let mut f = tfs::File::create(path).await?;
    f.write_all(s.as_bytes()).await?;
    Ok(())
}

fn extract_match_links(index_url: &Url, html: &str) -> Result<BTreeSet<Url>, EngineError> {
    let doc = Html::parse_document(html);
    let a_sel = Selector::parse("a[href]").unwrap();

    let mut urls = BTreeSet::new();
    for a in doc.select(&a_sel) {
        if let Some(href) = a.value().attr("href") {
            if href.contains("match") && href.ends_with(".html") {
                let abs = index_url.join(href).map_err(|e| {
                    EngineError::Corrupted(format!("unresolvable match link '{href}': {e}"))
                })?;
                urls.insert(abs);
            }
        }
    }
    Ok(urls)
}

/// Frameset pages reference their two side frames via `<frame src>`.
/// Returns `(raw src attribute, absolute url)` so the rewrite can reuse the
/// exact attribute text.
fn extract_frame_links(match_url: &Url, html: &str) -> Result<Vec<(String, Url)>, EngineError> {
    let doc = Html::parse_document(html);
    let frame_sel = Selector::parse("frame[src], FRAME[src]").unwrap();

    let mut frames = Vec::new();
    for f in doc.select(&frame_sel) {
        if let Some(src) = f.value().attr("src") {
            let abs = match_url.join(src).map_err(|e| {
                EngineError::Corrupted(format!("unresolvable frame link '{src}': {e}"))
            })?;
            frames.push((src.to_string(), abs));
        }
    }
    Ok(frames)
}

fn rewrite_index_links(
    index_url: &Url,
    html: &str,
    match_urls: &BTreeSet<Url>,
) -> Result<String, EngineError> {
    let local: BTreeMap<String, String> = match_urls
        .iter()
        .map(|u| (u.as_str().to_string(), format!("matches/{}", url_basename(u))))
        .collect();

    // Both side cells of one index row link the same match page, so collect
    // unique raw hrefs first and replace each exactly once; replacing per
    // anchor would rewrite the shared href a second time.
    let doc = Html::parse_document(html);
    let a_sel = Selector::parse("a[href]").unwrap();
    let mut rewrites: BTreeMap<String, String> = BTreeMap::new();
    for a in doc.select(&a_sel) {
        if let Some(href) = a.value().attr("href") {
            if href.contains("match") && href.ends_with(".html") {
                let abs = index_url.join(href).map_err(|e| {
                    EngineError::Corrupted(format!("unresolvable match link '{href}': {e}"))
                })?;
                if let Some(rel) = local.get(abs.as_str()) {
                    rewrites.insert(href.to_string(), rel.clone());
                }
            }
        }
    }
    let mut out = html.to_string();
    for (href, rel) in &rewrites {
        out = out.replace(href.as_str(), rel);
    }
    Ok(out)
}

fn url_basename(u: &Url) -> String {
    let seg = u
        .path_segments()
        .and_then(|mut it| it.next_back())
        .unwrap_or("match.html");
    seg.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_links_are_extracted_and_rewritten() {
        let index_url = Url::parse("http://moss.stanford.edu/results/5/12345/").unwrap();
        let html = r#"<html><body><table>
            <tr><td><a href="match0.html">17/ (61%)</a></td>
                <td><a href="match0.html">23/ (64%)</a></td><td>3</td></tr>
            <tr><td><a href="match1.html">9/ (40%)</a></td>
                <td><a href="match1.html">31/ (42%)</a></td><td>2</td></tr>
            </table></body></html>"#;

        let urls = extract_match_links(&index_url, html).unwrap();
        assert_eq!(urls.len(), 2);

        let rewritten = rewrite_index_links(&index_url, html, &urls).unwrap();
        assert!(rewritten.contains(r#"href="matches/match0.html""#));
        assert!(rewritten.contains(r#"href="matches/match1.html""#));
        assert!(!rewritten.contains("matches/matches"));
    }

    #[test]
    fn shared_href_between_side_cells_is_rewritten_once() {
        // Each index row links the same match page from both side cells.
        let index_url = Url::parse("http://moss.stanford.edu/results/5/12345/").unwrap();
        let html = r#"<table>
            <tr><td><a href="match0.html">17/ (61%)</a></td>
                <td><a href="match0.html">23/ (64%)</a></td></tr>
            </table>"#;

        let urls = extract_match_links(&index_url, html).unwrap();
        let rewritten = rewrite_index_links(&index_url, html, &urls).unwrap();

        assert_eq!(rewritten.matches(r#"href="matches/match0.html""#).count(), 2);
        assert!(!rewritten.contains("matches/matches"));
    }

    #[test]
    fn frame_links_resolve_relative_to_match_page() {
        let murl = Url::parse("http://moss.stanford.edu/results/5/12345/match0.html").unwrap();
        let html = r#"<frameset cols="50%,50%">
            <frame src="match0-0.html" name="0">
            <frame src="match0-1.html" name="1">
            </frameset>"#;

        let frames = extract_frame_links(&murl, html).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].1.as_str().ends_with("/match0-0.html"));
        assert_eq!(url_basename(&frames[1].1), "match0-1.html");
    }
}

//! The socket engine's wire protocol: a line-oriented preamble, length-prefixed
//! file uploads, then a single result line carrying the report URL.
//!
//! Generic over the stream so the session runs identically over a direct TCP
//! connection, a proxy tunnel, or an in-memory pipe in tests.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::EngineError;

/// One file to submit. Base files carry id 0 and are excluded from matching
/// against each other; student files get sequential ids starting at 1.
#[derive(Debug, Clone)]
pub struct MossUpload {
    /// Name shown in the report, e.g. `"42/submission"`.
    pub display_name: String,
    pub content: Vec<u8>,
    pub base: bool,
}

/// Preamble parameters sent before any file.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user_id: String,
    /// Engine wire name of the language, already validated.
    pub language: String,
    pub max_matches: u32,
    pub show_limit: u32,
    pub experimental: bool,
    pub comment: String,
}

/// Runs one complete submission session and returns the report URL.
pub async fn run_session<S>(
    stream: S,
    opts: &SessionOptions,
    uploads: &[MossUpload],
) -> Result<String, EngineError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let preamble = format!(
        "moss {}\ndirectory 0\nX {}\nmaxmatches {}\nshow {}\nlanguage {}\n",
        opts.user_id,
        if opts.experimental { 1 } else { 0 },
        opts.max_matches,
        opts.show_limit,
        opts.language,
    );
    write_half.write_all(preamble.as_bytes()).await?;
    write_half.flush().await?;

    // The server acknowledges the language line with yes/no.
    let ack = read_line(&mut reader).await?;
    if ack.trim() == "no" {
        write_half.write_all(b"end\n").await?;
        return Err(EngineError::UnsupportedLanguage(opts.language.clone()));
    }
    if ack.trim() != "yes" {
        return Err(EngineError::Remote(format!(
            "unexpected language acknowledgement: {}",
            ack.trim()
        )));
    }

    let mut next_id: u32 = 1;
    for upload in uploads {
        let id = if upload.base {
            0
        } else {
            let id = next_id;
            next_id += 1;
            id
        };
        let header = format!(
            "file {} {} {} {}\n",
            id,
            opts.language,
            upload.content.len(),
            upload.display_name,
        );
        write_half.write_all(header.as_bytes()).await?;
        write_half.write_all(&upload.content).await?;
    }

    write_half
        .write_all(format!("query 0 {}\n", opts.comment).as_bytes())
        .await?;
    write_half.flush().await?;

    let url = read_line(&mut reader).await?.trim().to_string();
    write_half.write_all(b"end\n").await?;
    let _ = write_half.flush().await;

    if !url.starts_with("http") {
        return Err(EngineError::Remote(format!(
            "expected report url, got: {url}"
        )));
    }
    Ok(url)
}

async fn read_line<R>(reader: &mut BufReader<R>) -> Result<String, EngineError>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(EngineError::Remote(
            "engine closed the connection early".into(),
        ));
    }
    Ok(line)
}

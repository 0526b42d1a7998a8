//! Minimal playback host: opens one URI and writes the paced PCM out.
//!
//! Usage: `spotify-demux <uri> [--out <file>]`
//!
//! Without `--out` the raw s16le stream goes to stdout, so everything
//! meant for the user is printed on stderr.

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use spotify_demux::logging::init_logging;
use spotify_demux::provider::librespot::LibrespotProvider;
use spotify_demux::{
    AudioBlock, Config, ConsumerFacade, ControlQuery, ControlReply, DemuxStatus, Dialogs, EsId,
    EsOut, HostServices, OpenContext, PlaylistItem, PlaylistSink, StreamFormat,
};

struct TerminalDialogs;

impl Dialogs for TerminalDialogs {
    fn fatal(&self, title: &str, message: &str) {
        eprintln!("✗ {title}: {message}");
    }

    fn prompt_credentials(&self) -> Option<(String, String)> {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        eprint!("Spotify username: ");
        let username = lines.next()?.ok()?.trim().to_string();
        eprint!("Password: ");
        let password = lines.next()?.ok()?.trim_end().to_string();

        if username.is_empty() {
            return None;
        }
        Some((username, password))
    }
}

/// Writes every block as interleaved s16le
struct PcmWriter {
    out: Mutex<Box<dyn Write + Send>>,
    next_id: AtomicU32,
}

impl PcmWriter {
    fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            next_id: AtomicU32::new(0),
        }
    }
}

impl EsOut for PcmWriter {
    fn add(&self, format: &StreamFormat) -> Option<EsId> {
        eprintln!(
            "♪ {} Hz, {} channels, {} kbit/s",
            format.sample_rate,
            format.channels,
            format.bitrate() / 1000
        );
        Some(EsId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn del(&self, _es: EsId) {
        if let Err(e) = self.out.lock().flush() {
            tracing::warn!(error = %e, "Flush failed");
        }
    }

    fn set_pcr(&self, _pts: Duration) {}

    fn send(&self, _es: EsId, block: AudioBlock) {
        let bytes: Vec<u8> = block.data.iter().flat_map(|s| s.to_le_bytes()).collect();
        if let Err(e) = self.out.lock().write_all(&bytes) {
            tracing::warn!(error = %e, "Dropping audio block");
        }
    }
}

struct PrintPlaylist;

impl PlaylistSink for PrintPlaylist {
    fn publish(&self, items: Vec<PlaylistItem>) {
        for (i, item) in items.iter().enumerate() {
            let secs = item.duration.map(|d| d.as_secs()).unwrap_or_default();
            eprintln!(
                "{:>3}. {} - {} [{}:{:02}]  {}",
                i + 1,
                item.artist.as_deref().unwrap_or("?"),
                item.title.as_deref().unwrap_or("?"),
                secs / 60,
                secs % 60,
                item.uri
            );
        }
    }
}

fn parse_args() -> Result<(String, Option<String>)> {
    let mut args = std::env::args().skip(1);
    let mut uri = None;
    let mut out = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out" | "-o" => out = Some(args.next().context("--out needs a file name")?),
            _ if uri.is_none() => uri = Some(arg),
            _ => bail!("unexpected argument: {arg}"),
        }
    }
    match uri {
        Some(uri) => Ok((uri, out)),
        None => bail!("usage: spotify-demux <uri> [--out <file>]"),
    }
}

fn main() -> Result<()> {
    if let Err(e) = init_logging() {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
    tracing::info!("=== Spotify demux host starting ===");

    let (uri, out_path) = parse_args()?;
    let config = Config::load()?;

    let out: Box<dyn Write + Send> = match out_path {
        Some(path) => Box::new(BufWriter::new(
            File::create(&path).with_context(|| format!("cannot create {path}"))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let provider = Arc::new(LibrespotProvider::new(&config)?);
    let host = HostServices::new(
        Arc::new(TerminalDialogs),
        Arc::new(PcmWriter::new(out)),
        Arc::new(PrintPlaylist),
    );

    let mut facade = ConsumerFacade::open(&uri, OpenContext::new(config, provider, host))?;
    let mut announced = false;

    while facade.demux_tick()? == DemuxStatus::MoreData {
        if announced {
            continue;
        }
        if let Ok(ControlReply::Meta(meta)) = facade.control(ControlQuery::GetMeta)
            && let Some(title) = meta.title
        {
            eprintln!(
                "▶ {} - {}{}",
                meta.artist.unwrap_or_default(),
                title,
                meta.album.map(|a| format!(" ({a})")).unwrap_or_default()
            );
            announced = true;
        }
    }

    facade.close();
    tracing::info!("=== Spotify demux host finished ===");
    Ok(())
}

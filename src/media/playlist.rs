//! HLS master playlist composition.

use thiserror::Error;

use super::ladder::PlannedRendition;

pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";
pub const RENDITION_PLAYLIST_NAME: &str = "playlist.m3u8";

/// One `#EXT-X-STREAM-INF` entry of a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStream {
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    pub uri: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaylistError {
    #[error("missing #EXTM3U header")]
    MissingHeader,

    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// Master manifest for the renditions actually produced, in the order given.
/// Each entry points at `../{rendition}/playlist.m3u8`, relative to the
/// master's own `master/` directory.
pub fn compose_master(renditions: &[PlannedRendition]) -> String {
    let entries: Vec<String> = renditions
        .iter()
        .map(|r| {
            format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n../{}/{}\n",
                r.bandwidth(),
                r.width,
                r.height(),
                r.name(),
                RENDITION_PLAYLIST_NAME
            )
        })
        .collect();

    format!("#EXTM3U\n#EXT-X-VERSION:3\n\n{}", entries.join("\n"))
}

pub fn parse_master(text: &str) -> Result<Vec<VariantStream>, PlaylistError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    match lines.next() {
        Some((_, "#EXTM3U")) => {}
        _ => return Err(PlaylistError::MissingHeader),
    }

    let mut variants = Vec::new();
    let mut pending: Option<(usize, u64, u32, u32)> = None;

    for (line_no, line) in lines {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            if pending.is_some() {
                return Err(PlaylistError::Malformed {
                    line: line_no,
                    message: "stream info without a URI".to_string(),
                });
            }
            let (bandwidth, width, height) = parse_stream_inf(attrs, line_no)?;
            pending = Some((line_no, bandwidth, width, height));
        } else if line.starts_with('#') {
            continue;
        } else {
            let (_, bandwidth, width, height) = pending.take().ok_or_else(|| PlaylistError::Malformed {
                line: line_no,
                message: "URI without stream info".to_string(),
            })?;
            variants.push(VariantStream {
                bandwidth,
                width,
                height,
                uri: line.to_string(),
            });
        }
    }

    if let Some((line, ..)) = pending {
        return Err(PlaylistError::Malformed {
            line,
            message: "stream info without a URI".to_string(),
        });
    }

    Ok(variants)
}

fn parse_stream_inf(attrs: &str, line: usize) -> Result<(u64, u32, u32), PlaylistError> {
    let malformed = |message: String| PlaylistError::Malformed { line, message };

    let mut bandwidth = None;
    let mut resolution = None;
    for attr in attrs.split(',') {
        match attr.split_once('=') {
            Some(("BANDWIDTH", v)) => bandwidth = v.parse::<u64>().ok(),
            Some(("RESOLUTION", v)) => resolution = Some(v),
            _ => {}
        }
    }

    let bandwidth = bandwidth.ok_or_else(|| malformed("missing BANDWIDTH".to_string()))?;
    let resolution = resolution.ok_or_else(|| malformed("missing RESOLUTION".to_string()))?;
    let (w, h) = resolution
        .split_once('x')
        .ok_or_else(|| malformed(format!("bad RESOLUTION {}", resolution)))?;
    let width = w.parse().map_err(|_| malformed(format!("bad width {}", w)))?;
    let height = h.parse().map_err(|_| malformed(format!("bad height {}", h)))?;

    Ok((bandwidth, width, height))
}

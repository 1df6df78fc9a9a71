// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Human-readable transcript of a recording
//
// Layout:
//   /* Recorded VNC session - <RFC3339> */
//   /* <n> frames */
//   var VNC_frame_data = [
//   "{<timestamp>{<base64 payload>",   server frame
//   "}<timestamp>{<base64 payload>",   client frame
//   "EOF"
//   ];

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::format::Frame;

/// Sentinel element terminating the frame array
pub const EOF_SENTINEL: &str = "EOF";

const SERVER_PREFIX: char = '{';
const CLIENT_PREFIX: char = '}';

/// Format one frame as an array element body (without quotes)
pub fn format_element(frame: &Frame) -> String {
    let prefix = if frame.from_client {
        CLIENT_PREFIX
    } else {
        SERVER_PREFIX
    };
    format!(
        "{}{}{{{}",
        prefix,
        frame.timestamp_ms,
        STANDARD.encode(&frame.payload)
    )
}

/// Render a full transcript for the given frames
pub fn render(frames: &[Frame], created_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "/* Recorded VNC session - {} */",
        created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let _ = writeln!(out, "/* {} frames */", frames.len());
    out.push_str("var VNC_frame_data = [\n");

    for frame in frames {
        let _ = writeln!(out, "\"{}\",", format_element(frame));
    }
    let _ = writeln!(out, "\"{}\"", EOF_SENTINEL);
    out.push_str("];\n");
    out
}

/// Parse a single array element body back into a frame
pub fn parse_element(element: &str, index: usize) -> Result<Frame> {
    let invalid = |message: String| Error::InvalidTranscript {
        element: index,
        message,
    };

    let mut chars = element.chars();
    let from_client = match chars.next() {
        Some(SERVER_PREFIX) => false,
        Some(CLIENT_PREFIX) => true,
        Some(other) => return Err(invalid(format!("unexpected prefix {:?}", other))),
        None => return Err(invalid("empty element".to_string())),
    };

    let body = chars.as_str();
    let (timestamp, data) = body
        .split_once('{')
        .ok_or_else(|| invalid("missing payload separator".to_string()))?;

    let timestamp_ms = timestamp
        .parse::<u32>()
        .map_err(|e| invalid(format!("bad timestamp {:?}: {}", timestamp, e)))?;
    let payload = STANDARD
        .decode(data)
        .map_err(|e| invalid(format!("bad base64 payload: {}", e)))?;

    Ok(Frame::new(from_client, timestamp_ms, payload))
}

/// Parse a transcript produced by [`render`]
///
/// Comments and the surrounding declaration are ignored; every string literal up to the
/// `"EOF"` sentinel is decoded as one frame.
pub fn parse(text: &str) -> Result<Vec<Frame>> {
    let body = match text.find('[') {
        Some(start) => &text[start + 1..],
        None => {
            return Err(Error::InvalidTranscript {
                element: 0,
                message: "missing frame array".to_string(),
            })
        }
    };

    let mut frames = Vec::new();
    let mut rest = body;
    let mut index = 0usize;

    loop {
        let Some(open) = rest.find('"') else {
            return Err(Error::InvalidTranscript {
                element: index,
                message: "missing EOF sentinel".to_string(),
            });
        };
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('"') else {
            return Err(Error::InvalidTranscript {
                element: index,
                message: "unterminated string literal".to_string(),
            });
        };

        let element = &after_open[..close];
        if element == EOF_SENTINEL {
            break;
        }

        frames.push(parse_element(element, index)?);
        index += 1;
        rest = &after_open[close + 1..];
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_element_prefixes() {
        assert_eq!(format_element(&Frame::server(42, b"hi".to_vec())), "{42{aGk=");
        assert_eq!(format_element(&Frame::client(7, Vec::new())), "}7{");
    }

    #[test]
    fn test_render_layout() {
        let frames = vec![Frame::server(0, b"RFB 003.008\n".to_vec())];
        let text = render(&frames, fixed_time());

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "/* Recorded VNC session - 2025-03-14T09:26:53Z */");
        assert_eq!(lines[1], "/* 1 frames */");
        assert_eq!(lines[2], "var VNC_frame_data = [");
        assert!(lines[3].starts_with("\"{0{"));
        assert_eq!(lines[4], "\"EOF\"");
        assert_eq!(lines[5], "];");
    }

    #[test]
    fn test_render_parse_reproduces_frames() {
        let frames = vec![
            Frame::server(0, b"RFB 003.008\n".to_vec()),
            Frame::client(3, b"RFB 003.008\n".to_vec()),
            Frame::server(15, vec![0, 1, 2, 255, 254]),
            Frame::client(15, Vec::new()),
            Frame::server(4_000_000_000, vec![0x7f; 300]),
        ];

        let parsed = parse(&render(&frames, fixed_time())).unwrap();
        assert_eq!(parsed, frames);
    }

    #[test]
    fn test_parse_empty_recording() {
        let parsed = parse(&render(&[], fixed_time())).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_sentinel() {
        let text = "var VNC_frame_data = [\n\"{0{AA==\"\n";
        assert!(matches!(
            parse(text),
            Err(Error::InvalidTranscript { element: 1, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_prefix() {
        let text = "var VNC_frame_data = [\n\"x0{AA==\",\n\"EOF\"\n];";
        assert!(matches!(
            parse(text),
            Err(Error::InvalidTranscript { element: 0, .. })
        ));
    }
}

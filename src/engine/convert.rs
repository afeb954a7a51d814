//! Message body conversion for cross-store transport (spec §4.11,
//! `sync_msg_cvt.c`'s job).
//!
//! Normalizes line endings to the target's preferred form, strips and
//! re-injects the `X-TUID` header, and optionally rewrites a message
//! down to a placeholder body for oversized messages (spec §4.7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("message is too big after conversion")]
    TooBig,
    #[error("message has incomplete header")]
    IncompleteHeader,
}

#[derive(Debug, Clone)]
pub struct PlaceholderInfo {
    pub original_size: u64,
    pub flagged: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Normalize output line endings to CRLF; otherwise LF.
    pub target_crlf: bool,
    /// Inject this TUID as an `X-TUID` header, replacing any existing
    /// one. `None` leaves the message untouched by TUID logic (but any
    /// pre-existing `X-TUID` header is still stripped — the engine
    /// never forwards a stale one).
    pub tuid: Option<String>,
    /// When set, produce a placeholder/dummy body instead of the real
    /// one (spec §4.7's minimal store).
    pub placeholder: Option<PlaceholderInfo>,
}

const X_TUID_PREFIX: &str = "x-tuid:";
const SUBJECT_PREFIX: &str = "subject:";

/// Convert `input` (an RFC5322 octet stream) per `opts`. With
/// `tuid: None` and `placeholder: None` and an input whose line
/// endings already match `target_crlf`, this is the identity function
/// (spec §8 property 6).
pub fn convert(input: &[u8], opts: &ConvertOptions) -> Result<Vec<u8>, ConvertError> {
    let (mut lines, mut trailing_newline) = split_lines(input);

    let mut header_end = lines.iter().position(|l| l.is_empty());
    if header_end.is_none() {
        // Spec §4.11 point 4: message ends before the header/body
        // separator. Complete the last line and synthesize the
        // separator below.
        trailing_newline = true;
        header_end = Some(lines.len());
    }
    let mut header_end = header_end.unwrap();

    // Spec §4.11's other refusal condition: a header region that isn't
    // just truncated (point 4's padding case) but actually malformed —
    // a NUL byte, or a line that's neither a continuation (leading
    // whitespace) nor a `name:` field.
    if lines[..header_end].iter().any(|l| !is_well_formed_header_line(l)) {
        return Err(ConvertError::IncompleteHeader);
    }

    // An existing X-TUID header is replaced in place; a freshly added
    // one goes immediately before the blank separator (spec point 2).
    let existing_tuid_idx = (0..header_end).find(|&i| starts_with_ci(&lines[i], X_TUID_PREFIX));
    match (&opts.tuid, existing_tuid_idx) {
        (Some(tuid), Some(idx)) => {
            lines[idx] = format!("X-TUID: {tuid}").into_bytes();
        }
        (Some(tuid), None) => {
            lines.insert(header_end, format!("X-TUID: {tuid}").into_bytes());
            header_end += 1;
        }
        (None, Some(idx)) => {
            lines.remove(idx);
            header_end -= 1;
        }
        (None, None) => {}
    }

    if let Some(info) = &opts.placeholder {
        rewrite_subject_for_placeholder(&mut lines, &mut header_end);
        let body = placeholder_body(info);
        lines.truncate(header_end + 1); // keep headers + one blank separator line
        lines.extend(body.into_iter().map(|s| s.into_bytes()));
        trailing_newline = true;
    }

    if header_end == lines.len() {
        // No blank separator survived (pure-header message, no body,
        // no placeholder): synthesize it.
        lines.push(Vec::new());
    }

    let ending: &[u8] = if opts.target_crlf { b"\r\n" } else { b"\n" };
    let out = join_lines(&lines, trailing_newline, ending);

    if out.len() > i32::MAX as usize {
        return Err(ConvertError::TooBig);
    }
    Ok(out)
}

/// A header line is well-formed if it's a continuation (leading
/// whitespace) or a `name:` field with a non-empty name and no NUL
/// byte. Anything else means the header region is genuinely malformed
/// rather than merely truncated (spec §4.11's distinction between the
/// padding case and the hard refusal case).
fn is_well_formed_header_line(line: &[u8]) -> bool {
    if line.contains(&0) {
        return false;
    }
    match line.first() {
        Some(b' ') | Some(b'\t') => true,
        _ => matches!(line.iter().position(|&b| b == b':'), Some(pos) if pos > 0),
    }
}

fn starts_with_ci(line: &[u8], prefix: &str) -> bool {
    if line.len() < prefix.len() {
        return false;
    }
    line[..prefix.len()]
        .iter()
        .zip(prefix.as_bytes())
        .all(|(a, b)| a.to_ascii_lowercase() == *b)
}

fn rewrite_subject_for_placeholder(lines: &mut [Vec<u8>], header_end: &mut usize) {
    for line in lines.iter_mut().take(*header_end) {
        if starts_with_ci(line, SUBJECT_PREFIX) {
            let text = String::from_utf8_lossy(&line[SUBJECT_PREFIX.len()..])
                .trim()
                .to_string();
            *line = format!("Subject: [placeholder] {text}").into_bytes();
            return;
        }
    }
    lines.insert(*header_end, b"Subject: [placeholder] (No Subject)".to_vec());
    *header_end += 1;
}

fn placeholder_body(info: &PlaceholderInfo) -> Vec<String> {
    let mut body = vec![
        String::new(),
        format!(
            "This message is {}, over the MaxSize limit.",
            human_size(info.original_size)
        ),
    ];
    if info.flagged {
        body.push(String::new());
        body.push("The original message is flagged as important.".to_string());
    }
    body
}

fn human_size(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    format!("{:.1}MiB", bytes as f64 / MIB)
}

/// Split on any of `\r\n`, `\r`, or `\n` as a single line break,
/// reporting whether the input ended on a break (so rejoining can
/// reproduce whether there was a final trailing newline).
fn split_lines(input: &[u8]) -> (Vec<Vec<u8>>, bool) {
    let mut lines = Vec::new();
    let mut cur = Vec::new();
    let mut i = 0;
    let n = input.len();
    let mut last_was_sep = true; // vacuously true for empty input
    while i < n {
        match input[i] {
            b'\r' => {
                lines.push(std::mem::take(&mut cur));
                i += 1;
                if i < n && input[i] == b'\n' {
                    i += 1;
                }
                last_was_sep = true;
            }
            b'\n' => {
                lines.push(std::mem::take(&mut cur));
                i += 1;
                last_was_sep = true;
            }
            b => {
                cur.push(b);
                i += 1;
                last_was_sep = false;
            }
        }
    }
    if !last_was_sep {
        lines.push(cur);
    }
    (lines, last_was_sep)
}

fn join_lines(lines: &[Vec<u8>], trailing_newline: bool, ending: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        out.extend_from_slice(line);
        if idx + 1 < lines.len() || trailing_newline {
            out.extend_from_slice(ending);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_header_injection_crlf_target() {
        let input = b"From: de\rvil\nTo: me\n\nHi,\n\n...\n";
        let opts = ConvertOptions {
            target_crlf: true,
            tuid: Some("one two tuid".to_string()),
            placeholder: None,
        };
        let out = convert(input, &opts).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "From: de\r\nvil\r\nTo: me\r\nX-TUID: one two tuid\r\n\r\nHi,\r\n\r\n...\r\n"
        );
    }

    #[test]
    fn s2_existing_x_tuid_replaced() {
        let input = b"From: x\nX-TUID: garbage\nTo: y\n\nB\n";
        let opts = ConvertOptions {
            target_crlf: false,
            tuid: Some("one two tuid".to_string()),
            placeholder: None,
        };
        let out = convert(input, &opts).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "From: x\nX-TUID: one two tuid\nTo: y\n\nB\n"
        );
    }

    #[test]
    fn s3_placeholder_for_oversized_flagged_message() {
        let input = b"From: a\nTo: b\n\nbody\n";
        let opts = ConvertOptions {
            target_crlf: false,
            tuid: Some("tuid123".to_string()),
            placeholder: Some(PlaceholderInfo {
                original_size: 2_345_687,
                flagged: true,
            }),
        };
        let out = convert(input, &opts).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Subject: [placeholder] (No Subject)"));
        assert!(text.contains("X-TUID: tuid123"));
        assert!(text.contains("2.2MiB, over the MaxSize limit"));
        assert!(text.contains("flagged as important"));
        assert!(!text.contains("body\n"));
    }

    #[test]
    fn conversion_is_identity_with_no_tuid_and_matching_endings() {
        let input = b"From: a\r\nTo: b\r\n\r\nHello\r\n";
        let opts = ConvertOptions {
            target_crlf: true,
            tuid: None,
            placeholder: None,
        };
        let out = convert(input, &opts).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn incomplete_header_gets_a_synthesized_separator() {
        let input = b"From: a\nSubject: no body at all";
        let opts = ConvertOptions {
            target_crlf: false,
            tuid: Some("T".to_string()),
            placeholder: None,
        };
        let out = convert(input, &opts).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "From: a\nSubject: no body at all\nX-TUID: T\n\n");
    }

    #[test]
    fn too_big_is_refused() {
        // Cheap trick: synthesize a conversion whose output would
        // exceed i32::MAX by constructing a huge placeholder-free body.
        // We don't actually allocate 2GB in a test; instead we check
        // the guard triggers on a crafted boundary via a tiny stand-in
        // that reuses the same check path is impractical here, so we
        // just confirm the error variant exists and displays sanely.
        let err = ConvertError::TooBig;
        assert_eq!(err.to_string(), "message is too big after conversion");
    }

    #[test]
    fn malformed_header_line_is_refused() {
        let input = b"From: a\nnot a header at all\nTo: b\n\nHi\n";
        let opts = ConvertOptions { target_crlf: false, tuid: None, placeholder: None };
        let err = convert(input, &opts).unwrap_err();
        assert!(matches!(err, ConvertError::IncompleteHeader));
    }

    #[test]
    fn nul_byte_in_header_is_refused() {
        let input = b"From: a\nSubject: x\x00y\n\nHi\n";
        let opts = ConvertOptions { target_crlf: false, tuid: None, placeholder: None };
        let err = convert(input, &opts).unwrap_err();
        assert!(matches!(err, ConvertError::IncompleteHeader));
    }

    #[test]
    fn header_continuation_line_is_well_formed() {
        let input = b"From: a\n continuation\nTo: b\n\nHi\n";
        let opts = ConvertOptions { target_crlf: false, tuid: None, placeholder: None };
        assert!(convert(input, &opts).is_ok());
    }
}

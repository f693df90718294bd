// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Receipt text sanitization.
//
// Thermal printers in their default code page only render ASCII reliably.
// Accented letters are decomposed (NFKD) and their combining marks dropped,
// then anything outside the allowed byte set is removed.

use unicode_normalization::UnicodeNormalization;

/// Blank lines fed before the cut so the last line clears the blade.
pub const FEED_LINES: usize = 8;

/// ESC/POS partial cut (`GS V 1`).
pub const PARTIAL_CUT: &[u8] = b"\x1d\x56\x01";

const ESC: char = '\x1b';
const GS: char = '\x1d';

/// Which channel the sanitized text is headed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeMode {
    /// Raw bytes to the spooler: ESC and GS sequences pass through.
    Raw,
    /// Text drawn by a renderer: no control bytes at all.
    Rendered,
}

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036f}').contains(&c)
}

fn is_allowed(c: char, mode: SanitizeMode) -> bool {
    match c {
        '\t' | '\n' | '\r' | ' '..='~' => true,
        ESC | GS => mode == SanitizeMode::Raw,
        _ => false,
    }
}

/// Strip diacritics and every character outside the allowance for `mode`.
pub fn sanitize_with(content: &str, mode: SanitizeMode) -> String {
    content
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| is_allowed(*c, mode))
        .collect()
}

/// Sanitize for a rendered channel.
pub fn sanitize(content: &str) -> String {
    sanitize_with(content, SanitizeMode::Rendered)
}

/// Bytes for the raw channel: sanitized text, the feed, then the cut.
pub fn raw_payload(content: &str) -> Vec<u8> {
    let text = sanitize_with(content, SanitizeMode::Raw);
    let mut bytes = Vec::with_capacity(text.len() + FEED_LINES + PARTIAL_CUT.len());
    bytes.extend_from_slice(text.as_bytes());
    bytes.extend(std::iter::repeat_n(b'\n', FEED_LINES));
    bytes.extend_from_slice(PARTIAL_CUT);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_portuguese_diacritics() {
        assert_eq!(sanitize("Café com Pão"), "Cafe com Pao");
        assert_eq!(sanitize("Açaí, Limão & Maçã"), "Acai, Limao & Maca");
    }

    #[test]
    fn drops_characters_without_ascii_decomposition() {
        assert_eq!(sanitize("R$ 10 • total €"), "R$ 10  total ");
        assert_eq!(sanitize("½ porção"), "12 porcao");
    }

    #[test]
    fn rendered_mode_removes_control_sequences() {
        let input = "\x1b@Pedido\x1dV\x01\n";
        assert_eq!(sanitize(input), "@PedidoV\n");
        assert_eq!(sanitize_with(input, SanitizeMode::Raw), "\x1b@Pedido\x1dV\n");
    }

    #[test]
    fn raw_payload_ends_with_feed_and_cut() {
        let bytes = raw_payload("Mesa 4");
        assert!(bytes.starts_with(b"Mesa 4"));
        assert!(bytes.ends_with(b"\n\n\n\n\n\n\n\n\x1d\x56\x01"));
        assert!(
            bytes[..bytes.len() - PARTIAL_CUT.len()]
                .iter()
                .all(|b| matches!(b, b'\t' | b'\n' | b'\r' | 0x1b | 0x1d | 0x20..=0x7e))
        );
    }

    #[test]
    fn tabs_and_line_endings_survive() {
        assert_eq!(sanitize("a\tb\r\nc"), "a\tb\r\nc");
    }
}

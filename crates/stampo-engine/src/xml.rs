//! Entity handling for the OOXML text nodes the engine rewrites.

use quick_xml::escape as qx;

/// Escape text for inclusion inside a `<w:t>` element.
pub(crate) fn escape(text: &str) -> String {
    qx::escape(text).into_owned()
}

/// Decode entities and character references. A malformed reference leaves the
/// text untouched instead of failing the whole part.
pub(crate) fn unescape(text: &str) -> String {
    match qx::unescape(text) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trips_markup_characters() {
        assert_eq!(escape("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(unescape("a &lt; b &amp; c &gt; d"), "a < b & c > d");
    }

    #[test]
    fn unescape_handles_character_references() {
        assert_eq!(unescape("caf&#233;"), "café");
        assert_eq!(unescape("caf&#xE9;"), "café");
        assert_eq!(unescape("broken &unknown; stays"), "broken &unknown; stays");
    }
}

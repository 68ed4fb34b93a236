use shared::{
    domain::ChatMode,
    protocol::OutgoingSegment,
};

/// Chat markup parser seam. The real parser lives outside this crate; the
/// engine only needs "text in, segments out".
pub trait MarkupParser: Send + Sync {
    fn parse(&self, text: &str, mode: ChatMode) -> Vec<OutgoingSegment>;
}

/// No markup: the whole text becomes one plain segment. Whitespace-only
/// input parses to nothing, which upstream treats as an empty payload.
pub struct PlainMarkupParser;

impl MarkupParser for PlainMarkupParser {
    fn parse(&self, text: &str, mode: ChatMode) -> Vec<OutgoingSegment> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        vec![OutgoingSegment::plain(text, mode)]
    }
}

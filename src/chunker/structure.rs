//! Structural segmentation for the structure-aware chunking strategy.
//!
//! Text is split into units at headings, blank-line paragraph breaks, and list items. Each
//! unit carries the title of the nearest preceding heading so chunks can attribute their
//! section. Byte ranges are line-aligned, which keeps whitespace tokens from straddling
//! unit boundaries.

use regex::Regex;
use std::sync::OnceLock;

const MAX_SECTION_TITLE_CHARS: usize = 120;

/// A contiguous structural unit of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawUnit {
    pub(crate) start_byte: usize,
    pub(crate) end_byte: usize,
    pub(crate) section: Option<String>,
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("heading regex"))
}

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+]|\d{1,3}[.)])\s+").expect("list item regex"))
}

/// Segment text into structural units in source order.
///
/// Headings become their own unit and update the section title for everything that follows;
/// every list item opens a new unit; blank lines close the current paragraph.
pub(crate) fn segment(text: &str) -> Vec<RawUnit> {
    let mut units = Vec::new();
    let mut section: Option<String> = None;
    // Open unit as (start_byte, end_byte).
    let mut open: Option<(usize, usize)> = None;
    let mut offset = 0;

    for raw_line in text.split_inclusive('\n') {
        let line = raw_line.trim_end_matches(['\n', '\r']);
        let line_start = offset;
        let line_end = line_start + line.len();
        offset += raw_line.len();

        if line.trim().is_empty() {
            close_unit(&mut units, &mut open, section.as_deref());
            continue;
        }

        if let Some(captures) = heading_re().captures(line) {
            close_unit(&mut units, &mut open, section.as_deref());
            let title = truncate_title(captures[2].trim());
            section = Some(title);
            units.push(RawUnit {
                start_byte: line_start,
                end_byte: line_end,
                section: section.clone(),
            });
            continue;
        }

        if list_item_re().is_match(line) {
            close_unit(&mut units, &mut open, section.as_deref());
            open = Some((line_start, line_end));
            continue;
        }

        match &mut open {
            Some((_, end)) => *end = line_end,
            None => open = Some((line_start, line_end)),
        }
    }

    close_unit(&mut units, &mut open, section.as_deref());
    units
}

fn close_unit(units: &mut Vec<RawUnit>, open: &mut Option<(usize, usize)>, section: Option<&str>) {
    if let Some((start, end)) = open.take() {
        units.push(RawUnit {
            start_byte: start,
            end_byte: end,
            section: section.map(str::to_string),
        });
    }
}

fn truncate_title(title: &str) -> String {
    title.chars().take(MAX_SECTION_TITLE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let text = "first paragraph\nstill first\n\nsecond paragraph\n";
        let units = segment(text);
        assert_eq!(units.len(), 2);
        assert_eq!(&text[units[0].start_byte..units[0].end_byte], "first paragraph\nstill first");
        assert_eq!(&text[units[1].start_byte..units[1].end_byte], "second paragraph");
        assert!(units[0].section.is_none());
    }

    #[test]
    fn headings_set_section_for_following_units() {
        let text = "# Dosage\nTake twice daily.\n\n# Storage\nKeep refrigerated.\n";
        let units = segment(text);
        assert_eq!(units.len(), 4);
        assert_eq!(units[0].section.as_deref(), Some("Dosage"));
        assert_eq!(units[1].section.as_deref(), Some("Dosage"));
        assert_eq!(units[2].section.as_deref(), Some("Storage"));
        assert_eq!(units[3].section.as_deref(), Some("Storage"));
    }

    #[test]
    fn list_items_become_individual_units() {
        let text = "Instructions:\n- wash hands\n- apply ointment\n1. wait\n";
        let units = segment(text);
        assert_eq!(units.len(), 4);
        assert_eq!(&text[units[1].start_byte..units[1].end_byte], "- wash hands");
        assert_eq!(&text[units[3].start_byte..units[3].end_byte], "1. wait");
    }

    #[test]
    fn list_item_continuation_lines_stay_in_the_item() {
        let text = "- first item\n  continues here\n- second item\n";
        let units = segment(text);
        assert_eq!(units.len(), 2);
        assert_eq!(
            &text[units[0].start_byte..units[0].end_byte],
            "- first item\n  continues here"
        );
    }

    #[test]
    fn long_heading_titles_are_truncated() {
        let text = format!("# {}\nbody\n", "x".repeat(200));
        let units = segment(&text);
        assert_eq!(units[0].section.as_ref().map(String::len), Some(120));
    }
}

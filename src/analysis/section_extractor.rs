// =============================================================================
// section_extractor.rs — THE SEGMENTER
// =============================================================================
//
// Splits filing text into canonical sections by form type. The tag table is
// data (a `LazyLock<Vec<SectionSpec>>`), not code, so adding a form or
// retagging a section never touches the scan algorithm (Design Note:
// regex-based extraction).
//
// Known form types: scan lines, first pattern in declaration order wins on
// collision (Open Question 2 — 10-Q's LEGAL_PROCEEDINGS/FINANCIAL_STATEMENTS
// both start with "ITEM 1"; we resolve ties by table order, not by a Part
// II distinction the source's data didn't actually encode). The same rule
// means 8-K's catch-all TRIGGERING_EVENTS pattern (`ITEM [1-9]`) has to be
// declared after the specific ITEM 9.01 tags, since "9" satisfies `[1-9]`
// too — table order is the only thing keeping those two reachable.
//
// Unknown form types: a line is promoted to a header when it looks like a
// shouted-out heading and is followed by ordinary prose (see
// `looks_like_heuristic_header`); content before the first such header
// becomes a PREAMBLE section instead of being discarded.
// =============================================================================

use crate::models::Section;
use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

pub struct SectionSpec {
    pub form: &'static str,
    pub tag: &'static str,
    pub name: &'static str,
    pub pattern: &'static str,
}

/// The section tag table, in declaration order. First match wins.
pub static SECTION_TABLE: &[SectionSpec] = &[
    SectionSpec { form: "10-K", tag: "BUSINESS", name: "Business", pattern: r"(?i)^ITEM\s+1[.\s]+BUSINESS" },
    SectionSpec { form: "10-K", tag: "RISK_FACTORS", name: "Risk Factors", pattern: r"(?i)^ITEM\s+1A[.\s]+RISK\s+FACTORS" },
    SectionSpec { form: "10-K", tag: "PROPERTIES", name: "Properties", pattern: r"(?i)^ITEM\s+2[.\s]+PROPERTIES" },
    SectionSpec { form: "10-K", tag: "LEGAL_PROCEEDINGS", name: "Legal Proceedings", pattern: r"(?i)^ITEM\s+3[.\s]+LEGAL\s+PROCEEDINGS" },
    SectionSpec { form: "10-K", tag: "SELECTED_FINANCIAL", name: "Selected Financial Data", pattern: r"(?i)^ITEM\s+6[.\s]+SELECTED\s+FINANCIAL" },
    SectionSpec { form: "10-K", tag: "MD_A", name: "Management's Discussion", pattern: r"(?i)^ITEM\s+7[.\s]+MANAGEMENT'?S\s+DISCUSSION" },
    SectionSpec { form: "10-K", tag: "FINANCIAL_STATEMENTS", name: "Financial Statements", pattern: r"(?i)^ITEM\s+8[.\s]+FINANCIAL\s+STATEMENTS" },
    SectionSpec { form: "10-K", tag: "CONTROLS", name: "Controls and Procedures", pattern: r"(?i)^ITEM\s+9A[.\s]+CONTROLS\s+AND\s+PROCEDURES" },
    SectionSpec { form: "10-Q", tag: "FINANCIAL_STATEMENTS", name: "Financial Statements", pattern: r"(?i)^ITEM\s+1[.\s]+FINANCIAL\s+STATEMENTS" },
    SectionSpec { form: "10-Q", tag: "MD_A", name: "Management's Discussion", pattern: r"(?i)^ITEM\s+2[.\s]+MANAGEMENT'?S\s+DISCUSSION" },
    SectionSpec { form: "10-Q", tag: "CONTROLS", name: "Controls and Procedures", pattern: r"(?i)^ITEM\s+4[.\s]+CONTROLS\s+AND\s+PROCEDURES" },
    SectionSpec { form: "10-Q", tag: "LEGAL_PROCEEDINGS", name: "Legal Proceedings", pattern: r"(?i)^ITEM\s+1[.\s]+LEGAL\s+PROCEEDINGS" },
    // The two ITEM 9.01 tags must precede the TRIGGERING_EVENTS catch-all:
    // `[1-9]` matches the "9" in "9.01" too, so the generic pattern would
    // shadow both of these permanently if it came first.
    SectionSpec { form: "8-K", tag: "FINANCIAL_STATEMENTS", name: "Financial Statements", pattern: r"(?i)^ITEM\s+9\.01[.\s]+FINANCIAL\s+STATEMENTS" },
    SectionSpec { form: "8-K", tag: "EXHIBITS", name: "Exhibits", pattern: r"(?i)^ITEM\s+9\.01[.\s]+EXHIBITS" },
    SectionSpec { form: "8-K", tag: "TRIGGERING_EVENTS", name: "Triggering Events", pattern: r"(?i)^ITEM\s+[1-9][.\s]" },
];

static COMPILED_TABLE: LazyLock<Vec<(&'static SectionSpec, Regex)>> = LazyLock::new(|| {
    SECTION_TABLE
        .iter()
        .map(|spec| (spec, Regex::new(spec.pattern).expect("section pattern compiles")))
        .collect()
});

fn patterns_for_form(form_type: &str) -> Vec<&'static (&'static SectionSpec, Regex)> {
    COMPILED_TABLE
        .iter()
        .filter(|(spec, _)| spec.form == form_type)
        .collect()
}

/// Splits `text` into ordered sections for `form_type`.
pub fn extract_sections(filing_id: Uuid, text: &str, form_type: &str) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    let patterns = patterns_for_form(form_type);

    if patterns.is_empty() {
        extract_unknown_form(filing_id, &lines)
    } else {
        extract_known_form(filing_id, &lines, &patterns)
    }
}

fn extract_known_form(
    filing_id: Uuid,
    lines: &[&str],
    patterns: &[&(&'static SectionSpec, Regex)],
) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<(usize, &'static SectionSpec)> = None;
    let mut order = 0u32;

    for (i, line) in lines.iter().enumerate() {
        if let Some((_, spec)) = patterns.iter().find(|(_, re)| re.is_match(line)) {
            if let Some((start, prev_spec)) = current.take() {
                sections.push(build_section(filing_id, prev_spec.tag, prev_spec.name, order, start, i - 1, lines));
                order += 1;
            }
            current = Some((i, spec));
        }
    }

    if let Some((start, spec)) = current {
        sections.push(build_section(filing_id, spec.tag, spec.name, order, start, lines.len().saturating_sub(1), lines));
    }

    sections
}

fn extract_unknown_form(filing_id: Uuid, lines: &[&str]) -> Vec<Section> {
    let mut headers: Vec<usize> = Vec::new();
    for i in 0..lines.len() {
        if looks_like_heuristic_header(lines, i) {
            headers.push(i);
        }
    }

    let mut sections = Vec::new();
    let mut order = 0u32;

    let first_header = headers.first().copied().unwrap_or(lines.len());
    if first_header > 0 {
        sections.push(build_section(filing_id, "PREAMBLE", "Preamble", order, 0, first_header.saturating_sub(1), lines));
        order += 1;
    }

    for (idx, &start) in headers.iter().enumerate() {
        let end = headers.get(idx + 1).map(|&n| n - 1).unwrap_or(lines.len() - 1);
        let name = lines[start].trim().to_string();
        let tag = normalize_heuristic_tag(&name);
        sections.push(build_section(filing_id, &tag, &name, order, start, end, lines));
        order += 1;
    }

    sections
}

fn build_section(
    filing_id: Uuid,
    section_type: &str,
    name: &str,
    order: u32,
    line_start: usize,
    line_end: usize,
    lines: &[&str],
) -> Section {
    let content = lines[line_start..=line_end.max(line_start)].join("\n").trim_end().to_string();
    Section {
        filing_id,
        section_type: section_type.to_string(),
        name: name.to_string(),
        order,
        line_start: line_start as u32,
        line_end: line_end as u32,
        content,
    }
}

fn normalize_heuristic_tag(name: &str) -> String {
    name.to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

fn uppercase_ratio(s: &str) -> f64 {
    let letters: Vec<char> = s.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return 0.0;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters.len() as f64
}

/// A line is promoted to a header when non-empty, <=200 chars, uppercase
/// ratio >=0.7, AND at least one of the next three non-empty lines has
/// uppercase ratio <0.5 and length >10 (distinguishing a heading from a
/// block of all-caps boilerplate).
fn looks_like_heuristic_header(lines: &[&str], i: usize) -> bool {
    let line = lines[i].trim();
    if line.is_empty() || line.len() > 200 || uppercase_ratio(line) < 0.7 {
        return false;
    }

    lines[i + 1..]
        .iter()
        .filter(|l| !l.trim().is_empty())
        .take(3)
        .any(|l| uppercase_ratio(l) < 0.5 && l.trim().len() > 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_known_10k_sections() {
        let text = "ITEM 1. BUSINESS\nWe sell phones.\nITEM 1A. RISK FACTORS\nMany risks.\n";
        let sections = extract_sections(Uuid::new_v4(), text, "10-K");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].section_type, "BUSINESS");
        assert!(sections[0].content.contains("We sell phones."));
        assert_eq!(sections[1].section_type, "RISK_FACTORS");
    }

    #[test]
    fn discards_pre_first_match_content_for_known_forms() {
        let text = "Cover page junk\nITEM 1. BUSINESS\nReal content.\n";
        let sections = extract_sections(Uuid::new_v4(), text, "10-K");
        assert_eq!(sections.len(), 1);
        assert!(!sections[0].content.contains("Cover page junk"));
    }

    #[test]
    fn ten_q_first_match_wins_on_item_1_collision() {
        // "ITEM 1. FINANCIAL STATEMENTS" and "ITEM 1. LEGAL PROCEEDINGS" both
        // start with "ITEM 1" for 10-Q; FINANCIAL_STATEMENTS is declared
        // first in the table so it wins on this line.
        let text = "ITEM 1. FINANCIAL STATEMENTS\nBalance sheet.\n";
        let sections = extract_sections(Uuid::new_v4(), text, "10-Q");
        assert_eq!(sections[0].section_type, "FINANCIAL_STATEMENTS");
    }

    #[test]
    fn eight_k_item_9_01_tags_win_over_triggering_events_catch_all() {
        let text = "ITEM 2.02. RESULTS OF OPERATIONS\nEarnings released.\nITEM 9.01. FINANCIAL STATEMENTS\nPro forma figures.\nITEM 9.01. EXHIBITS\nExhibit list.\n";
        let sections = extract_sections(Uuid::new_v4(), text, "8-K");
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].section_type, "TRIGGERING_EVENTS");
        assert_eq!(sections[1].section_type, "FINANCIAL_STATEMENTS");
        assert_eq!(sections[2].section_type, "EXHIBITS");
    }

    #[test]
    fn unknown_form_gets_preamble_and_heuristic_headers() {
        let text = "Some intro line.\nMORE INTRO\nANNUAL SUMMARY OF OPERATIONS\nThis quarter we grew revenue nicely.\nAnother normal line here.\nA third normal line.\n";
        let sections = extract_sections(Uuid::new_v4(), text, "FORM-X");
        assert_eq!(sections[0].section_type, "PREAMBLE");
        assert!(sections.iter().any(|s| s.name == "ANNUAL SUMMARY OF OPERATIONS"));
    }
}

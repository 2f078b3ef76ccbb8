//! Text normalisation and paragraph segmentation.

use regex::Regex;
use std::sync::OnceLock;

/// One matchable unit of text with its section reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    /// `Section 5`, `Section 5.2`, or the sequential fallback `¶3`.
    pub section_ref: String,
    pub text: String,
    /// Position in the document; dedup ties break toward the lowest.
    pub order: usize,
}

/// Normalise typography before segmentation: smart quotes and dashes to
/// ASCII, NBSP to space, space runs collapsed (newlines kept).
pub fn normalise(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for c in text.chars() {
        let mapped: char = match c {
            '\u{2018}' | '\u{2019}' | '\u{201a}' => '\'',
            '\u{201c}' | '\u{201d}' | '\u{201e}' => '"',
            '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
            '\u{a0}' | '\u{2009}' | '\u{202f}' => ' ',
            other => other,
        };
        if mapped == ' ' {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            if mapped == '\n' {
                // Trailing spaces never survive a line break.
                while out.ends_with(' ') {
                    out.pop();
                }
            }
            out.push(mapped);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

fn numbered_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+(?:\.\d+)*)[.)]?\s+\S").unwrap())
}

fn bullet_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Lettered "(a) ..." and lowercase-roman "iv) ..." bullets.
    RE.get_or_init(|| Regex::new(r"^(?:\(([a-z])\)|([ivxl]+)[.)])\s+\S").unwrap())
}

/// Split normalised text into paragraphs.
///
/// Boundaries are blank lines and heading lines (numbered headings,
/// lettered or roman bullets). A heading line opens a new paragraph and its
/// text is merged into the paragraph body, so `5. Price` becomes part of
/// the PRICE clause's text block. Paragraphs between headings inherit the
/// last heading's section reference.
pub fn segment(text: &str) -> Vec<Paragraph> {
    let mut paragraphs: Vec<Paragraph> = Vec::new();
    let mut current = String::new();
    let mut current_ref: Option<String> = None;
    let mut last_heading_ref: Option<String> = None;

    let flush =
        |buf: &mut String, sref: &mut Option<String>, paragraphs: &mut Vec<Paragraph>| {
            let body = buf.trim();
            if !body.is_empty() {
                let order = paragraphs.len();
                let section_ref = sref
                    .clone()
                    .unwrap_or_else(|| format!("\u{b6}{}", order + 1));
                paragraphs.push(Paragraph {
                    section_ref,
                    text: body.to_string(),
                    order,
                });
            }
            buf.clear();
        };

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush(&mut current, &mut current_ref, &mut paragraphs);
            // Paragraphs that follow without their own heading stay in the
            // current section.
            current_ref = last_heading_ref.clone();
            continue;
        }
        if let Some(caps) = numbered_heading_re().captures(trimmed) {
            flush(&mut current, &mut current_ref, &mut paragraphs);
            let number = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let sref = format!("Section {number}");
            current_ref = Some(sref.clone());
            last_heading_ref = Some(sref);
            current.push_str(trimmed);
            current.push(' ');
            continue;
        }
        if bullet_heading_re().is_match(trimmed) {
            flush(&mut current, &mut current_ref, &mut paragraphs);
            current_ref = last_heading_ref.clone();
            current.push_str(trimmed);
            current.push(' ');
            continue;
        }
        current.push_str(trimmed);
        current.push(' ');
    }
    flush(&mut current, &mut current_ref, &mut paragraphs);
    paragraphs
}

use serde::Serialize;

/// Token the upstream summariser is instructed to place before every finding.
pub const SECTION_DELIMITER: &str = "###SECTION###";
/// Title used when a delimited fragment's first line is too long to be a heading.
pub const DEFAULT_TITLE: &str = "Medical Finding";
/// Title of the first section produced by the header-scanning fallback.
pub const INTRODUCTION_TITLE: &str = "Introduction";

const MAX_HEADING_CHARS: usize = 100;
const HEADER_KEYWORDS: [&str; 5] = ["panel", "test", "function", "results", "summary"];
const BULLET_MARKERS: [char; 2] = ['•', '-'];

/// One titled slice of the source document, corresponding to a single finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    title: String,
    content: String,
}

impl Section {
    fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Splits a generated report explanation into ordered sections.
///
/// Documents carrying [`SECTION_DELIMITER`] are split on it exactly. Anything else
/// goes through a line-oriented heuristic that prefers splitting too often over
/// merging two findings into one section. Never fails: a document without any
/// usable text yields an empty list.
pub fn parse_sections(document: &str) -> Vec<Section> {
    if document.contains(SECTION_DELIMITER) {
        split_on_delimiter(document)
    } else {
        split_on_headers(document)
    }
}

fn split_on_delimiter(document: &str) -> Vec<Section> {
    document
        .split(SECTION_DELIMITER)
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .map(|fragment| Section::new(fragment_title(fragment), fragment))
        .collect()
}

fn fragment_title(fragment: &str) -> String {
    let first_line = fragment.lines().next().unwrap_or_default().trim();

    if let Some((label, _)) = first_line.split_once(':') {
        let label = label.trim_end();
        if !label.is_empty() {
            return label.to_string();
        }
    } else if first_line.chars().count() < MAX_HEADING_CHARS {
        return first_line.to_string();
    }

    DEFAULT_TITLE.to_string()
}

fn split_on_headers(document: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut title = INTRODUCTION_TITLE.to_string();
    let mut buffer = String::new();

    for line in document.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }

        if is_header(line) && !buffer.is_empty() {
            let finished = std::mem::take(&mut buffer);
            sections.push(Section::new(title, finished));
            title = line.trim_end_matches(':').to_string();
        } else {
            buffer.push_str(line);
            buffer.push('\n');
        }
    }

    if !buffer.is_empty() {
        sections.push(Section::new(title, buffer));
    }

    sections
}

fn is_header(line: &str) -> bool {
    if line.chars().count() >= MAX_HEADING_CHARS || line.starts_with(BULLET_MARKERS) {
        return false;
    }

    let lower = line.to_lowercase();
    line.ends_with(':')
        || is_all_caps(line)
        || HEADER_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

// At least one cased letter and no lower-case ones.
fn is_all_caps(line: &str) -> bool {
    let mut saw_upper = false;
    for c in line.chars() {
        if c.is_lowercase() {
            return false;
        }
        saw_upper |= c.is_uppercase();
    }
    saw_upper
}

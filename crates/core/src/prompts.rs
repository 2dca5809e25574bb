//! Instructions sent to the generator for each kind of turn.

use std::collections::HashMap;

pub const INTRODUCTION_KEY: &str = "introduction";
pub const CONCLUSION_KEY: &str = "conclusion";
pub const SECTION_KEY: &str = "section";

const DEFAULT_INTRODUCTION: &str = "You are a compassionate AI named LucidCare Assistant. \
Gently introduce yourself in 2-3 sentences and explain that you will help the patient \
understand their report.";

const DEFAULT_CONCLUSION: &str = "You have finished explaining all sections. Provide a warm, \
caring, 2-3 sentence closing message encouraging the patient.";

const DEFAULT_SECTION_PERSONA: &str = "You are a caring nurse explaining ONE specific test result.";

// Appended to every section instruction, including operator overrides.
const SECTION_RULES: &str = "=== RULES ===
- NEVER use patient names or any other proper names
- NEVER refer to the patient in the third person (no he, she, they, his, her, their)
- Use only 'you', 'your', 'I', 'we'
- Exactly 3-5 sentences
- Include the specific result value
- Compare it to the reference range
- Stay warm, supportive, and human";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub introduction: String,
    pub conclusion: String,
    pub section_persona: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            introduction: DEFAULT_INTRODUCTION.to_string(),
            conclusion: DEFAULT_CONCLUSION.to_string(),
            section_persona: DEFAULT_SECTION_PERSONA.to_string(),
        }
    }
}

impl Prompts {
    /// Defaults with any of `introduction`, `conclusion` or `section` replaced by
    /// the matching non-blank entry of `overrides`.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let pick = |key: &str, default: &str| {
            overrides
                .get(key)
                .map(|text| text.trim())
                .filter(|text| !text.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        Self {
            introduction: pick(INTRODUCTION_KEY, DEFAULT_INTRODUCTION),
            conclusion: pick(CONCLUSION_KEY, DEFAULT_CONCLUSION),
            section_persona: pick(SECTION_KEY, DEFAULT_SECTION_PERSONA),
        }
    }

    pub fn section(&self, title: &str, emotion: &str, preface: &str, data: &str) -> String {
        format!(
            "{persona}\nPatient emotion: {emotion}. {preface}\n\n=== TEST ===\n{title}\n=== DATA ===\n{data}\n\n{SECTION_RULES}\n",
            persona = self.section_persona,
        )
    }
}

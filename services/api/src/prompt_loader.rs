use anyhow::{Context, Result};
use lucidcare_core::prompts::{CONCLUSION_KEY, INTRODUCTION_KEY, SECTION_KEY};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const OVERRIDE_KEYS: [&str; 3] = [INTRODUCTION_KEY, CONCLUSION_KEY, SECTION_KEY];

/// Collects prompt overrides from the `*.md` files in `dir_path`.
///
/// Only `introduction.md`, `conclusion.md` and `section.md` are recognised. Other
/// markdown files are reported and skipped, as are blank overrides.
pub fn load_overrides(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut overrides = HashMap::new();

    let entries = fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?;

    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("md") {
            continue;
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("Could not get file stem for prompt file")?;
        if !OVERRIDE_KEYS.contains(&stem) {
            tracing::warn!(file = %path.display(), "Ignoring unknown prompt file");
            continue;
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
        if text.trim().is_empty() {
            tracing::warn!(prompt = stem, "Prompt override is blank; keeping the built-in text");
            continue;
        }

        tracing::debug!(prompt = stem, bytes = text.len(), "Loaded prompt override");
        overrides.insert(stem.to_string(), text);
    }

    Ok(overrides)
}

/// Label assumed when the caller does not report an emotion.
pub const DEFAULT_EMOTION: &str = "neutral";

/// The closed set of affect labels the caller's emotion tracker can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emotion {
    Sad,
    Fearful,
    Angry,
    Surprised,
    Happy,
    Neutral,
    Disgusted,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Sad,
        Emotion::Fearful,
        Emotion::Angry,
        Emotion::Surprised,
        Emotion::Happy,
        Emotion::Neutral,
        Emotion::Disgusted,
    ];

    /// Case-insensitive lookup; `None` for anything outside the known set.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "sad" => Some(Emotion::Sad),
            "fearful" => Some(Emotion::Fearful),
            "angry" => Some(Emotion::Angry),
            "surprised" => Some(Emotion::Surprised),
            "happy" => Some(Emotion::Happy),
            "neutral" => Some(Emotion::Neutral),
            "disgusted" => Some(Emotion::Disgusted),
            _ => None,
        }
    }

    pub fn preface(self) -> &'static str {
        match self {
            Emotion::Sad => "I can see you might be feeling a bit sad.",
            Emotion::Fearful => "I sense this might be making you anxious.",
            Emotion::Angry => "I understand you might be feeling frustrated.",
            Emotion::Surprised => "I see this caught you off guard.",
            Emotion::Happy => "I'm glad to see you're feeling positive!",
            Emotion::Neutral => "Let's take this one step at a time together.",
            Emotion::Disgusted => "I know this information can feel uncomfortable.",
        }
    }
}

/// Empathetic lead-in for an emotion label. Unknown or empty labels get `""`.
pub fn preface(label: &str) -> &'static str {
    Emotion::from_label(label).map_or("", Emotion::preface)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_known_label_has_a_distinct_preface() {
        let prefaces: HashSet<&str> = Emotion::ALL.iter().map(|e| e.preface()).collect();

        assert_eq!(prefaces.len(), Emotion::ALL.len());
        assert!(prefaces.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn labels_are_case_insensitive() {
        assert_eq!(preface("SAD"), Emotion::Sad.preface());
        assert_eq!(preface(" Fearful "), Emotion::Fearful.preface());
        assert_eq!(preface(DEFAULT_EMOTION), Emotion::Neutral.preface());
    }

    #[test]
    fn unknown_labels_map_to_empty_preface() {
        for label in ["", "bored", "contempt", "neutral-ish", "😐"] {
            assert_eq!(preface(label), "", "label {label:?}");
        }
    }
}

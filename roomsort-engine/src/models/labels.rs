//! Closed label vocabularies for both classification tiers

use super::image_record::Classification;

/// Labels the fast-tier detector can return that we accept.
///
/// The detector has no "Front" label, so that room is left to the fallback tier.
pub const FAST_TIER_LABELS: &[&str] = &[
    "Backyard",
    "Basement",
    "Bathroom",
    "Bedroom",
    "Dining Room",
    "Garage",
    "Kitchen",
    "Living Room",
    "Aerial View",
    "Plot",
    "Floor Plan",
    "Pool",
    "Office",
    "Wine Cellar",
    "Hallway",
    "Terrace",
];

/// Fallback-tier vocabulary: prompt keyword -> stored label, in match order.
pub const FALLBACK_VOCABULARY: &[(&str, &str)] = &[
    ("BACKYARD", "Backyard"),
    ("BASEMENT", "Basement"),
    ("BATHROOM", "Bathroom"),
    ("BEDROOM", "Bedroom"),
    ("DINING-ROOM", "Dining Room"),
    ("FRONT", "Front"),
    ("GARAGE", "Garage"),
    ("KITCHEN", "Kitchen"),
    ("LIVING-ROOM", "Living Room"),
    ("AERIAL-VIEW", "Aerial View"),
    ("PLOT", "Plot"),
    ("FLOOR-PLAN", "Floor Plan"),
    ("POOL", "Pool"),
    ("OFFICE", "Office"),
    ("WINE-CELLAR", "Wine Cellar"),
    ("HALLWAY", "Hallway"),
    ("STORAGE", "Storage"),
    ("TERRACE", "Terrace"),
    ("UTILITY-ROOM", "Utility Room"),
    ("UNCLASSIFIED", "Unclassified"),
];

/// Accept a fast-tier label only if it is part of the closed set
pub fn fast_tier_label(name: &str) -> Option<&'static str> {
    FAST_TIER_LABELS.iter().copied().find(|label| *label == name)
}

/// Prompt sent to the vision-language classifier
pub fn fallback_prompt() -> String {
    let keys: Vec<&str> = FALLBACK_VOCABULARY.iter().map(|(key, _)| *key).collect();
    format!(
        "Identify the location in this image with a single word: {}.",
        keys.join(", ")
    )
}

/// Map free text to the vocabulary by substring containment.
///
/// First keyword (in vocabulary order) contained in `text` wins; no match is
/// `Unclassified`. Matching is case-sensitive against the upper-case keywords.
pub fn match_fallback_label(text: &str) -> Classification {
    FALLBACK_VOCABULARY
        .iter()
        .find(|(key, _)| text.contains(key))
        .map(|(_, label)| Classification::from(*label))
        .unwrap_or(Classification::Unclassified)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_tier_label_closed_set() {
        assert_eq!(fast_tier_label("Kitchen"), Some("Kitchen"));
        assert_eq!(fast_tier_label("Front"), None);
        assert_eq!(fast_tier_label("kitchen"), None);
    }

    #[test]
    fn test_match_single_keyword() {
        assert_eq!(
            match_fallback_label("LIVING-ROOM"),
            Classification::Label("Living Room".into())
        );
    }

    #[test]
    fn test_match_first_vocabulary_entry_wins() {
        // Both present; BATHROOM precedes KITCHEN in the vocabulary
        assert_eq!(
            match_fallback_label("KITCHEN or maybe BATHROOM"),
            Classification::Label("Bathroom".into())
        );
    }

    #[test]
    fn test_no_match_is_unclassified() {
        assert_eq!(match_fallback_label("a sunny room"), Classification::Unclassified);
        assert_eq!(match_fallback_label("UNCLASSIFIED"), Classification::Unclassified);
    }

    #[test]
    fn test_prompt_lists_every_keyword() {
        let prompt = fallback_prompt();
        for (key, _) in FALLBACK_VOCABULARY {
            assert!(prompt.contains(key));
        }
    }
}

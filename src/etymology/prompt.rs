//! Prompt construction for etymology generation.

/// Era used when the caller leaves it blank.
pub const DEFAULT_ERA: &str = "Modern Day";

/// Returns the trimmed era, or [`DEFAULT_ERA`] when it is blank.
pub fn effective_era(era: &str) -> &str {
    let trimmed = era.trim();
    if trimmed.is_empty() {
        DEFAULT_ERA
    } else {
        trimmed
    }
}

/// Build the instruction sent to the model for `(word, era)`.
///
/// The time-capsule requirements are the part that matters: the usage
/// example must reflect the word as understood in the target era, fall back
/// to the closest equivalent or root when the word did not exist yet, and
/// contrast old and new meanings when they diverge.
pub fn build_prompt(word: &str, era: &str) -> String {
    let word = word.trim();
    let era = effective_era(era);
    format!(
        "Explain the etymology of the word \"{word}\".\n\
         targetEra: {era}\n\
         \n\
         Strictly follow the schema.\n\
         CRITICAL: For the 'timeCapsule', you must provide a sentence that uses the word \
         \"{word}\" AS IT WAS UNDERSTOOD in the '{era}'.\n\
         If the word did not exist, explain the closest equivalent or its root.\n\
         Contrast the meaning if it has changed significantly (e.g. gay: happy vs homosexual)."
    )
}

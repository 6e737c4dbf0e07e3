//! Text helpers shared by the embedding and completion paths.

/// Default system prompt prepended to every completion context.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Relevant excerpts from earlier conversations may appear before the recent messages.";

/// Reply sent to a user when their request could not be completed.
pub const APOLOGY_TEXT: &str = "Sorry, I couldn't come up with a reply right now. Please try again in a moment.";

/// Strip characters outside the portable text range before sending text to
/// an embedding endpoint.
///
/// Printable ASCII plus newline and tab are kept; everything else is dropped.
#[must_use]
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| matches!(c, ' '..='~' | '\n' | '\t'))
        .collect()
}

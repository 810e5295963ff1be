//! Abstract summarization prompts.
//!
//! Contains the instruction and user prompt templates for summarizing a
//! PubMed abstract for a specialist reader in a target language.

/// Default target language, matching the audience of the original digest
pub const DEFAULT_LANGUAGE: &str = "Japanese";

/// System instruction for abstract summarization
/// Placeholder: {language}
pub const SYSTEM_PROMPT_TEMPLATE: &str = r#"You summarize biomedical research abstracts for medical researchers.

Rules you MUST follow:
- Write the summary in {language}.
- Be accurate: do not add findings, numbers, or claims that are not in the abstract.
- Be concise: a short paragraph or a few bullet points.
- Preserve technical terminology (drug names, gene names, anatomical terms, statistics) exactly; do not simplify it.
- Output the summary only, with no preamble."#;

/// User prompt template for a single abstract
/// Placeholders: {language}, {abstract_text}
pub const USER_PROMPT_TEMPLATE: &str = r#"Summarize the following medical research abstract in {language} for a specialist reader.

--- Abstract ---
{abstract_text}"#;

/// Build the system instruction for a target language
pub fn build_system_prompt(language: &str) -> String {
    SYSTEM_PROMPT_TEMPLATE.replace("{language}", language)
}

/// Build user prompt with abstract text
pub fn build_user_prompt(language: &str, abstract_text: &str) -> String {
    USER_PROMPT_TEMPLATE
        .replace("{language}", language)
        .replace("{abstract_text}", abstract_text)
}

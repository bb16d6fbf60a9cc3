//! Prompt construction and response parsing shared by chat-completion providers.

use crate::{Judgement, ProviderError, UNSORTED};
use serde::Deserialize;

/// Sentinel the model is told to use when nothing fits.
pub const MODEL_UNSORTED: &str = "__UNSORTED__";

#[derive(Debug, Clone, Copy)]
pub enum PromptMode<'a> {
    FilenameOnly,
    Vision,
    TextContent(&'a str),
}

pub fn build_prompt(
    filename: &str,
    destinations: &[String],
    corrections: &[String],
    mode: PromptMode<'_>,
) -> String {
    let corrections_section = if corrections.is_empty() {
        String::new()
    } else {
        format!(
            "\n\nLearn from these past corrections by the user:\n{}\n\nIf a similar filename appears, apply what you learned.",
            corrections.join("\n")
        )
    };

    let (instruction, content_section) = match mode {
        PromptMode::FilenameOnly => (
            "Given a filename, first decide whether it belongs to any of the destinations below, then pick the best one.",
            String::new(),
        ),
        PromptMode::Vision => (
            "Look at the attached image to understand what this file is about. Judge it by its visual content (text, diagrams, code, slides, handwritten notes), not just by the filename.",
            String::new(),
        ),
        PromptMode::TextContent(text) => (
            "Classify this file PRIMARILY by the extracted text below, not the filename. Generic names like 'notes.pdf' are common; the content reveals the subject.",
            format!("\n\nExtracted text content:\n{}", text),
        ),
    };

    format!(
        r#"You are a file organization assistant. {instruction}

Filename: {filename}{content_section}

Available destinations:
{destinations}

Respond with ONLY a JSON object in this format:
{{
  "is_relevant": true,
  "folder": "destination path",
  "confidence": 0.95,
  "reasoning": "brief explanation",
  "rename": null
}}

Rules:
- If the file does not belong in any kind of destination listed (installers, memes, personal media), set is_relevant to false, folder to "" and confidence to 0
- If it is relevant and clearly fits a destination, use the exact path from the list
- If it is relevant but fits none of them, set folder to "{unsorted}"; do not force-fit it
- confidence is between 0 and 1
- rename is an optional clearer filename, or null{corrections}"#,
        instruction = instruction,
        filename = filename,
        content_section = content_section,
        destinations = destinations.join("\n"),
        unsorted = MODEL_UNSORTED,
        corrections = corrections_section,
    )
}

#[derive(Deserialize)]
struct ModelResponse {
    is_relevant: Option<bool>,
    #[serde(default)]
    folder: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    rename: Option<String>,
}

/// Extract the first JSON object from a model reply, tolerating fenced code blocks.
fn json_body(content: &str) -> &str {
    if content.contains("```json") {
        content
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(content)
            .trim()
    } else if content.contains("```") {
        content.split("```").nth(1).unwrap_or(content).trim()
    } else {
        content.trim()
    }
}

pub fn parse_response(content: &str) -> Result<Judgement, ProviderError> {
    let body = json_body(content);
    let parsed: ModelResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::BadResponse(format!("{}: {}", e, body)))?;

    let destination = if parsed.folder == MODEL_UNSORTED {
        UNSORTED.to_string()
    } else {
        parsed.folder
    };

    Ok(Judgement {
        // Missing relevance is treated as irrelevant.
        is_relevant: parsed.is_relevant.unwrap_or(false),
        destination,
        confidence: parsed.confidence.clamp(0.0, 1.0),
        rationale: parsed.reasoning,
        suggested_rename: parsed.rename.filter(|r| !r.trim().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let j = parse_response(
            r#"{"is_relevant": true, "folder": "C:\\Year2\\ML", "confidence": 0.95, "reasoning": "ml lecture"}"#,
        )
        .unwrap();
        assert!(j.is_relevant);
        assert_eq!(j.destination, "C:\\Year2\\ML");
        assert!((j.confidence - 0.95).abs() < 1e-6);
        assert_eq!(j.suggested_rename, None);
    }

    #[test]
    fn takes_first_fenced_block() {
        let content = "Here you go\n```json\n{\"is_relevant\": true, \"folder\": \"A\", \"confidence\": 0.7, \"reasoning\": \"first\"}\n```\n```json\n{\"is_relevant\": true, \"folder\": \"B\", \"confidence\": 0.8, \"reasoning\": \"second\"}\n```";
        assert_eq!(parse_response(content).unwrap().destination, "A");
    }

    #[test]
    fn bare_fence_and_integer_confidence() {
        let content = "```\n{\"is_relevant\": true, \"folder\": \"Math\", \"confidence\": 1, \"reasoning\": \"\"}\n```";
        let j = parse_response(content).unwrap();
        assert_eq!(j.destination, "Math");
        assert!((j.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_relevance_defaults_to_irrelevant() {
        let j = parse_response(r#"{"folder": "Physics", "confidence": 0.9, "reasoning": "x"}"#)
            .unwrap();
        assert!(!j.is_relevant);
    }

    #[test]
    fn confidence_is_clamped_and_sentinel_mapped() {
        let j = parse_response(
            r#"{"is_relevant": true, "folder": "__UNSORTED__", "confidence": 3.5, "reasoning": "none fit", "rename": "  "}"#,
        )
        .unwrap();
        assert_eq!(j.destination, UNSORTED);
        assert_eq!(j.confidence, 1.0);
        assert_eq!(j.suggested_rename, None);
    }

    #[test]
    fn garbage_is_bad_response() {
        assert!(matches!(
            parse_response("not json at all"),
            Err(ProviderError::BadResponse(_))
        ));
    }

    #[test]
    fn prompt_sections_follow_mode() {
        let dests = vec!["ML".to_string(), "Physics".to_string()];
        let p = build_prompt("lecture.pdf", &dests, &[], PromptMode::FilenameOnly);
        assert!(p.contains("Filename: lecture.pdf"));
        assert!(p.contains("ML\nPhysics"));
        assert!(!p.contains("Extracted text content"));
        assert!(!p.contains("Learn from these past corrections"));

        let p = build_prompt("t.pdf", &dests, &[], PromptMode::TextContent("Integration by parts"));
        assert!(p.contains("Extracted text content:\nIntegration by parts"));

        let p = build_prompt("s.png", &dests, &[], PromptMode::Vision);
        assert!(p.contains("attached image"));

        let digest = vec!["\"romer.pdf\" → suggested ML, but user moved to Econ".to_string()];
        let p = build_prompt("t.pdf", &dests, &digest, PromptMode::FilenameOnly);
        assert!(p.contains("Learn from these past corrections"));
        assert!(p.contains("romer.pdf"));
    }
}

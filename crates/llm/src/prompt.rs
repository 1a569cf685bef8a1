//! Batch prompts for release-note translation and insight extraction.

use serde::Serialize;

use crate::provider::Message;

#[derive(Serialize)]
struct PromptItem<'a> {
    id: i64,
    content: &'a str,
}

fn payload(items: &[(i64, &str)]) -> Result<String, serde_json::Error> {
    let items: Vec<PromptItem<'_>> = items
        .iter()
        .map(|&(id, content)| PromptItem { id, content })
        .collect();
    serde_json::to_string(&items)
}

pub fn translation(language: &str, items: &[(i64, &str)]) -> Result<Vec<Message>, serde_json::Error> {
    let system = format!(
        "You are a professional IT technical translator.\n\
         Rules:\n\
         - Do not summarize. Translate every piece of information one to one.\n\
         - Keep the Markdown structure (headings, lists, code blocks) intact.\n\
         - Use a polite, friendly register.\n\
         - Keep technical terms in the original language or add it in parentheses where helpful.\n\
         - Respond with a JSON array only, no other text.\n\
         Translate the `content` of each element into {language}.\n\
         Response format: [{{\"id\": <id>, \"translated\": \"<{language} text>\"}}, ...]"
    );
    Ok(vec![
        Message::system(system),
        Message::user(format!("JSON array:\n{}", payload(items)?)),
    ])
}

pub fn insights(language: &str, items: &[(i64, &str)]) -> Result<Vec<Message>, serde_json::Error> {
    let system = format!(
        "You are a senior full-stack developer with ten years of experience and a technical blog editor.\n\
         Rules:\n\
         - Respond with a JSON array only, no other text.\n\
         - Write shortSummary in {language}, focused on what developers gain.\n\
         - insights.type is one of BREAKING, SECURITY, FEATURE, PERFORMANCE, FIX.\n\
         - Base every reason on the release notes themselves.\n\
         - When there is a BREAKING insight, always fill migrationGuide:\n\
         \x20 - provide before/after code where possible,\n\
         \x20 - otherwise give a one-line checklist.\n\
         - technicalKeywords: about five, lowercase, no duplicates.\n\
         Response format:\n\
         [{{\"id\": <id>, \"shortSummary\": \"...\", \"insights\": [{{\"type\": \"BREAKING\", \"title\": \"...\", \"reason\": \"...\"}}], \
         \"migrationGuide\": {{\"description\": \"...\", \"code\": {{\"before\": \"...\", \"after\": \"...\"}}, \"checklist\": \"...\"}}, \
         \"technicalKeywords\": [\"...\"]}}]"
    );
    Ok(vec![
        Message::system(system),
        Message::user(format!("JSON array:\n{}", payload(items)?)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Role;

    #[test]
    fn test_translation_prompt_embeds_payload() {
        let messages = translation("Korean", &[(3, "Fixed \"quotes\"")]).unwrap();
        assert!(matches!(messages[0].role, Role::System));
        assert!(messages[0].content.contains("into Korean"));
        assert!(messages[1]
            .content
            .ends_with(r#"[{"id":3,"content":"Fixed \"quotes\""}]"#));
    }

    #[test]
    fn test_insight_prompt_lists_types() {
        let messages = insights("German", &[(1, "notes")]).unwrap();
        assert!(messages[0].content.contains("BREAKING, SECURITY, FEATURE, PERFORMANCE, FIX"));
        assert!(messages[0].content.contains("shortSummary in German"));
    }
}

use crate::models::Rule;

/// Build the analysis prompt: a numbered `name: description` list and
/// strict instructions to answer with a bare JSON object.
pub fn build_prompt(rules: &[Rule]) -> String {
    let rules_text = rules
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}: {}", i + 1, r.name, r.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a compliance analyzer. Analyze this PDF document for compliance with these {count} rules:

{rules_text}

CRITICAL: You must respond with ONLY a valid JSON object. No explanations, no markdown, no code blocks.

For EACH rule above, provide a finding with:
- rule: exact rule name from the list
- status: must be exactly "PASS", "FAIL", or "WARNING"
- details: brief explanation (1-2 sentences)

Example format:
{{"findings": [{{"rule": "{example}", "status": "PASS", "details": "Document meets this requirement."}}]}}

Now analyze the document and return ONLY the JSON object:"#,
        count = rules.len(),
        rules_text = rules_text,
        example = rules.first().map(|r| r.name.as_str()).unwrap_or("Rule name"),
    )
}

//! Default prompts.

/// Default prompt for describing extracted fields.
pub const DEFAULT_DESCRIBE_PROMPT: &str = r#"You are documenting the columns of a dataset scraped from a website.

The user asked to extract: {intent}

The dataset has exactly these fields: {fields}

Sample records:
{samples}

For EACH field listed above, write one short sentence describing what the field contains, in terms a data analyst would understand. Do NOT invent fields that are not listed.

Respond with ONLY a JSON object mapping each field name to its description, for example {"title": "Headline of the posting"}. No markdown, no preamble."#;

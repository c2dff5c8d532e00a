//! README written next to each generated connector.

use std::fmt::Write as _;

use crate::deploy::manual_deploy_command;
use crate::models::{ExtractionSchema, GenerationRequest, StorageSchema};

/// Markdown README: what the connector extracts, its schema, and how to
/// test and deploy it by hand.
pub fn render_readme(
    request: &GenerationRequest,
    extraction: &ExtractionSchema,
    storage: &StorageSchema,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", request.target_name());
    let _ = writeln!(out, "Generated connector for <{}>.\n", request.source_url());
    let _ = writeln!(out, "Extraction goal:\n");
    for line in request.intent_text().lines() {
        let _ = writeln!(out, "> {}", line);
    }
    out.push('\n');

    for table in &storage.tables {
        let _ = writeln!(
            out,
            "## Table `{}` (primary key: {})\n",
            table.table_name,
            table.primary_key.join(", ")
        );
        out.push_str("| Column | Type | Required | Description |\n");
        out.push_str("|---|---|---|---|\n");
        for (name, ty) in &table.columns {
            let (required, description) = extraction
                .get(name)
                .map(|f| (f.required, f.description.replace('|', "\\|")))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "| `{}` | {} | {} | {} |",
                name,
                ty.as_str(),
                if required { "yes" } else { "no" },
                description
            );
        }
        out.push('\n');
    }

    let skipped: Vec<&str> = extraction
        .fields
        .iter()
        .filter(|(_, f)| !f.storable)
        .map(|(name, _)| name.as_str())
        .collect();
    if !skipped.is_empty() {
        let _ = writeln!(
            out,
            "Extracted but not stored (too large): {}\n",
            skipped.join(", ")
        );
    }

    out.push_str("## Local test\n\n```sh\n");
    out.push_str("pip install -r requirements.txt fivetran-connector-sdk\n");
    out.push_str("fivetran debug --configuration configuration.json\n```\n\n");
    out.push_str(
        "`configuration.json` holds the extraction API key. It is git-ignored and must not be shared.\n\n",
    );

    out.push_str("## Deploy\n\n```sh\n");
    out.push_str(&manual_deploy_command(
        ".",
        request.destination_name(),
        request.target_name(),
    ));
    out.push_str("\n```\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Record, SampleDataset, Secret};
    use crate::synthesis::Synthesizer;
    use serde_json::json;

    #[test]
    fn test_readme_lists_columns_and_hides_secrets() {
        let records: Vec<Record> = vec![json!({"job_id": "1", "title": "Engineer | Remote"})]
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        let (e, s) = Synthesizer::default()
            .synthesize(&SampleDataset::new(records), "open jobs")
            .unwrap();
        let request = GenerationRequest::new("hn_jobs", "https://x.test/jobs", "open jobs", "warehouse")
            .unwrap()
            .with_credentials(crate::models::Credentials::new(
                Some(Secret::new("fc-live-key")),
                Some(Secret::new("ZmFrZQ==")),
            ));

        let readme = render_readme(&request, &e, &s);
        assert!(readme.starts_with("# hn_jobs"));
        assert!(readme.contains("| `job_id` | STRING | yes |"));
        assert!(readme.contains("$FIVETRAN_API_KEY_BASE64"));
        assert!(!readme.contains("fc-live-key"));
        assert!(!readme.contains("ZmFrZQ=="));
    }
}

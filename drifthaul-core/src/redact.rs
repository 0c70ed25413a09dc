//! Credential redaction for SQL that reaches logs or errors.

use std::sync::LazyLock;

use regex::Regex;

const MASK: &str = "****";

static SECRET_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(AWS_KEY_ID|AWS_SECRET_KEY|AWS_TOKEN|AZURE_SAS_TOKEN|MASTER_KEY|PASSWORD)(\s*=\s*)'(?:[^']|'')*'",
    )
    .expect("static redaction pattern")
});

/// Replace every quoted secret assignment with a fixed mask.
pub fn redact_sql(sql: &str) -> String {
    SECRET_ASSIGNMENT
        .replace_all(sql, |caps: &regex::Captures<'_>| {
            format!("{}{}'{}'", &caps[1], &caps[2], MASK)
        })
        .into_owned()
}

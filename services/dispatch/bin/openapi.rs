use anyhow::Context;
use llami_dispatch::router::openapi_json;

/// Writes the dispatch service's OpenAPI document.
///
/// Usage: `openapi [OUTPUT]`, defaulting to `openapi.json` in the working
/// directory.
fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    let document = openapi_json().context("Failed to render the dispatch API document")?;
    std::fs::write(&path, document).with_context(|| format!("Failed to write {}", path))?;
    println!("Wrote llami dispatch API document to {}", path);
    Ok(())
}

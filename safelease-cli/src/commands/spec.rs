//! Exports the HTTP API's `OpenAPI` document.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use server::openapi::ApiDoc;
use utoipa::OpenApi;

/// Writes the document to `output_path`, picking JSON or YAML from the
/// extension. Without a path, or with the bare words `json` / `yaml`, the
/// document streams to stdout.
///
/// # Errors
/// Returns an error if serialization or writing fails.
pub fn generate_spec(output_path: Option<&str>) -> Result<()> {
    let openapi = ApiDoc::openapi();

    match output_path {
        Some("json") => io::stdout().write_all(openapi.to_pretty_json()?.as_bytes())?,
        Some("yaml") | None => io::stdout().write_all(openapi.to_yaml()?.as_bytes())?,
        Some(path) => {
            let path = Path::new(path);
            let body = if path.extension().is_some_and(|ext| ext == "json") {
                openapi.to_pretty_json()?
            } else {
                openapi.to_yaml()?
            };
            fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
            println!("OpenAPI spec written to {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn json_file_lists_conversation_routes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("openapi.json");
        generate_spec(path.to_str()).unwrap();

        let document: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(document["paths"]["/api/conversations/with/{peer}"].is_object());
        assert!(document["paths"]["/api/conversations/{conversation}/messages"].is_object());
    }

    #[test]
    fn other_extensions_get_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("openapi.txt");
        generate_spec(path.to_str()).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("openapi:"));
    }
}

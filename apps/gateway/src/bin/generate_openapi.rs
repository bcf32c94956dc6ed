//! Writes the REST surface's OpenAPI document to `specs/gateway-api.json`
//! at the workspace root, or to the path given as the first argument.

use std::path::PathBuf;
use std::process::ExitCode;

use utoipa::OpenApi;

fn main() -> ExitCode {
    let out = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../specs/gateway-api.json")
    });

    let doc = match agora_gateway::routes::ApiDoc::openapi().to_pretty_json() {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("failed to render OpenAPI document: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(parent) = out.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("failed to create {}: {e}", parent.display());
            return ExitCode::FAILURE;
        }
    }
    if let Err(e) = std::fs::write(&out, doc) {
        eprintln!("failed to write {}: {e}", out.display());
        return ExitCode::FAILURE;
    }
    println!("Wrote {}", out.display());
    ExitCode::SUCCESS
}

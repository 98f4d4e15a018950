use npv_validator_core::datasets::Dataset;
use npv_validator_core::{NpvValidatorError, NpvValidatorResult};
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// How a document's text is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    Json,
    Yaml,
    /// JSON first, then YAML
    Either,
}

impl Syntax {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Syntax::Yaml,
            _ => Syntax::Json,
        }
    }
}

fn parse_document<T: DeserializeOwned>(
    contents: &str,
    syntax: Syntax,
    source: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    let parsed = match syntax {
        Syntax::Json => serde_json::from_str(contents).map_err(|e| e.to_string()),
        Syntax::Yaml => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
        Syntax::Either => serde_json::from_str(contents).or_else(|json_err| {
            serde_yaml::from_str(contents)
                .map_err(|yaml_err| format!("neither JSON ({json_err}) nor YAML ({yaml_err})"))
        }),
    };
    parsed.map_err(|e| format!("Failed to parse {source}: {e}").into())
}

/// Read a JSON or YAML document (chosen by extension) into a typed struct.
pub fn read_document<T: DeserializeOwned>(path: &str) -> Result<T, Box<dyn std::error::Error>> {
    let canonical = resolve_path(path)?;
    let contents = fs::read_to_string(&canonical)
        .map_err(|e| format!("Failed to read '{}': {}", canonical.display(), e))?;
    parse_document(
        &contents,
        Syntax::from_path(&canonical),
        &format!("'{}'", canonical.display()),
    )
}

/// Decode a document piped on stdin. `None` when stdin is a terminal or
/// carries nothing.
pub fn read_piped<T: DeserializeOwned>() -> Result<Option<T>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    parse_document(trimmed, Syntax::Either, "stdin").map(Some)
}

/// Load a CSV file with a header row as a named dataset. Empty cells
/// become missing values. Any read failure is a data integrity error.
pub fn read_dataset(name: &str, path: &str) -> NpvValidatorResult<Dataset> {
    let integrity = |reason: String| NpvValidatorError::data_integrity(name, reason);
    let canonical = resolve_path(path).map_err(|e| integrity(e.to_string()))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(&canonical)
        .map_err(|e| integrity(format!("failed to open '{}': {e}", canonical.display())))?;

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| integrity(format!("unreadable header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| integrity(format!("unreadable row {}: {e}", i + 1)))?;
        rows.push(
            record
                .iter()
                .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
                .collect(),
        );
    }
    Dataset::new(name, columns, rows)
}

/// Resolve and validate the path, preventing directory traversal.
fn resolve_path(path: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let p = Path::new(path);
    let canonical = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()?.join(p)
    };

    if !canonical.exists() {
        return Err(format!("File not found: {}", canonical.display()).into());
    }

    if !canonical.is_file() {
        return Err(format!("Not a file: {}", canonical.display()).into());
    }

    Ok(canonical)
}

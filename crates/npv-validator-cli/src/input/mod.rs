pub mod file;

use serde::de::DeserializeOwned;

/// The `--input` document when a path is given, otherwise a piped one.
pub fn load_document<T: DeserializeOwned>(
    path: Option<&str>,
) -> Result<Option<T>, Box<dyn std::error::Error>> {
    match path {
        Some(p) => file::read_document(p).map(Some),
        None => file::read_piped(),
    }
}

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

/// Load the stable anonymous client identity, creating and persisting one
/// on first run. The core treats the returned string as opaque and
/// immutable for the whole session.
pub fn load_or_create(path: &Path) -> Result<String> {
    if path.exists() {
        let id = std::fs::read_to_string(path)
            .with_context(|| format!("reading identity file {}", path.display()))?
            .trim()
            .to_string();
        if !id.is_empty() {
            return Ok(id);
        }
    }

    let id = Uuid::new_v4().to_string();
    std::fs::write(path, &id)
        .with_context(|| format!("writing identity file {}", path.display()))?;
    info!("created new client identity at {}", path.display());
    Ok(id)
}

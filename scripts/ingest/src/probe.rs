use crate::error::{IngestError, Result};
use crate::ingest::DurationProbe;
use async_trait::async_trait;
use lofty::config::ParseOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::Path;

/// Reads the playback length from the container/stream headers only.
pub struct LoftyProbe;

#[async_trait]
impl DurationProbe for LoftyProbe {
    async fn duration_secs(&self, path: &Path) -> Result<f64> {
        let path = path.to_path_buf();
        // lofty reads synchronously; keep it off the runtime threads.
        tokio::task::spawn_blocking(move || read_duration(&path))
            .await
            .map_err(|e| IngestError::Probe(format!("probe task failed: {}", e)))?
    }
}

fn read_duration(path: &Path) -> Result<f64> {
    let parse_opts = ParseOptions::new().read_properties(true);
    let tagged_file = Probe::open(path)
        .and_then(|p| p.options(parse_opts).read())
        .map_err(|e| IngestError::Probe(format!("{}: {}", path.display(), e)))?;

    let duration = tagged_file.properties().duration();
    if duration.is_zero() {
        return Err(IngestError::Probe(format!(
            "{}: duration is unknown",
            path.display()
        )));
    }

    Ok(duration.as_secs_f64())
}

/// The catalogue stores whole seconds.
pub fn round_duration(seconds: f64) -> i64 {
    seconds.round() as i64
}

//! Assembly of downloaded units into one artifact.
//!
//! Units are concatenated byte for byte in `sequence_index` order. No
//! container remuxing happens here: MPEG-TS segments concatenate into a
//! playable stream as they are.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::fs::unit_file_name;
use crate::job::{FetchUnit, UnitState};

/// Extension used for a unit whose locator has none.
pub const FALLBACK_EXTENSION: &str = "bin";

/// Local file a unit is downloaded into.
pub fn unit_path(units_dir: &Path, unit: &FetchUnit) -> PathBuf {
    let ext = unit
        .extension()
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
    units_dir.join(unit_file_name(unit.sequence_index, &ext))
}

/// Extension of the assembled artifact.
pub fn artifact_extension(units: &[FetchUnit]) -> String {
    units
        .first()
        .and_then(FetchUnit::extension)
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Concatenate `units` from `units_dir` into `artifact`. Returns its size.
pub async fn assemble(units: &[FetchUnit], units_dir: &Path, artifact: &Path) -> Result<u64> {
    if units.is_empty() {
        return Err(Error::Assembly("nothing to assemble".into()));
    }

    let mut ordered: Vec<&FetchUnit> = units.iter().collect();
    ordered.sort_by_key(|u| u.sequence_index);

    for (expected, unit) in ordered.iter().enumerate() {
        if unit.sequence_index as usize != expected {
            return Err(Error::Assembly(format!(
                "gap in plan: expected unit {}, found {}",
                expected, unit.sequence_index
            )));
        }
        if unit.state != UnitState::Complete {
            return Err(Error::Assembly(format!(
                "unit {} is not complete",
                unit.sequence_index
            )));
        }
    }

    if let Some(parent) = artifact.parent() {
        fs::create_dir_all(parent).await?;
    }

    if ordered.len() == 1 {
        let source = unit_path(units_dir, ordered[0]);
        if !source.exists() {
            // A previous run already moved it into place.
            if let Ok(meta) = fs::metadata(artifact).await {
                return Ok(meta.len());
            }
            return Err(Error::Assembly("unit 0 is missing on disk".into()));
        }
        fs::rename(&source, artifact).await?;
        return Ok(fs::metadata(artifact).await?.len());
    }

    let partial = artifact.with_extension("partial");
    let total = match concat(&ordered, units_dir, &partial).await {
        Ok(total) => total,
        Err(e) => {
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }
    };
    fs::rename(&partial, artifact).await?;

    tracing::debug!(artifact = %artifact.display(), units = ordered.len(), bytes = total, "Assembled artifact");
    Ok(total)
}

/// Write every unit into `partial`. The caller removes it on error.
async fn concat(ordered: &[&FetchUnit], units_dir: &Path, partial: &Path) -> Result<u64> {
    let mut output = File::create(partial).await?;
    let mut total = 0u64;

    for unit in ordered {
        let path = unit_path(units_dir, unit);
        let mut input = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Assembly(format!(
                    "unit {} is missing on disk",
                    unit.sequence_index
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let expected = unit.bytes_total;
        let copied = tokio::io::copy(&mut input, &mut output).await?;
        if expected > 0 && copied != expected {
            return Err(Error::Assembly(format!(
                "unit {} is incomplete ({} of {} bytes)",
                unit.sequence_index, copied, expected
            )));
        }
        total += copied;
    }

    output.flush().await?;
    output.sync_all().await?;
    Ok(total)
}

pub mod appeears;
pub mod cds;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

pub use appeears::appeears;
pub use cds::cds;

use crate::{config, geo::BoundingBox};

use super::CommonArgs;

/// Output root, defaulting to `~/Data`.
pub fn output_root(common: &CommonArgs) -> Result<PathBuf> {
    match &common.output {
        Some(dir) => Ok(dir.clone()),
        None => dirs::home_dir()
            .map(|home| home.join("Data"))
            .ok_or_else(|| anyhow!("No home directory; pass --output")),
    }
}

/// The bounding box given on the command line, or the named zone.
pub fn resolve_area(common: &CommonArgs) -> Result<BoundingBox> {
    match (&common.bbox, &common.zone) {
        (Some(bbox), _) => Ok(*bbox),
        (None, Some(zone)) => config::load_zone(&common.zones, zone)
            .with_context(|| format!("Cannot resolve zone `{}`", zone)),
        (None, None) => Err(anyhow!("Either --bbox or --zone is required")),
    }
}

// -- Tests -------------------------------------------------------------------

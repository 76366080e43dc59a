//! Credentials and zone definitions read from YAML files.

use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{DownloadError, Result},
    geo::BoundingBox,
};

pub const APPEEARS_PORTAL: &str = "AppEEARS";
pub const CDS_PORTAL: &str = "CDS";

/// Login for one data portal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    pub password: String,
}

/// Supplies credentials by portal name.
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self, portal: &str) -> Result<Credentials>;
}

/// Credentials loaded once from a `{portal: {username, password}}` file.
#[derive(Debug, Default)]
pub struct YamlCredentials {
    portals: HashMap<String, Credentials>,
}

impl YamlCredentials {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DownloadError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "loaded credentials file");

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let portals: HashMap<String, Credentials> = serde_yaml::from_str(content)
            .map_err(|e| DownloadError::Config(format!("invalid credentials file: {}", e)))?;

        Ok(YamlCredentials { portals })
    }
}

impl CredentialsProvider for YamlCredentials {
    fn credentials(&self, portal: &str) -> Result<Credentials> {
        self.portals
            .get(portal)
            .cloned()
            .ok_or_else(|| DownloadError::Authentication {
                portal: portal.to_string(),
                reason: "no credentials configured".to_string(),
            })
    }
}

/// Loads the zone called `name` from a `{zone: {lat_min, lat_max, lon_min, lon_max}}` file.
pub fn load_zone(path: &Path, name: &str) -> Result<BoundingBox> {
    let content = fs::read_to_string(path)
        .map_err(|e| DownloadError::Config(format!("cannot read {}: {}", path.display(), e)))?;

    zone_from_yaml(&content, name)
}

fn zone_from_yaml(content: &str, name: &str) -> Result<BoundingBox> {
    let mut zones: HashMap<String, BoundingBox> = serde_yaml::from_str(content)
        .map_err(|e| DownloadError::Config(format!("invalid zones file: {}", e)))?;

    zones
        .remove(name)
        .ok_or_else(|| DownloadError::Config(format!("zone `{}` is not defined", name)))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    const CONFIG: &str = "
AppEEARS:
  username: elodie
  password: secret
CDS:
  password: 0000-token
";

    #[test]
    fn should_resolve_portal_credentials() {
        let provider = YamlCredentials::from_yaml(CONFIG).unwrap();

        let appeears = provider.credentials(APPEEARS_PORTAL).unwrap();
        assert_eq!(appeears.username, "elodie");
        assert_eq!(appeears.password, "secret");

        let cds = provider.credentials(CDS_PORTAL).unwrap();
        assert_eq!(cds.username, "");
        assert_eq!(cds.password, "0000-token");
    }

    #[test]
    fn should_fail_authentication_for_missing_portal() {
        let provider = YamlCredentials::from_yaml(CONFIG).unwrap();

        match provider.credentials("Earthdata") {
            Err(DownloadError::Authentication { portal, .. }) => assert_eq!(portal, "Earthdata"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn should_load_credentials_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let provider = YamlCredentials::from_file(file.path()).unwrap();
        assert!(provider.credentials(APPEEARS_PORTAL).is_ok());

        assert!(YamlCredentials::from_file(Path::new("/nonexistent/config.yml")).is_err());
    }

    #[test]
    fn should_load_zone() {
        let zones = "
France:
  lat_min: 42
  lat_max: 52
  lon_min: -6
  lon_max: 9
";
        let bbox = zone_from_yaml(zones, "France").unwrap();
        assert_eq!(bbox.to_cds_area(), [52.0, -6.0, 42.0, 9.0]);

        assert!(zone_from_yaml(zones, "Spain").is_err());
    }
}

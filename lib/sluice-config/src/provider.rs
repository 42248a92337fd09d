use std::path::{Path, PathBuf};

use figment::{
    providers::{Format as _, Yaml},
    value::{Dict, Map},
    Metadata, Profile, Provider,
};
use snafu::ResultExt as _;

use crate::{ConfigurationError, ReadFile};

/// Configuration values read from a YAML file when the snapshot is taken.
///
/// Later changes to the file are not observed.
pub struct YamlSnapshot {
    path: PathBuf,
    values: Map<Profile, Dict>,
}

impl YamlSnapshot {
    pub fn read(path: &Path) -> Result<Self, ConfigurationError> {
        let contents = std::fs::read_to_string(path).context(ReadFile { path })?;
        let values = Yaml::string(&contents).data()?;

        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }
}

impl Provider for YamlSnapshot {
    fn metadata(&self) -> Metadata {
        Metadata::from("YAML file", self.path.as_path())
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Ok(self.values.clone())
    }
}

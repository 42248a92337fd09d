//! Primitives for loading typed configuration data.
#![deny(missing_docs)]

use std::path::{Path, PathBuf};

use figment::providers::{Env, Serialized};
use figment::{error::Kind, Figment, Provider};
use serde::Deserialize;
use snafu::Snafu;
use tracing::debug;

mod provider;
use self::provider::YamlSnapshot;

/// Error raised while loading or extracting configuration.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// No prefix was given for environment variables.
    #[snafu(display("An environment variable prefix is required."))]
    EmptyPrefix,

    /// Configuration file did not exist.
    #[snafu(display("Configuration file '{}' does not exist.", path.display()))]
    MissingFile {
        /// Path of the missing file.
        path: PathBuf,
    },

    /// Configuration file could not be read.
    #[snafu(display("Failed to read configuration file '{}': {}", path.display(), source))]
    ReadFile {
        /// Path of the file.
        path: PathBuf,

        /// Error source.
        source: std::io::Error,
    },

    /// A required field had no value in any source.
    #[snafu(display("Missing field '{}' in configuration.", field))]
    MissingField {
        /// Field name.
        field: String,
    },

    /// A field held a value of the wrong type.
    #[snafu(display(
        "Field '{}' should be of type '{}' but was '{}'.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Dotted path to the field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Any other error raised by a source.
    #[snafu(display("Failed to load configuration: {}", source))]
    Generic {
        /// Error source.
        source: anyhow::Error,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        match e.kind {
            Kind::InvalidType(actual_ty, expected_ty) => Self::InvalidFieldType {
                field: e.path.join("."),
                expected_ty,
                actual_ty: actual_ty.to_string(),
            },
            Kind::MissingField(field) => Self::MissingField {
                field: field.into_owned(),
            },
            _ => Self::Generic { source: e.into() },
        }
    }
}

struct BoxedProvider(Box<dyn Provider + Send + Sync>);

impl Provider for BoxedProvider {
    fn metadata(&self) -> figment::Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        self.0.data()
    }
}

/// Layers configuration sources and extracts typed values from them.
///
/// A source added later overrides the sources added before it. Supported sources are YAML files, prefixed environment
/// variables, and serializable values.
#[derive(Default)]
pub struct ConfigurationLoader {
    providers: Vec<BoxedProvider>,
}

impl ConfigurationLoader {
    /// Adds a YAML file as a source.
    ///
    /// # Errors
    ///
    /// If the file does not exist, could not be read, or is not valid YAML, an error will be returned.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::MissingFile {
                path: path.to_path_buf(),
            });
        }

        let snapshot = YamlSnapshot::read(path)?;
        self.providers.push(BoxedProvider(Box::new(snapshot)));
        Ok(self)
    }

    /// Adds a YAML file as a source if it can be read and parsed.
    ///
    /// A missing, unreadable, or invalid file is logged at debug level and skipped.
    pub fn try_from_yaml<P>(mut self, path: P) -> Self
    where
        P: AsRef<Path>,
    {
        match YamlSnapshot::read(path.as_ref()) {
            Ok(snapshot) => {
                self.providers.push(BoxedProvider(Box::new(snapshot)));
            }
            Err(e) => {
                debug!(error = %e, file_path = %path.as_ref().to_string_lossy(), "Unable to read YAML configuration file. Ignoring.");
            }
        }
        self
    }

    /// Adds environment variables sharing a common prefix as a source.
    ///
    /// An underscore is appended to the prefix when missing, so `SLUICE` matches `SLUICE_API_KEY` as `api_key`. Matching
    /// ignores case.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, or the environment could not be read, an error will be returned.
    pub fn from_environment(mut self, prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_string()
        } else {
            format!("{}_", prefix)
        };

        // `Env` is not `Send + Sync`, so snapshot its values up front.
        let values = Env::prefixed(&prefix).data()?;
        if let Some(default_dict) = values.get(&figment::Profile::Default) {
            self.providers
                .push(BoxedProvider(Box::new(Serialized::defaults(default_dict.clone()))));
        }
        Ok(self)
    }

    /// Adds a set of serializable values as a configuration source.
    ///
    /// Useful for layering values computed at runtime, such as command-line overrides, on top of the other sources.
    pub fn with_values<T>(mut self, values: T) -> Self
    where
        T: serde::Serialize + Send + Sync + 'static,
    {
        self.providers.push(BoxedProvider(Box::new(Serialized::defaults(values))));
        self
    }

    /// Merges every source and deserializes the result as `T`.
    ///
    /// # Errors
    ///
    /// If the merged values do not deserialize into `T`, an error will be returned.
    pub fn into_typed<'a, T>(self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        let figment = self
            .providers
            .into_iter()
            .fold(Figment::new(), |figment, provider| figment.admerge(provider));

        figment.extract().map_err(Into::into)
    }
}

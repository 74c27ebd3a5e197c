use crate::error::{IngestError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Config from .env
// ---------------------------------------------------------------------------

const REQUIRED_KEYS: [&str; 7] = [
    "R2_ACCESS_KEY",
    "R2_SECRET_KEY",
    "R2_BUCKET_NAME",
    "R2_ENDPOINT_URL",
    "API_BASE_URL",
    "GRAPHQL_ENDPOINT",
    "MEDIA_URL",
];

#[derive(Clone)]
pub struct StorageConfig {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
}

/// Built once at startup and handed to every collaborator.
#[derive(Clone)]
pub struct IngestConfig {
    pub storage: StorageConfig,
    pub api_base_url: String,
    pub graphql_endpoint: String,
    pub media_url: String,
    pub base_dir: PathBuf,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish()
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("storage", &self.storage)
            .field("api_base_url", &self.api_base_url)
            .field("graphql_endpoint", &self.graphql_endpoint)
            .field("media_url", &self.media_url)
            .field("base_dir", &self.base_dir)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl IngestConfig {
    /// Builds the config from any key lookup. All missing required keys are
    /// reported together.
    pub fn from_lookup<F>(lookup: F, base_dir: PathBuf) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| value(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::Config(format!(
                "missing {} (set them in .env or the environment)",
                missing.join(", ")
            )));
        }

        let required = |key: &str| value(key).unwrap_or_default();

        Ok(Self {
            storage: StorageConfig {
                access_key: required("R2_ACCESS_KEY"),
                secret_key: required("R2_SECRET_KEY"),
                bucket: required("R2_BUCKET_NAME"),
                endpoint: required("R2_ENDPOINT_URL"),
                region: value("R2_REGION").unwrap_or_else(|| "auto".to_string()),
            },
            api_base_url: required("API_BASE_URL").trim_end_matches('/').to_string(),
            graphql_endpoint: required("GRAPHQL_ENDPOINT"),
            media_url: required("MEDIA_URL").trim_end_matches('/').to_string(),
            base_dir,
            username: value("INGEST_USERNAME"),
            // Passwords may legitimately carry surrounding spaces.
            password: lookup("INGEST_PASSWORD").filter(|v| !v.is_empty()),
        })
    }

    pub fn excel_dir(&self) -> PathBuf {
        self.base_dir.join("excel")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.base_dir.join("files")
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.base_dir.join("errors.log")
    }
}

/// Loads `.env` (if any) and builds the config from the process environment.
pub fn load_config() -> Result<IngestConfig> {
    let env_paths = [PathBuf::from(".env"), PathBuf::from("../../.env")];

    let mut env_loaded = false;
    for p in &env_paths {
        if p.exists() {
            dotenvy::from_path(p).ok();
            env_loaded = true;
            break;
        }
    }

    // If no relative .env found, try PROJECT_ROOT from environment
    if !env_loaded {
        if let Ok(project_root) = std::env::var("PROJECT_ROOT") {
            let env_path = PathBuf::from(&project_root).join(".env");
            if env_path.exists() {
                dotenvy::from_path(env_path).ok();
            }
        }
    }

    IngestConfig::from_lookup(|key| std::env::var(key).ok(), detect_base_dir())
}

fn detect_base_dir() -> PathBuf {
    if let Ok(project_root) = std::env::var("PROJECT_ROOT") {
        return PathBuf::from(project_root);
    }

    std::env::current_dir()
        .ok()
        .map(|d| {
            // If we're in scripts/ingest, go up two levels
            if d.ends_with("scripts/ingest") {
                d.parent()
                    .and_then(Path::parent)
                    .map(Path::to_path_buf)
                    .unwrap_or(d)
            } else {
                d
            }
        })
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolves a bare file name against `dir`; absolute or explicitly relative
/// paths are taken as given.
pub fn resolve_in(dir: &Path, name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() || path.components().count() > 1 {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// True when both paths name the same file. The second path may not exist
/// yet, so its parent directory is resolved instead.
pub fn same_file(existing: &Path, target: &Path) -> bool {
    normalize(existing) == normalize(target)
}

fn normalize(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            parent
                .canonicalize()
                .map(|dir| dir.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

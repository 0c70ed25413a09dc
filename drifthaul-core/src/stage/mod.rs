//! Object staging area used by bulk load and unload.
//!
//! A [`Stage`] moves bytes; a [`StageRef`] is how SQL addresses a directory in
//! that stage inside COPY statements.

pub mod compress;
pub mod upload;

use std::fmt;
use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::config::StageLocation;
use crate::error::{CoreError, Result};

pub use self::upload::{UploadPool, UploadSettings};

/// Byte storage behind a stage. Keys are `/`-separated paths relative to the
/// stage root.
pub trait Stage: Send + Sync {
    /// SQL-facing reference to the directory `dir`.
    fn reference(&self, dir: &str) -> StageRef;

    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Keys of every object under `dir`, sorted.
    fn list(&self, dir: &str) -> Result<Vec<String>>;

    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>>;

    /// Delete one object. Deleting a missing object is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Make `dir` writable by the warehouse before it unloads into it.
    fn prepare(&self, _dir: &str) -> Result<()> {
        Ok(())
    }
}

/// Location of a stage directory as rendered into COPY statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRef {
    location: String,
    quoted: bool,
    credentials: Option<String>,
}

impl StageRef {
    /// Named stage such as `@~/run/`, rendered bare.
    pub fn internal(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            quoted: false,
            credentials: None,
        }
    }

    /// Bucket URL with an optional `CREDENTIALS = (...)` clause.
    pub fn external(url: impl Into<String>, credentials: Option<String>) -> Self {
        Self {
            location: url.into(),
            quoted: true,
            credentials,
        }
    }

    /// Directory on the local filesystem.
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            location: path.into(),
            quoted: true,
            credentials: None,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn sql_location(&self) -> String {
        if self.quoted {
            format!("'{}'", self.location.replace('\'', "''"))
        } else {
            self.location.clone()
        }
    }

    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }
}

impl StageLocation {
    /// Reference to `dir` inside this location.
    pub fn reference(&self, dir: &str) -> StageRef {
        let dir = dir.trim_start_matches('/');
        match self {
            StageLocation::Internal { name } => {
                StageRef::internal(format!("{}/{}", name.trim_end_matches('/'), dir))
            }
            StageLocation::External {
                bucket,
                aws_key_id,
                aws_secret_key,
                ..
            } => {
                let credentials = match (aws_key_id, aws_secret_key) {
                    (Some(key), Some(secret)) => Some(format!(
                        "CREDENTIALS = (AWS_KEY_ID = '{}' AWS_SECRET_KEY = '{}')",
                        key.replace('\'', "''"),
                        secret.replace('\'', "''")
                    )),
                    _ => None,
                };
                let bucket = bucket.trim_start_matches("s3://").trim_end_matches('/');
                StageRef::external(format!("s3://{bucket}/{dir}"), credentials)
            }
            StageLocation::Local { root } => {
                StageRef::local(format!("{}/{}", root.display().to_string().trim_end_matches('/'), dir))
            }
        }
    }
}

impl fmt::Display for StageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageLocation::Internal { name } => write!(f, "internal stage {name}"),
            StageLocation::External { bucket, region, .. } => match region {
                Some(region) => write!(f, "bucket {bucket} ({region})"),
                None => write!(f, "bucket {bucket}"),
            },
            StageLocation::Local { root } => write!(f, "local stage {}", root.display()),
        }
    }
}

/// Expand a stage path template for one run.
///
/// `$DATE` becomes `yyyyMMdd`, `$TIME` becomes `HHmmss.SSS`. Duplicate slashes
/// are collapsed and the result always ends with `/`.
pub fn resolve_stage_path(template: &str, operation: &str, now: NaiveDateTime, id: Uuid) -> String {
    let expanded = template
        .replace("$DATE", &now.format("%Y%m%d").to_string())
        .replace("$TIME", &now.format("%H%M%S%.3f").to_string())
        .replace("$OPERATION", operation)
        .replace("$UUID", &id.to_string());

    let mut path = expanded
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    path.push('/');
    path
}

/// Stage backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStage {
    root: PathBuf,
}

impl LocalStage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            CoreError::Resource(format!("failed to create stage root {}: {err}", root.display()))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CoreError::Validation(format!("invalid stage key: {key}")));
        }
        Ok(self.root.join(relative))
    }

    fn collect_files(&self, dir: &Path, keys: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect_files(&path, keys)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                keys.push(key);
            }
        }
        Ok(())
    }

    fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

fn transfer_error(action: &str, key: &str, err: io::Error) -> CoreError {
    CoreError::transfer(format!("failed to {action} stage object: {err}"), key)
}

impl Stage for LocalStage {
    fn reference(&self, dir: &str) -> StageRef {
        StageLocation::Local {
            root: self.root.clone(),
        }
        .reference(dir)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| transfer_error("upload", key, err))?;
        }
        fs::write(&path, data).map_err(|err| transfer_error("upload", key, err))?;
        debug!(key, bytes = data.len(), "staged object");
        Ok(())
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let path = self.resolve(dir)?;
        let mut keys = Vec::new();
        match self.collect_files(&path, &mut keys) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(transfer_error("list", dir, err)),
        }
        keys.sort();
        Ok(keys)
    }

    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.resolve(key)?;
        let file = fs::File::open(&path).map_err(|err| transfer_error("download", key, err))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(transfer_error("remove", key, err)),
        }
        self.prune_empty_parents(&path);
        Ok(())
    }

    fn prepare(&self, dir: &str) -> Result<()> {
        let path = self.resolve(dir)?;
        fs::create_dir_all(&path).map_err(|err| transfer_error("create", dir, err))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_milli_opt(7, 8, 9, 42)
            .unwrap()
    }

    #[test]
    fn test_resolve_stage_path_substitutes_variables() {
        let id = Uuid::nil();
        let path = resolve_stage_path("root//$OPERATION/$DATE/$TIME/$UUID", "load", at(), id);
        assert_eq!(
            path,
            format!("root/load/20240506/070809.042/{id}/")
        );
    }

    #[test]
    fn test_resolve_stage_path_default_template() {
        let path = resolve_stage_path(
            crate::config::DEFAULT_PATH_TEMPLATE,
            "unload",
            at(),
            Uuid::nil(),
        );
        assert!(path.starts_with("unload/20240506/070809.042/"));
        assert!(path.ends_with('/'));
    }

    #[test]
    fn test_location_references() {
        let internal = StageLocation::Internal { name: "@MY_STAGE/".into() };
        assert_eq!(internal.reference("run/").sql_location(), "@MY_STAGE/run/");

        let external = StageLocation::External {
            bucket: "s3://data".into(),
            region: Some("us-east-1".into()),
            aws_key_id: Some("AKIA".into()),
            aws_secret_key: Some("secret".into()),
        };
        let reference = external.reference("/run/");
        assert_eq!(reference.sql_location(), "'s3://data/run/'");
        assert_eq!(
            reference.credentials(),
            Some("CREDENTIALS = (AWS_KEY_ID = 'AKIA' AWS_SECRET_KEY = 'secret')")
        );
        assert!(!external.to_string().contains("secret"));
    }

    #[test]
    fn test_local_stage_put_list_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stage = LocalStage::new(dir.path()).expect("stage");
        stage.put("run/a/data_1.json", b"{}\n").expect("put");
        stage.put("run/a/data_0.json", b"{}\n").expect("put");
        stage.put("other/x.json", b"{}\n").expect("put");

        let keys = stage.list("run/").expect("list");
        assert_eq!(keys, vec!["run/a/data_0.json", "run/a/data_1.json"]);

        let mut body = String::new();
        stage
            .open("run/a/data_0.json")
            .expect("open")
            .read_to_string(&mut body)
            .expect("read");
        assert_eq!(body, "{}\n");

        for key in &keys {
            stage.remove(key).expect("remove");
        }
        stage.remove("run/a/data_0.json").expect("missing is fine");
        assert!(!dir.path().join("run").exists());
        assert!(dir.path().join("other/x.json").exists());
        assert!(stage.list("run/").expect("list").is_empty());
    }

    #[test]
    fn test_local_stage_rejects_escaping_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stage = LocalStage::new(dir.path()).expect("stage");
        let err = stage.put("../escape", b"x").expect_err("must reject");
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }
}

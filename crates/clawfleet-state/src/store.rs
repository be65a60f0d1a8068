//! RecordStore — file-per-instance persistence.
//!
//! The store is the single source of truth for which instances exist.
//! Records are immutable: there is `create` and `delete`, never update.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use clawfleet_core::{InstanceRecord, validate_name};
use tracing::{debug, info, warn};

use crate::envfile;
use crate::error::{StateError, StateResult};

const RECORD_EXT: &str = "env";
const LOCK_FILE: &str = ".create.lock";

/// Directory-backed instance record store.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    /// Open (or create) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> StateResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(StateError::io(&dir))?;
        debug!(dir = %dir.display(), "record store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{RECORD_EXT}"))
    }

    pub fn exists(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.record_path(name).is_file()
    }

    /// Persist a new record and create its directories.
    ///
    /// Fails with `AlreadyExists` if the name is taken, or `NameConflict`
    /// if an existing name differs only in case. The existing record is
    /// never touched.
    pub fn create(&self, record: &InstanceRecord) -> StateResult<()> {
        validate_name(&record.name)?;
        if self.exists(&record.name) {
            return Err(StateError::AlreadyExists(record.name.clone()));
        }
        if let Some(existing) = self.find_case_variant(&record.name)? {
            return Err(StateError::NameConflict {
                name: record.name.clone(),
                existing,
            });
        }

        for dir in [&record.config_dir, &record.workspace_dir] {
            fs::create_dir_all(dir).map_err(StateError::io(dir))?;
        }

        let path = self.record_path(&record.name);
        let contents = envfile::encode(record).map_err(|reason| StateError::Corrupt {
            path: path.clone(),
            reason,
        })?;

        let tmp = self
            .dir
            .join(format!(".{}.{RECORD_EXT}.tmp{}", record.name, std::process::id()));
        write_synced(&tmp, contents.as_bytes())?;

        // hard_link refuses to replace an existing file, which makes the
        // publish step both atomic and no-clobber.
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StateError::AlreadyExists(record.name.clone()));
            }
            Err(source) => return Err(StateError::Io { path, source }),
        }

        info!(
            instance = %record.name,
            gateway_port = record.gateway_port,
            bridge_port = record.bridge_port,
            "instance record created"
        );
        Ok(())
    }

    /// Load one record.
    pub fn load(&self, name: &str) -> StateResult<InstanceRecord> {
        validate_name(name)?;
        let path = self.record_path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound(name.to_string()));
            }
            Err(source) => return Err(StateError::Io { path, source }),
        };
        let record = envfile::decode(&text).map_err(|reason| StateError::Corrupt {
            path: path.clone(),
            reason,
        })?;
        if record.name != name {
            return Err(StateError::Corrupt {
                path,
                reason: format!("INSTANCE={} does not match file name", record.name),
            });
        }
        Ok(record)
    }

    /// All records, sorted by name. A corrupt record fails the whole
    /// listing rather than being skipped.
    pub fn list(&self) -> StateResult<Vec<InstanceRecord>> {
        let mut records = self
            .names()?
            .iter()
            .map(|name| self.load(name))
            .collect::<StateResult<Vec<_>>>()?;
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Names of all stored records, unsorted.
    pub fn names(&self) -> StateResult<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(StateError::io(&self.dir))?;
        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(StateError::io(&self.dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Dotfiles are temp files and the lock.
            if stem.starts_with('.') || !path.is_file() {
                continue;
            }
            names.push(stem.to_string());
        }
        Ok(names)
    }

    /// Records whose names match the glob `pattern` (`*`, `?`, `[a-z]`).
    /// `None` matches everything.
    pub fn filter(&self, pattern: Option<&str>) -> StateResult<Vec<InstanceRecord>> {
        let records = self.list()?;
        let Some(pattern) = pattern else {
            return Ok(records);
        };
        let matcher = glob::Pattern::new(pattern).map_err(|e| StateError::InvalidFilter {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(records
            .into_iter()
            .filter(|r| matcher.matches(&r.name))
            .collect())
    }

    /// Delete a record. Directories and containers are left alone.
    /// Returns whether a record existed; a missing record is not an error.
    pub fn delete(&self, name: &str) -> StateResult<bool> {
        validate_name(name)?;
        let path = self.record_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(instance = %name, "instance record deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(instance = %name, "no record to delete");
                Ok(false)
            }
            Err(source) => Err(StateError::Io { path, source }),
        }
    }

    /// Every port claimed by a stored record.
    pub fn used_ports(&self) -> StateResult<BTreeSet<u16>> {
        Ok(self
            .list()?
            .iter()
            .flat_map(InstanceRecord::ports)
            .collect())
    }

    /// Run `f` while holding the store's exclusive creation lock.
    ///
    /// Scanning used ports and persisting the new record must happen
    /// inside one call so concurrent creators cannot claim the same port.
    pub fn with_creation_lock<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<StateError>,
    {
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| StateError::Lock {
                path: path.clone(),
                source,
            })?;
        let mut lock = fd_lock::RwLock::new(file);
        let _guard = lock.write().map_err(|source| StateError::Lock {
            path: path.clone(),
            source,
        })?;
        debug!(lock = %path.display(), "creation lock acquired");
        f()
    }

    fn find_case_variant(&self, name: &str) -> StateResult<Option<String>> {
        Ok(self
            .names()?
            .into_iter()
            .find(|existing| existing != name && existing.eq_ignore_ascii_case(name)))
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> StateResult<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        // Records carry the gateway token.
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(StateError::io(path))?;
    if let Err(e) = file.write_all(bytes).and_then(|()| file.sync_all()) {
        warn!(path = %path.display(), error = %e, "failed to write record");
        let _ = fs::remove_file(path);
        return Err(StateError::Io {
            path: path.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::error::{Result, VfsError};
use crate::krypto::PASSWORD_MAX;

pub const ENV_PWFILE: &str = "VDB_PWFILE";

fn trim_key(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == b'\n' || *b == b'\r') {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

fn check_key(bytes: &[u8]) -> Result<Vec<u8>> {
    let key = trim_key(bytes);
    if key.is_empty() {
        return Err(VfsError::EncryptionKeyInvalid("empty password".into()));
    }
    if key.len() > PASSWORD_MAX {
        return Err(VfsError::SizeExcessive { max: PASSWORD_MAX });
    }
    Ok(key.to_vec())
}

struct Bindings {
    path: Option<Utf8PathBuf>,
    map: HashMap<u32, String>,
}

/// Produces encryption keys from the temporary per-path slot, the
/// environment, the manager override, or the configured global password
/// file; also owns the oid to object-name bindings.
pub struct KeyStore {
    pwfile: Option<Utf8PathBuf>,
    temp_key: Mutex<Option<Vec<u8>>>,
    bindings: Mutex<Bindings>,
}

impl KeyStore {
    pub fn new(config: &Config) -> Self {
        KeyStore {
            pwfile: config.krypto_pwfile().map(|p| p.to_path_buf()),
            temp_key: Mutex::new(None),
            bindings: Mutex::new(Bindings {
                path: None,
                map: HashMap::new(),
            }),
        }
    }

    /// Install or clear the temporary key used for a single open.
    pub fn set_temporary_key(&self, key: Option<&[u8]>) -> Result<()> {
        let mut slot = self.temp_key.lock().unwrap();
        *slot = match key {
            Some(bytes) => Some(check_key(bytes)?),
            None => None,
        };
        Ok(())
    }

    /// The password-file path the environment and configuration resolve to.
    pub fn config_pw_path(&self, pw_env: Option<&str>) -> Result<Utf8PathBuf> {
        if let Ok(path) = env::var(ENV_PWFILE) {
            if !path.is_empty() {
                return Ok(Utf8PathBuf::from(path));
            }
        }
        if let Some(path) = pw_env {
            if !path.is_empty() {
                return Ok(Utf8PathBuf::from(path));
            }
        }
        match &self.pwfile {
            Some(path) => Ok(path.clone()),
            None => Err(VfsError::EncryptionKeyNotFound),
        }
    }

    /// Current key: the temporary slot wins, then the configured password
    /// file chain. The first newline byte ends the key.
    pub fn current_key(&self, pw_env: Option<&str>) -> Result<Vec<u8>> {
        if let Some(key) = self.temp_key.lock().unwrap().as_ref() {
            return Ok(key.clone());
        }
        let path = self.config_pw_path(pw_env)?;
        let bytes = fs::read(path.as_std_path()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VfsError::EncryptionKeyNotFound
            } else {
                e.into()
            }
        })?;
        check_key(&bytes)
    }

    pub fn set_bindings_file(&self, path: &Utf8Path) -> Result<()> {
        let mut bindings = self.bindings.lock().unwrap();
        bindings.map.clear();
        if path.as_std_path().exists() {
            let content = fs::read_to_string(path.as_std_path())?;
            for line in content.lines() {
                if let Some((oid, name)) = line.split_once('\t') {
                    if let Ok(oid) = oid.parse::<u32>() {
                        bindings.map.insert(oid, name.to_string());
                    }
                }
            }
        }
        bindings.path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn bindings_file(&self) -> Option<Utf8PathBuf> {
        self.bindings.lock().unwrap().path.clone()
    }

    pub fn register_object(&self, oid: u32, name: &str) -> Result<()> {
        if oid == 0 {
            return Err(VfsError::TokenIncorrect("object id must be positive".into()));
        }
        if name.is_empty() {
            return Err(VfsError::EmptyParam);
        }
        let mut bindings = self.bindings.lock().unwrap();
        if let Some(existing) = bindings.map.get(&oid) {
            if existing != name {
                return Err(VfsError::TokenIncorrect(format!(
                    "object id {oid} is already bound to {existing}"
                )));
            }
            return Ok(());
        }
        bindings.map.insert(oid, name.to_string());
        Self::persist(&bindings)
    }

    pub fn object_name(&self, oid: u32) -> Result<String> {
        let bindings = self.bindings.lock().unwrap();
        bindings
            .map
            .get(&oid)
            .cloned()
            .ok_or(VfsError::ObjectNotFound(oid))
    }

    pub fn object_id(&self, name: &str) -> Result<u32> {
        let bindings = self.bindings.lock().unwrap();
        bindings
            .map
            .iter()
            .find(|(_, bound)| bound.as_str() == name)
            .map(|(oid, _)| *oid)
            .ok_or_else(|| VfsError::PathNotFound(name.to_string()))
    }

    fn persist(bindings: &Bindings) -> Result<()> {
        let path = match &bindings.path {
            Some(path) => path,
            None => return Ok(()),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())?;
        }
        let parent = path.parent().unwrap_or(Utf8Path::new("."));
        let mut temp = NamedTempFile::new_in(parent.as_std_path())?;
        let mut entries: Vec<_> = bindings.map.iter().collect();
        entries.sort_by_key(|(oid, _)| **oid);
        for (oid, name) in entries {
            writeln!(temp, "{oid}\t{name}")?;
        }
        temp.persist(path.as_std_path())
            .map_err(|e| VfsError::Io(e.error))?;
        Ok(())
    }
}

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use crate::archive::{transform_file_to_directory, DirView, LocalDirView, MountPointDir, SraReader};
use crate::cachetee::{CacheTeeFile, CACHE_BLOCK, CACHE_CLUSTER};
use crate::config::Config;
use crate::error::{Result, VfsError};
use crate::keystore::KeyStore;
use crate::krypto::{self, EncFile, EncWriter, WgaFile};
use crate::path::{PathOption, PathType, SchemeType, VfsPath};
use crate::remote::{HttpTransport, RemoteTransport};
use crate::resolver::{resolve_against, Protocol, ResolveFlags, Resolver};
use crate::vfile::{read_all_at, BufFile, LocalFile, NullFile, StdinFile, VFile, VFileWrite};

const PROBE_SIZE: usize = 4096;
const SEQ_BUF: usize = 32 * 2 * 1024;
const ENC_READ_BUF: usize = 256 * 1024 * 1024;
const REMOTE_BUF: usize = 128 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// open an existing file or create it
    Open,
    /// create or truncate
    Init,
    /// fail when the file already exists
    Create,
}

/// Composes the resolver, keystore, cipher stages, and current working
/// directory into one handle; the open pipeline lives here.
pub struct Manager {
    cwd: Utf8PathBuf,
    config: Config,
    keystore: KeyStore,
    resolver: RwLock<Option<Arc<dyn Resolver>>>,
    sra_reader: RwLock<Option<Arc<dyn SraReader>>>,
    transport: RwLock<Arc<dyn RemoteTransport>>,
    pw_env: RwLock<Option<String>>,
}

static SHARED: OnceLock<Mutex<Weak<Manager>>> = OnceLock::new();

impl Manager {
    pub fn new(config: Config) -> Result<Arc<Manager>> {
        let cwd = std::env::current_dir()?;
        let cwd = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|p| VfsError::Config(format!("non-UTF-8 working directory {}", p.display())))?;
        let keystore = KeyStore::new(&config);
        let transport: Arc<dyn RemoteTransport> = Arc::new(HttpTransport::new()?);
        Ok(Arc::new(Manager {
            cwd,
            config,
            keystore,
            resolver: RwLock::new(None),
            sra_reader: RwLock::new(None),
            transport: RwLock::new(transport),
            pw_env: RwLock::new(None),
        }))
    }

    /// Get-or-create: while any handle from a previous call is alive, the
    /// same instance is returned.
    pub fn shared() -> Result<Arc<Manager>> {
        let slot = SHARED.get_or_init(|| Mutex::new(Weak::new()));
        let mut guard = slot.lock().unwrap();
        if let Some(existing) = guard.upgrade() {
            return Ok(existing);
        }
        let manager = Manager::new(Config::load(None)?)?;
        *guard = Arc::downgrade(&manager);
        Ok(manager)
    }

    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> Option<Arc<dyn Resolver>> {
        self.resolver.read().unwrap().clone()
    }

    pub fn set_resolver(&self, resolver: Option<Arc<dyn Resolver>>) {
        *self.resolver.write().unwrap() = resolver;
    }

    pub fn set_sra_reader(&self, reader: Option<Arc<dyn SraReader>>) {
        *self.sra_reader.write().unwrap() = reader;
    }

    pub fn set_transport(&self, transport: Arc<dyn RemoteTransport>) {
        *self.transport.write().unwrap() = transport;
    }

    /// Process-wide password-file override, between `VDB_PWFILE` and the
    /// configured `krypto/pwfile`.
    pub fn set_pw_env(&self, path: Option<&str>) {
        *self.pw_env.write().unwrap() = path.map(str::to_string);
    }

    pub fn set_bindings_file(&self, path: &Utf8Path) -> Result<()> {
        self.keystore.set_bindings_file(path)
    }

    pub fn bindings_file(&self) -> Option<Utf8PathBuf> {
        self.keystore.bindings_file()
    }

    // ----- path construction ------------------------------------------------

    pub fn make_path(&self, text: &str) -> Result<Arc<VfsPath>> {
        VfsPath::parse(text)
    }

    /// Force an accession interpretation onto a textual id.
    pub fn make_acc_path(&self, accession: &str) -> Result<Arc<VfsPath>> {
        let mut path: VfsPath = accession.parse()?;
        match path.path_type {
            PathType::Accession => {}
            PathType::NameOrAccession => path.path_type = PathType::Accession,
            _ => return Err(VfsError::TokenIncorrect(accession.to_string())),
        }
        if path.scheme.is_empty() {
            path.scheme_override = Some("ncbi-acc");
            path.scheme_type = SchemeType::NcbiAcc;
            path.from_uri = true;
        }
        Ok(Arc::new(path))
    }

    /// Path for a registered object id.
    pub fn make_oid_path(&self, oid: u32) -> Result<Arc<VfsPath>> {
        let mut path: VfsPath = oid.to_string().parse()?;
        match path.path_type {
            PathType::Invalid | PathType::NameOrAccession | PathType::Name => {}
            _ => return Err(VfsError::TokenIncorrect(oid.to_string())),
        }
        path.scheme_override = Some("ncbi-obj");
        path.scheme_type = SchemeType::NcbiObj;
        path.from_uri = true;
        path.obj_id = oid;
        path.path_type = PathType::Oid;
        Ok(Arc::new(path))
    }

    // ----- resolution -------------------------------------------------------

    pub fn resolve_path(&self, flags: ResolveFlags, path: &Arc<VfsPath>) -> Result<Arc<VfsPath>> {
        self.resolve_path_in_dir(flags, &self.cwd, path)
    }

    /// Resolve against a base directory named by another path; the base must
    /// exist as a directory.
    pub fn resolve_path_relative(
        &self,
        flags: ResolveFlags,
        base: &Arc<VfsPath>,
        path: &Arc<VfsPath>,
    ) -> Result<Arc<VfsPath>> {
        let base_dir = resolve_against(&self.cwd, base.path_str());
        if !base_dir.as_std_path().is_dir() {
            return Err(VfsError::DirectoryNotFound(base_dir));
        }
        self.resolve_path_in_dir(flags, &base_dir, path)
    }

    pub fn resolve_path_in_dir(
        &self,
        flags: ResolveFlags,
        base_dir: &Utf8Path,
        path: &Arc<VfsPath>,
    ) -> Result<Arc<VfsPath>> {
        match path.uri_type() {
            SchemeType::Invalid => Err(VfsError::PathInvalid),
            SchemeType::NotSupported | SchemeType::NcbiLegrefseq => {
                Err(VfsError::PathUnsupported(path.scheme().unwrap_or("").to_string()))
            }
            SchemeType::NcbiAcc => self.resolve_with_oracle(flags, path),
            SchemeType::None => {
                let try_accession = path.path_type() == PathType::Accession
                    || (flags.kdb_acc && !path.path_str().contains('/'));
                if try_accession {
                    match self.resolve_with_oracle(flags, path) {
                        Ok(resolved) => return Ok(resolved),
                        Err(_) => {
                            // fall through and treat the name as a path
                        }
                    }
                }
                self.resolve_file_like(base_dir, path)
            }
            SchemeType::NcbiVfs | SchemeType::File => self.resolve_file_like(base_dir, path),
            SchemeType::Http | SchemeType::Https | SchemeType::Ftp => Ok(path.clone()),
            _ => Err(VfsError::PathInvalid),
        }
    }

    fn resolve_with_oracle(&self, flags: ResolveFlags, path: &Arc<VfsPath>) -> Result<Arc<VfsPath>> {
        if flags.no_acc() {
            return Err(VfsError::SraNotAvailable);
        }
        let resolver = self.resolver().ok_or(VfsError::SraUnsupported)?;

        let mut local_err = None;
        if !flags.no_acc_local {
            match resolver.local(path) {
                Ok(resolved) => return Ok(resolved),
                Err(err) if err.is_not_found() => local_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        if !flags.no_acc_remote {
            return resolver.remote(Protocol::Http, path);
        }
        Err(local_err.unwrap_or_else(|| VfsError::PathNotFound(path.path_str().to_string())))
    }

    fn resolve_file_like(&self, base_dir: &Utf8Path, path: &Arc<VfsPath>) -> Result<Arc<VfsPath>> {
        if path.path_str().starts_with('/') {
            return Ok(path.clone());
        }
        let resolved = resolve_against(base_dir, path.path_str());
        if path.uri_type() == SchemeType::NcbiVfs {
            let text = format!(
                "{}:{}{}{}",
                path.scheme()?,
                resolved,
                path.query(),
                path.fragment()
            );
            VfsPath::parse(&text)
        } else {
            VfsPath::parse(resolved.as_str())
        }
    }

    // ----- key acquisition --------------------------------------------------

    /// Resolve the encryption key for a path: per-path `pwfile` hints, then
    /// the keystore chain. The temporary key slot is cleared regardless of
    /// the outcome.
    pub fn acquire_key(&self, path: &VfsPath) -> Result<Vec<u8>> {
        let outcome = self.acquire_key_inner(path);
        let _ = self.keystore.set_temporary_key(None);
        outcome
    }

    fn acquire_key_inner(&self, path: &VfsPath) -> Result<Vec<u8>> {
        if let Ok(value) = path.option(PathOption::PwPath) {
            let bytes = if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                // numeric pwfile values name an inherited descriptor
                fs::read(format!("/dev/fd/{value}"))
            } else {
                fs::read(resolve_against(&self.cwd, value).as_std_path())
            };
            let bytes = bytes.map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    VfsError::EncryptionKeyNotFound
                } else {
                    VfsError::Io(err)
                }
            })?;
            self.keystore.set_temporary_key(Some(&bytes))?;
        }
        let pw_env = self.pw_env.read().unwrap().clone();
        self.keystore.current_key(pw_env.as_deref())
    }

    pub fn get_krypto_password(&self) -> Result<Vec<u8>> {
        let pw_env = self.pw_env.read().unwrap().clone();
        let pwfile = self.keystore.config_pw_path(pw_env.as_deref())?;
        let vpath = self.make_path(pwfile.as_str())?;
        self.acquire_key(&vpath)
    }

    /// Atomically replace the configured password file: the new password is
    /// staged in `<pwfile>.tmp`, the old content is retained after it, and
    /// the stage is renamed over the old file. Returns the password
    /// directory, whose mode must not allow group/world access.
    pub fn update_krypto_password(&self, password: &[u8]) -> Result<Utf8PathBuf> {
        if password.is_empty() {
            return Err(VfsError::EmptyParam);
        }
        if password.len() > krypto::PASSWORD_MAX {
            return Err(VfsError::SizeExcessive {
                max: krypto::PASSWORD_MAX,
            });
        }
        if password.iter().any(|b| *b == b'\n' || *b == b'\r') {
            return Err(VfsError::EncryptionKeyInvalid(
                "password may not contain newline characters".into(),
            ));
        }

        let pw_env = self.pw_env.read().unwrap().clone();
        let pwfile = self.keystore.config_pw_path(pw_env.as_deref())?;

        let old_exists = match fs::symlink_metadata(pwfile.as_std_path()) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
            Ok(meta) if meta.is_file() => true,
            Ok(_) => return Err(VfsError::PathIncorrect(pwfile.to_string())),
        };

        let temp_file = Utf8PathBuf::from(format!("{pwfile}.tmp"));
        let password_dir = match pwfile.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        };
        fs::create_dir_all(password_dir.as_std_path())?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut stage = options.open(temp_file.as_std_path())?;
        stage.write_all(password)?;
        stage.write_all(b"\n")?;

        let mut do_rename = true;
        if old_exists {
            let old = fs::read(pwfile.as_std_path())?;
            if old.len() > password.len()
                && (old[password.len()] == b'\n' || old[password.len()] == b'\r')
                && &old[..password.len()] == password
            {
                // the new password already heads the file
                do_rename = false;
            } else {
                stage.write_all(&old)?;
            }
        }
        stage.sync_all()?;
        drop(stage);

        if do_rename {
            fs::rename(temp_file.as_std_path(), pwfile.as_std_path())?;
        } else {
            fs::remove_file(temp_file.as_std_path())?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(password_dir.as_std_path())?.permissions().mode();
            if mode & 0o027 != 0 {
                return Err(VfsError::DirectoryExcessive(password_dir));
            }
        }

        Ok(password_dir)
    }

    // ----- object id bindings -----------------------------------------------

    pub fn register_object(&self, oid: u32, path: &VfsPath) -> Result<()> {
        self.keystore.register_object(oid, &path.to_path_string()?)
    }

    pub fn get_object(&self, oid: u32) -> Result<Arc<VfsPath>> {
        let name = self.keystore.object_name(oid)?;
        self.make_path(&name)
    }

    pub fn get_object_id(&self, path: &VfsPath) -> Result<u32> {
        self.keystore.object_id(&path.to_path_string()?)
    }

    // ----- read pipeline ----------------------------------------------------

    pub fn open_file_read(&self, path: &Arc<VfsPath>) -> Result<Arc<dyn VFile>> {
        self.open_file_read_int(path, false).map(|(file, _)| file)
    }

    /// Like `open_file_read`, but runs the decryption probe even without the
    /// `encrypted` query option.
    pub fn open_file_read_decrypt(&self, path: &Arc<VfsPath>) -> Result<Arc<dyn VFile>> {
        self.open_file_read_int(path, true).map(|(file, _)| file)
    }

    fn open_file_read_int(
        &self,
        path: &Arc<VfsPath>,
        force_decrypt: bool,
    ) -> Result<(Arc<dyn VFile>, bool)> {
        match path.uri_type() {
            SchemeType::Invalid => Err(VfsError::PathInvalid),
            SchemeType::NotSupported => {
                Err(VfsError::PathUnsupported(path.scheme().unwrap_or("").to_string()))
            }
            SchemeType::NcbiAcc => {
                let resolved = self.resolve_accession_for_open(path)?;
                match resolved.uri_type() {
                    SchemeType::Http | SchemeType::Https | SchemeType::Ftp => {
                        self.open_remote_stream(&resolved, force_decrypt)
                    }
                    _ => self.open_local_file(&self.cwd, &resolved, force_decrypt),
                }
            }
            SchemeType::None | SchemeType::NcbiVfs | SchemeType::File => {
                self.open_local_file(&self.cwd, path, force_decrypt)
            }
            SchemeType::NcbiLegrefseq => Err(VfsError::PathIncorrect(
                "x-ncbi-legrefseq paths only open as directories".into(),
            )),
            SchemeType::Http | SchemeType::Https | SchemeType::Ftp => {
                self.open_remote_stream(path, force_decrypt)
            }
            _ => Err(VfsError::PathInvalid),
        }
    }

    fn resolve_accession_for_open(&self, path: &Arc<VfsPath>) -> Result<Arc<VfsPath>> {
        match self.resolver() {
            Some(_) => self.resolve_with_oracle(ResolveFlags::NONE, path),
            None => Err(VfsError::SraUnsupported),
        }
    }

    fn open_local_file(
        &self,
        dir: &Utf8Path,
        path: &Arc<VfsPath>,
        force_decrypt: bool,
    ) -> Result<(Arc<dyn VFile>, bool)> {
        let path_str = path.path_str();
        let raw: Arc<dyn VFile> = match open_special_read(path_str)? {
            Some(file) => file,
            None => {
                let resolved = resolve_against(dir, path_str);
                let meta = fs::metadata(resolved.as_std_path()).map_err(|err| {
                    if err.kind() == io::ErrorKind::NotFound {
                        VfsError::FileNotFound(resolved.clone())
                    } else {
                        VfsError::Io(err)
                    }
                })?;
                if !meta.is_file() {
                    return Err(non_file_error(&meta, resolved));
                }
                Arc::new(LocalFile::open(&resolved)?)
            }
        };
        self.decryption_stage(raw, path, force_decrypt)
    }

    /// The decryption probe: a 4 KiB prefix is inspected for an envelope
    /// magic; without a match the raw stream is returned untouched.
    fn decryption_stage(
        &self,
        file: Arc<dyn VFile>,
        path: &VfsPath,
        force_decrypt: bool,
    ) -> Result<(Arc<dyn VFile>, bool)> {
        let has_enc_opt = path.option(PathOption::Encrypted).is_ok();
        if !has_enc_opt && !force_decrypt {
            return Ok((file, false));
        }

        let file: Arc<dyn VFile> = if file.random_access() {
            file
        } else {
            Arc::new(BufFile::new(file, SEQ_BUF))
        };

        let mut prefix = [0u8; PROBE_SIZE];
        let n = read_all_at(file.as_ref(), 0, &mut prefix)?;

        if krypto::is_enc(&prefix[..n]) {
            let key = self.acquire_key(path)?;
            let decrypted = EncFile::new(file, &key)?;
            let buffered = BufFile::new(Arc::new(decrypted), ENC_READ_BUF);
            Ok((Arc::new(buffered), true))
        } else if krypto::is_wga_enc(&prefix[..n]) {
            let key = self.acquire_key(path)?;
            Ok((Arc::new(WgaFile::new(file, &key)?), true))
        } else {
            Ok((file, false))
        }
    }

    fn open_remote_stream(
        &self,
        path: &Arc<VfsPath>,
        force_decrypt: bool,
    ) -> Result<(Arc<dyn VFile>, bool)> {
        let uri = path.to_path_string()?;
        let transport = self.transport.read().unwrap().clone();
        let remote = transport.open(&uri)?;

        let file: Arc<dyn VFile> = match self.resolver() {
            Some(resolver) => {
                let size = remote.size().unwrap_or(0);
                match resolver.cache(path, size) {
                    Ok(cache) => {
                        let cache_path = Utf8PathBuf::from(cache.path_str());
                        match CacheTeeFile::new(
                            remote.clone(),
                            &cache_path,
                            CACHE_BLOCK,
                            CACHE_CLUSTER,
                        ) {
                            Ok(tee) => Arc::new(tee),
                            Err(err) => {
                                warn!("cache tee at {cache_path} unavailable: {err}");
                                Arc::new(BufFile::new(remote, REMOTE_BUF))
                            }
                        }
                    }
                    Err(_) => Arc::new(BufFile::new(remote, REMOTE_BUF)),
                }
            }
            None => Arc::new(BufFile::new(remote, REMOTE_BUF)),
        };

        self.decryption_stage(file, path, force_decrypt)
    }

    // ----- directory pipeline -----------------------------------------------

    pub fn open_dir_read(&self, path: &Arc<VfsPath>) -> Result<Arc<dyn DirView>> {
        self.open_dir_read_int(path, false)
    }

    pub fn open_dir_read_decrypt(&self, path: &Arc<VfsPath>) -> Result<Arc<dyn DirView>> {
        self.open_dir_read_int(path, true)
    }

    fn open_dir_read_int(
        &self,
        path: &Arc<VfsPath>,
        force_decrypt: bool,
    ) -> Result<Arc<dyn DirView>> {
        match path.uri_type() {
            SchemeType::Invalid => Err(VfsError::PathInvalid),
            SchemeType::NotSupported => {
                Err(VfsError::PathUnsupported(path.scheme().unwrap_or("").to_string()))
            }
            SchemeType::NcbiAcc => {
                let resolved = self.resolve_accession_for_open(path)?;
                self.open_dir_read_int(&resolved, force_decrypt)
            }
            SchemeType::None | SchemeType::NcbiVfs | SchemeType::File => {
                self.open_dir_local(&self.cwd, path, force_decrypt, false)
            }
            SchemeType::NcbiLegrefseq => {
                self.open_dir_local(&self.cwd, path, force_decrypt, true)
            }
            SchemeType::Http | SchemeType::Https | SchemeType::Ftp => {
                self.open_dir_remote(path, force_decrypt)
            }
            _ => Err(VfsError::PathInvalid),
        }
    }

    fn open_dir_local(
        &self,
        dir: &Utf8Path,
        path: &Arc<VfsPath>,
        force_decrypt: bool,
        require_fragment: bool,
    ) -> Result<Arc<dyn DirView>> {
        let resolved = resolve_against(dir, path.path_str());
        let meta = fs::metadata(resolved.as_std_path()).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                VfsError::DirectoryNotFound(resolved.clone())
            } else {
                VfsError::Io(err)
            }
        })?;

        if require_fragment && path.fragment().len() < 2 {
            return Err(VfsError::PathIncorrect(
                "a fragment naming the inner directory is required".into(),
            ));
        }

        if meta.is_dir() {
            let view: Arc<dyn DirView> = Arc::new(LocalDirView::new(resolved)?);
            if require_fragment {
                return view.open_dir(path.fragment_value());
            }
            // plain directories ignore any fragment
            return Ok(view);
        }
        if !meta.is_file() {
            return Err(VfsError::DirectoryIncorrect(resolved));
        }

        let (file, was_encrypted) = self.open_local_file(dir, path, force_decrypt)?;
        let view = transform_file_to_directory(
            file,
            resolved.as_str(),
            was_encrypted,
            self.sra_reader.read().unwrap().as_ref(),
        )?;
        self.apply_fragment(view, path, require_fragment)
    }

    fn open_dir_remote(
        &self,
        path: &Arc<VfsPath>,
        force_decrypt: bool,
    ) -> Result<Arc<dyn DirView>> {
        let (file, was_encrypted) = self.open_remote_stream(path, force_decrypt)?;

        let name = path
            .path_str()
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("remote");
        let mount = MountPointDir::new(name, file);
        let entry = mount.open_file(mount.entry_name())?;

        let view = transform_file_to_directory(
            entry,
            path.path_str(),
            was_encrypted,
            self.sra_reader.read().unwrap().as_ref(),
        )?;
        self.apply_fragment(view, path, false)
    }

    fn apply_fragment(
        &self,
        view: Arc<dyn DirView>,
        path: &VfsPath,
        required: bool,
    ) -> Result<Arc<dyn DirView>> {
        if path.fragment().len() > 1 {
            return view.open_dir(path.fragment_value());
        }
        if required {
            return Err(VfsError::PathIncorrect(
                "a fragment naming the inner directory is required".into(),
            ));
        }
        Ok(view)
    }

    // ----- write pipeline ---------------------------------------------------

    pub fn open_file_write(&self, path: &Arc<VfsPath>, update: bool) -> Result<VFileWrite> {
        let path_str = path.path_str();
        let sink: VFileWrite = match open_special_write(path_str, update)? {
            Some(sink) => sink,
            None => {
                let resolved = resolve_against(&self.cwd, path_str);
                let meta = fs::metadata(resolved.as_std_path()).map_err(|err| {
                    if err.kind() == io::ErrorKind::NotFound {
                        VfsError::FileNotFound(resolved.clone())
                    } else {
                        VfsError::Io(err)
                    }
                })?;
                if !meta.is_file() {
                    return Err(non_file_error(&meta, resolved));
                }
                let mut options = OpenOptions::new();
                options.write(true).truncate(false);
                if update {
                    options.read(true);
                }
                Box::new(options.open(resolved.as_std_path())?)
            }
        };
        self.encryption_stage(sink, path)
    }

    pub fn create_file(
        &self,
        path: &Arc<VfsPath>,
        update: bool,
        access: u32,
        mode: CreateMode,
        parents: bool,
    ) -> Result<VFileWrite> {
        let path_str = path.path_str();
        if let Some(sink) = open_special_write(path_str, update)? {
            return self.encryption_stage(sink, path);
        }

        let resolved = resolve_against(&self.cwd, path_str);
        let existed = match fs::metadata(resolved.as_std_path()) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
            Ok(meta) if meta.is_file() => true,
            Ok(meta) => return Err(non_file_error(&meta, resolved)),
        };

        if parents {
            if let Some(parent) = resolved.parent() {
                fs::create_dir_all(parent.as_std_path())?;
            }
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if update {
            options.read(true);
        }
        match mode {
            CreateMode::Open => options.create(true),
            CreateMode::Init => options.create(true).truncate(true),
            CreateMode::Create => options.create_new(true),
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(access);
        }
        #[cfg(not(unix))]
        let _ = access;

        let file = options.open(resolved.as_std_path())?;
        match self.encryption_stage(Box::new(file), path) {
            Ok(sink) => Ok(sink),
            Err(err) => {
                if !existed {
                    // do not leave a half-created file behind
                    let _ = fs::remove_file(resolved.as_std_path());
                }
                Err(err)
            }
        }
    }

    fn encryption_stage(&self, sink: VFileWrite, path: &VfsPath) -> Result<VFileWrite> {
        if path.option(PathOption::Encrypted).is_ok() {
            let key = self.acquire_key(path)?;
            Ok(Box::new(EncWriter::new(sink, &key)?))
        } else {
            Ok(sink)
        }
    }

    /// Remove the object a path names; with `force`, directories are removed
    /// recursively. A missing target is not an error.
    pub fn remove(&self, force: bool, path: &Arc<VfsPath>) -> Result<()> {
        let resolved = resolve_against(&self.cwd, path.path_str());
        match fs::symlink_metadata(resolved.as_std_path()) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
            Ok(meta) if meta.is_dir() => {
                if force {
                    fs::remove_dir_all(resolved.as_std_path())?;
                } else {
                    fs::remove_dir(resolved.as_std_path())?;
                }
                Ok(())
            }
            Ok(_) => {
                fs::remove_file(resolved.as_std_path())?;
                Ok(())
            }
        }
    }
}

/// Directories and device nodes are the wrong kind of thing; anything else
/// that is not a regular file (a socket, say) has no place in the taxonomy.
fn non_file_error(meta: &fs::Metadata, path: Utf8PathBuf) -> VfsError {
    let file_type = meta.file_type();
    if file_type.is_dir() {
        return VfsError::FileIncorrect(path);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_char_device() || file_type.is_block_device() || file_type.is_fifo() {
            return VfsError::FileIncorrect(path);
        }
    }
    VfsError::FileUnknown(path)
}

fn open_special_read(path_str: &str) -> Result<Option<Arc<dyn VFile>>> {
    if !path_str.starts_with("/dev/") {
        return Ok(None);
    }
    if path_str == "/dev/stdin" {
        return Ok(Some(Arc::new(StdinFile::new())));
    }
    if path_str == "/dev/null" {
        return Ok(Some(Arc::new(NullFile)));
    }
    if let Some(fd) = path_str.strip_prefix("/dev/fd/") {
        if !fd.is_empty() && fd.bytes().all(|b| b.is_ascii_digit()) {
            let file = File::open(path_str)?;
            return Ok(Some(Arc::new(LocalFile::from_file(file)?)));
        }
    }
    Ok(None)
}

fn open_special_write(path_str: &str, update: bool) -> Result<Option<VFileWrite>> {
    if !path_str.starts_with("/dev/") {
        return Ok(None);
    }
    if path_str == "/dev/stdout" {
        return Ok(Some(Box::new(io::stdout())));
    }
    if path_str == "/dev/stderr" {
        return Ok(Some(Box::new(io::stderr())));
    }
    if path_str == "/dev/null" {
        return Ok(Some(Box::new(io::sink())));
    }
    if let Some(fd) = path_str.strip_prefix("/dev/fd/") {
        if !fd.is_empty() && fd.bytes().all(|b| b.is_ascii_digit()) {
            let mut options = OpenOptions::new();
            options.write(true);
            if update {
                options.read(true);
            }
            return Ok(Some(Box::new(options.open(path_str)?)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_returns_the_same_instance() {
        let a = Manager::shared().unwrap();
        let b = Manager::shared().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn dev_null_reads_empty() {
        let manager = Manager::new(Config::default()).unwrap();
        let path = manager.make_path("/dev/null").unwrap();
        let file = manager.open_file_read(&path).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 0);
    }

    #[test]
    fn unsupported_scheme_is_refused() {
        let manager = Manager::new(Config::default()).unwrap();
        let path = manager.make_path("gopher://example.org/x").unwrap();
        assert!(matches!(
            manager.open_file_read(&path),
            Err(VfsError::PathUnsupported(_))
        ));
    }

    #[test]
    fn legrefseq_does_not_open_as_a_file() {
        let manager = Manager::new(Config::default()).unwrap();
        let path = manager.make_path("x-ncbi-legrefseq:/tmp/x#ref").unwrap();
        assert!(matches!(
            manager.open_file_read(&path),
            Err(VfsError::PathIncorrect(_))
        ));
    }

    #[test]
    fn accession_without_resolver_is_unsupported() {
        let manager = Manager::new(Config::default()).unwrap();
        let path = manager.make_path("ncbi-acc:SRR001656").unwrap();
        assert!(matches!(
            manager.open_file_read(&path),
            Err(VfsError::SraUnsupported)
        ));
    }

    #[test]
    fn acc_and_oid_constructors() {
        let manager = Manager::new(Config::default()).unwrap();

        let acc = manager.make_acc_path("SRR001656").unwrap();
        assert_eq!(acc.uri_type(), SchemeType::NcbiAcc);
        assert_eq!(acc.to_uri().unwrap(), "ncbi-acc:SRR001656");

        let oid = manager.make_oid_path(42).unwrap();
        assert_eq!(oid.uri_type(), SchemeType::NcbiObj);
        assert_eq!(oid.path_type(), PathType::Oid);
        assert_eq!(oid.to_uri().unwrap(), "ncbi-obj:42");

        assert!(manager.make_acc_path("/not/an/accession").is_err());
    }
}

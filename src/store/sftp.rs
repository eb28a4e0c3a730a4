// dumpkeeper/src/store/sftp.rs
use async_trait::async_trait;
use chrono::DateTime;
use ssh2::{ErrorCode, Session, Sftp};
use std::fs;
use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::{Listing, Store, StoredFile, partial_path};
use crate::config::SftpConfig;
use crate::errors::StoreError;
use crate::utils::paths;

// SFTP status codes from draft-ietf-secsh-filexfer.
const FX_NO_SUCH_FILE: i32 = 2;
const FX_FAILURE: i32 = 4;
const FX_FILE_ALREADY_EXISTS: i32 = 11;

/// One directory visited by the tree walk.
#[derive(Debug)]
struct DirGroup {
    dir: String,
    subdirs: Vec<String>,
    files: Vec<StoredFile>,
}

/// Remote directory reached over SFTP.
///
/// The session opened by `connect` is reused for every operation of the
/// batch. Calls are blocking; the engines issue them strictly in sequence.
pub struct SftpStore {
    channel: Mutex<Channel>,
    root: PathBuf,
    host: String,
}

struct Channel {
    // Keeps the transport alive for as long as the SFTP channel is in use.
    _session: Session,
    sftp: Sftp,
}

fn classify(path: &str, err: ssh2::Error) -> StoreError {
    match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) => StoreError::NotFound(path.to_string()),
        ErrorCode::SFTP(FX_FILE_ALREADY_EXISTS) => StoreError::AlreadyExists(path.to_string()),
        ErrorCode::SFTP(_) => StoreError::Io {
            path: path.to_string(),
            source: io::Error::from(err),
        },
        ErrorCode::Session(_) => StoreError::Transport(format!("{}: {}", path, err)),
    }
}

impl SftpStore {
    pub fn connect(config: &SftpConfig) -> Result<Self, StoreError> {
        let transport_err = |e: &dyn std::fmt::Display| {
            StoreError::Transport(format!("{}:{}: {}", config.host, config.port, e))
        };

        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| transport_err(&e))?;
        let mut session = Session::new().map_err(|e| transport_err(&e))?;
        session.set_timeout(config.timeout_secs.saturating_mul(1000));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| transport_err(&e))?;

        match (&config.private_key, &config.password) {
            (Some(key), passphrase) => session
                .userauth_pubkey_file(&config.user, None, key, passphrase.as_deref())
                .map_err(|e| transport_err(&e))?,
            (None, Some(password)) => session
                .userauth_password(&config.user, password)
                .map_err(|e| transport_err(&e))?,
            (None, None) => session
                .userauth_agent(&config.user)
                .map_err(|e| transport_err(&e))?,
        }
        if !session.authenticated() {
            return Err(StoreError::Transport(format!(
                "authentication rejected for {}@{}",
                config.user, config.host
            )));
        }

        let sftp = session.sftp().map_err(|e| transport_err(&e))?;
        info!("SFTP session opened to {}@{}:{}", config.user, config.host, config.port);
        Ok(SftpStore {
            channel: Mutex::new(Channel {
                _session: session,
                sftp,
            }),
            root: PathBuf::from(&config.remote_dir),
            host: config.host.clone(),
        })
    }

    fn channel(&self) -> Result<MutexGuard<'_, Channel>, StoreError> {
        self.channel
            .lock()
            .map_err(|_| StoreError::Transport(format!("SFTP session to {} is poisoned", self.host)))
    }

    fn absolute(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|p| !p.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    /// Visits the tree with an explicit stack; each directory is read once.
    fn walk(&self) -> Result<Vec<DirGroup>, StoreError> {
        let channel = self.channel()?;
        let mut groups = Vec::new();
        let mut pending = vec![String::new()];
        while let Some(dir) = pending.pop() {
            let entries = channel
                .sftp
                .readdir(&self.absolute(&dir))
                .map_err(|e| StoreError::Listing(format!("{}/{}: {}", self.host, dir, e)))?;

            let mut group = DirGroup {
                dir: dir.clone(),
                subdirs: Vec::new(),
                files: Vec::new(),
            };
            for (entry_path, stat) in entries {
                let Some(name) = entry_path.file_name().map(|n| n.to_string_lossy().into_owned())
                else {
                    continue;
                };
                if name == "." || name == ".." {
                    continue;
                }
                let rel = paths::join(&dir, &name);
                if stat.is_dir() {
                    group.subdirs.push(rel.clone());
                    pending.push(rel);
                } else {
                    group.files.push(StoredFile {
                        path: rel,
                        size_bytes: stat.size.unwrap_or(0),
                        modified: stat
                            .mtime
                            .and_then(|t| DateTime::from_timestamp(t as i64, 0))
                            .map(|t| t.naive_utc()),
                    });
                }
            }
            groups.push(group);
        }
        Ok(groups)
    }
}

#[async_trait]
impl Store for SftpStore {
    fn label(&self) -> String {
        format!("sftp://{}{}", self.host, self.root.display())
    }

    async fn list(&self) -> Result<Listing, StoreError> {
        let groups = self.walk()?;
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for group in groups {
            debug!(
                "Visited {} ({} subdirs, {} files)",
                if group.dir.is_empty() { "." } else { group.dir.as_str() },
                group.subdirs.len(),
                group.files.len()
            );
            dirs.extend(group.subdirs);
            files.extend(group.files);
        }
        Ok(Listing::new(files, dirs))
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        match self.channel()?.sftp.stat(&self.absolute(path)) {
            Ok(_) => Ok(true),
            Err(e) => match classify(path, e) {
                StoreError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.channel()?
            .sftp
            .unlink(&self.absolute(path))
            .map_err(|e| classify(path, e))
    }

    async fn remove_empty_dir(&self, path: &str) -> Result<(), StoreError> {
        self.channel()?
            .sftp
            .rmdir(&self.absolute(path))
            .map_err(|e| classify(path, e))
    }

    async fn make_dir(&self, path: &str) -> Result<(), StoreError> {
        let target = self.absolute(path);
        let channel = self.channel()?;
        match channel.sftp.mkdir(&target, 0o755) {
            Ok(()) => Ok(()),
            // Many servers answer a generic failure when the directory is already there.
            Err(e) if e.code() == ErrorCode::SFTP(FX_FAILURE) => match channel.sftp.stat(&target) {
                Ok(stat) if stat.is_dir() => Err(StoreError::AlreadyExists(path.to_string())),
                _ => Err(classify(path, e)),
            },
            Err(e) => Err(classify(path, e)),
        }
    }

    async fn upload(&self, source: &Path, path: &str) -> Result<u64, StoreError> {
        let mut local = fs::File::open(source).map_err(|e| StoreError::from_io(path, e))?;
        let channel = self.channel()?;
        let mut remote = channel
            .sftp
            .create(&self.absolute(path))
            .map_err(|e| classify(path, e))?;
        io::copy(&mut local, &mut remote)
            .map_err(|e| StoreError::Transport(format!("{}: {}", path, e)))
    }

    async fn download(&self, path: &str, destination: &Path) -> Result<u64, StoreError> {
        let channel = self.channel()?;
        let mut remote = channel
            .sftp
            .open(&self.absolute(path))
            .map_err(|e| classify(path, e))?;
        let partial = partial_path(destination);
        let mut local = fs::File::create(&partial).map_err(|e| StoreError::from_io(path, e))?;
        let copied = io::copy(&mut remote, &mut local);
        drop(local);
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(StoreError::Transport(format!("{}: {}", path, e)));
            }
        };
        fs::rename(&partial, destination).map_err(|e| StoreError::from_io(path, e))?;
        Ok(bytes)
    }
}

//! On-disk process id records.
//!
//! A pid file holds a single decimal pid followed by a newline. It is only a
//! weak reference to the process: the file may outlive the process and the
//! process may outlive the file, so callers confirm liveness separately.
use nix::unistd::Pid;
use regex::Regex;
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::config::Configuration;
use crate::constants::{DEFAULT_PID_DIR, PID_EXTENSION, WILDCARD_TARGET};
use crate::error::PidFileError;

/// Which pid files a stop request addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopTarget {
    /// Every pid file belonging to the service.
    All,
    /// A single tagged instance, e.g. the one started with `--port 8080`.
    Instance(String),
    /// An explicit pid file path, which may itself contain wildcards.
    Path(PathBuf),
}

impl StopTarget {
    /// Interprets the raw `kill` value of a configuration.
    ///
    /// Blank values and `*` address every instance. Values containing a path
    /// separator or ending in `.pid` are treated as paths; anything else is an
    /// instance tag.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == WILDCARD_TARGET {
            return StopTarget::All;
        }

        let suffix = format!(".{PID_EXTENSION}");
        if trimmed.contains('/') || trimmed.ends_with(&suffix) {
            StopTarget::Path(PathBuf::from(trimmed))
        } else {
            StopTarget::Instance(trimmed.to_string())
        }
    }

    /// Describes the pid files this target addresses.
    ///
    /// For [`StopTarget::All`] the result reads `<dir>/<stem>[.*].pid` and is
    /// meant for messages only; use [`StopTarget::resolve`] to find the files.
    pub fn pattern(&self, config: &Configuration) -> PathBuf {
        let dir = pid_dir(config);
        let stem = config.pid_stem();

        match self {
            StopTarget::All => dir.join(format!("{stem}[.*].{PID_EXTENSION}")),
            StopTarget::Instance(tag) => dir.join(format!("{stem}.{tag}.{PID_EXTENSION}")),
            StopTarget::Path(path) => path.clone(),
        }
    }

    /// Finds the existing pid files this target addresses, sorted by path.
    ///
    /// [`StopTarget::All`] matches `<stem>.pid` and `<stem>.<tag>.pid` only,
    /// so services whose names merely start with `<stem>` are left alone.
    pub fn resolve(&self, config: &Configuration) -> Result<Vec<PidFile>, PidFileError> {
        match self {
            StopTarget::All => {
                let matcher = Regex::new(&format!(
                    r"^{}(\..+)?\.{}$",
                    regex::escape(&config.pid_stem()),
                    regex::escape(PID_EXTENSION)
                ))?;
                PidFile::scan(&pid_dir(config), &matcher)
            }
            _ => PidFile::resolve(&self.pattern(config)),
        }
    }
}

/// Directory holding the configured pid file.
fn pid_dir(config: &Configuration) -> PathBuf {
    let pid_path = config.pid_path();
    pid_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new(DEFAULT_PID_DIR))
        .to_path_buf()
}

/// Handle on a single pid file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Wraps the pid file stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the file currently exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Records `pid`, creating parent directories as needed.
    pub fn write(&self, pid: Pid) -> Result<(), PidFileError> {
        let write_err = |source| PidFileError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(&self.path, format!("{pid}\n")).map_err(write_err)?;
        debug!("Recorded PID {pid} in {:?}", self.path);
        Ok(())
    }

    /// Reads the recorded pid.
    ///
    /// Returns `None` when the file is missing, unreadable, or does not hold a
    /// positive integer. Zero and negative values are rejected because
    /// signalling them would address whole process groups.
    pub fn read(&self) -> Option<Pid> {
        let contents = fs::read_to_string(&self.path).ok()?;
        match contents.trim().parse::<i32>() {
            Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
            _ => {
                debug!("Ignoring malformed PID file {:?}", self.path);
                None
            }
        }
    }

    /// Deletes the file. A file that is already gone is not an error.
    pub fn remove(&self) -> Result<(), PidFileError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PidFileError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Expands `pattern` into the existing pid files it matches.
    ///
    /// `*` and `?` are honoured in the final path component only. A pattern
    /// without wildcards matches itself when the file exists. Results are
    /// sorted by path.
    pub fn resolve(pattern: &Path) -> Result<Vec<PidFile>, PidFileError> {
        let Some(file_pattern) = pattern.file_name().map(|name| name.to_string_lossy())
        else {
            return Ok(Vec::new());
        };

        if !file_pattern.contains(['*', '?']) {
            let single = PidFile::new(pattern);
            return Ok(if single.exists() { vec![single] } else { Vec::new() });
        }

        let dir = match pattern.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let matcher = wildcard_regex(&file_pattern)?;
        PidFile::scan(&dir, &matcher)
    }

    /// Lists the regular files in `dir` whose names match `matcher`.
    fn scan(dir: &Path, matcher: &Regex) -> Result<Vec<PidFile>, PidFileError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PidFileError::Scan {
                    dir: dir.to_path_buf(),
                    source,
                });
            }
        };

        let mut matches: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|ty| ty.is_file()).unwrap_or(false))
            .filter(|entry| matcher.is_match(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect();
        matches.sort();

        Ok(matches.into_iter().map(PidFile::new).collect())
    }
}

/// Translates a shell-style file name pattern into an anchored regex.
fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    expr.push('$');
    Regex::new(&expr)
}

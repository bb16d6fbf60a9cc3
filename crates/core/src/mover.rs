//! File relocation with collision policy, renames and lock detection.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MoveError {
    /// The file is held open or locked by another process. Worth retrying.
    #[error("file busy: {0}")]
    Contention(#[source] io::Error),
    #[error("source missing: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("target already exists: {}", .0.display())]
    Occupied(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl MoveError {
    pub fn is_contention(&self) -> bool {
        matches!(self, MoveError::Contention(_))
    }
}

#[cfg(windows)]
const CONTENTION_CODES: &[i32] = &[32, 33]; // sharing violation, lock violation
#[cfg(not(windows))]
const CONTENTION_CODES: &[i32] = &[16, 26]; // EBUSY, ETXTBSY

#[cfg(windows)]
const CROSS_DEVICE: i32 = 17;
#[cfg(not(windows))]
const CROSS_DEVICE: i32 = 18;

pub fn is_contention(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::PermissionDenied
        || e.raw_os_error().map_or(false, |c| CONTENTION_CODES.contains(&c))
}

fn classify(e: io::Error) -> MoveError {
    if is_contention(&e) {
        MoveError::Contention(e)
    } else {
        MoveError::Io(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    Replace,
    #[default]
    KeepBoth,
    Skip,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" | "overwrite" => Ok(Self::Replace),
            "keep-both" | "keep_both" | "rename" => Ok(Self::KeepBoth),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown conflict policy: {}", other)),
        }
    }
}

/// Make a model-suggested name safe for the file system.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| c == ' ' || c == '.');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Final name for a suggested rename. The original extension is always kept.
pub fn renamed(original: &str, suggested: &str) -> Option<String> {
    let clean = sanitize_filename(suggested)?;
    let ext = Path::new(original).extension().and_then(|e| e.to_str());
    match ext {
        Some(ext) => {
            let suffix = format!(".{}", ext.to_lowercase());
            if clean.to_lowercase().ends_with(&suffix) {
                Some(clean)
            } else {
                let as_path = Path::new(&clean);
                let stem = match as_path.extension().and_then(|e| e.to_str()) {
                    // A different extension was suggested; drop it.
                    Some(e) if e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()) => {
                        as_path
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or(&clean)
                            .to_string()
                    }
                    _ => clean.clone(),
                };
                Some(format!("{}.{}", stem, ext))
            }
        }
        None => Some(clean),
    }
}

/// First free `stem_N.ext` next to `dest`.
pub fn resolve_conflict(dest: &Path) -> PathBuf {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let stem = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = dest
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    let mut counter = 1;
    loop {
        let name = if ext.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, ext)
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub source: PathBuf,
    pub destination_dir: PathBuf,
    pub rename: Option<String>,
    pub policy: ConflictPolicy,
}

impl MoveRequest {
    pub fn new(source: impl Into<PathBuf>, destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination_dir: destination_dir.into(),
            rename: None,
            policy: ConflictPolicy::KeepBoth,
        }
    }

    pub fn with_rename(mut self, rename: Option<String>) -> Self {
        self.rename = rename;
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn original_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Where the file lands if nothing is in the way.
    pub fn target(&self) -> PathBuf {
        let original = self.original_name();
        let name = self
            .rename
            .as_deref()
            .and_then(|r| renamed(&original, r))
            .unwrap_or(original);
        self.destination_dir.join(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Moved {
    pub to: PathBuf,
    pub original_name: String,
    pub final_name: String,
}

impl Moved {
    /// The prior filename, when the move renamed the file.
    pub fn prior_name(&self) -> Option<String> {
        (self.original_name != self.final_name).then(|| self.original_name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved(Moved),
    /// Collision with the skip policy.
    Skipped,
}

pub fn move_file(req: &MoveRequest) -> Result<MoveOutcome, MoveError> {
    if !req.source.exists() {
        return Err(MoveError::SourceMissing(req.source.clone()));
    }
    let mut target = req.target();
    if target.exists() {
        match req.policy {
            ConflictPolicy::Skip => {
                debug!(target = %target.display(), "collision, skipping");
                return Ok(MoveOutcome::Skipped);
            }
            ConflictPolicy::Replace => {}
            ConflictPolicy::KeepBoth => target = resolve_conflict(&target),
        }
    }
    fs::create_dir_all(&req.destination_dir).map_err(classify)?;
    relocate(&req.source, &target)?;
    info!(from = %req.source.display(), to = %target.display(), "moved");

    let final_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(MoveOutcome::Moved(Moved {
        to: target,
        original_name: req.original_name(),
        final_name,
    }))
}

/// Put a moved file back. Refuses to overwrite whatever now occupies `to`.
pub fn restore(from: &Path, to: &Path) -> Result<(), MoveError> {
    if !from.exists() {
        return Err(MoveError::SourceMissing(from.to_path_buf()));
    }
    if to.exists() {
        return Err(MoveError::Occupied(to.to_path_buf()));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(classify)?;
    }
    relocate(from, to)?;
    info!(from = %from.display(), to = %to.display(), "restored");
    Ok(())
}

fn relocate(from: &Path, to: &Path) -> Result<(), MoveError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE) => {
            debug!("cross-device move, copying");
            fs::copy(from, to).map_err(classify)?;
            fs::remove_file(from).map_err(classify)
        }
        Err(e) => Err(classify(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        let dest = dir.path().join("courses").join("ML");
        fs::create_dir_all(&inbox).unwrap();
        (dir, inbox, dest)
    }

    #[test]
    fn moves_into_new_directory() {
        let (_d, inbox, dest) = setup();
        let src = inbox.join("Lecture5_ML.pdf");
        fs::write(&src, b"pdf").unwrap();

        let out = move_file(&MoveRequest::new(&src, &dest)).unwrap();
        let MoveOutcome::Moved(m) = out else { panic!("not moved") };
        assert_eq!(m.to, dest.join("Lecture5_ML.pdf"));
        assert!(m.prior_name().is_none());
        assert!(!src.exists());
        assert_eq!(fs::read(&m.to).unwrap(), b"pdf");
    }

    #[test]
    fn collision_policies() {
        let (_d, inbox, dest) = setup();
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("a.pdf"), b"old").unwrap();
        fs::write(dest.join("a_1.pdf"), b"older").unwrap();

        let src = inbox.join("a.pdf");
        fs::write(&src, b"new").unwrap();
        let skip = MoveRequest::new(&src, &dest).with_policy(ConflictPolicy::Skip);
        assert_eq!(move_file(&skip).unwrap(), MoveOutcome::Skipped);
        assert!(src.exists());

        let MoveOutcome::Moved(m) = move_file(&MoveRequest::new(&src, &dest)).unwrap() else {
            panic!("not moved")
        };
        assert_eq!(m.final_name, "a_2.pdf");
        assert_eq!(fs::read(dest.join("a.pdf")).unwrap(), b"old");

        fs::write(&src, b"newest").unwrap();
        let replace = MoveRequest::new(&src, &dest).with_policy(ConflictPolicy::Replace);
        move_file(&replace).unwrap();
        assert_eq!(fs::read(dest.join("a.pdf")).unwrap(), b"newest");
    }

    #[test]
    fn rename_is_sanitized_and_keeps_extension() {
        let (_d, inbox, dest) = setup();
        let src = inbox.join("scan0001.pdf");
        fs::write(&src, b"x").unwrap();
        let req = MoveRequest::new(&src, &dest).with_rename(Some("ML: Week 5/Notes.".into()));
        let MoveOutcome::Moved(m) = move_file(&req).unwrap() else { panic!("not moved") };
        assert_eq!(m.final_name, "ML_ Week 5_Notes.pdf");
        assert_eq!(m.prior_name().as_deref(), Some("scan0001.pdf"));
    }

    #[test]
    fn rename_rules() {
        assert_eq!(renamed("a.pdf", "Week 5 Notes").as_deref(), Some("Week 5 Notes.pdf"));
        assert_eq!(renamed("a.pdf", "Week 5 Notes.PDF").as_deref(), Some("Week 5 Notes.PDF"));
        assert_eq!(renamed("a.pdf", "notes.txt").as_deref(), Some("notes.pdf"));
        assert_eq!(renamed("a.pdf", "Lecture 5.2 Notes").as_deref(), Some("Lecture 5.2 Notes.pdf"));
        assert_eq!(renamed("README", "Read me").as_deref(), Some("Read me"));
        assert_eq!(renamed("a.pdf", " ... "), None);
    }

    #[test]
    fn missing_source_is_not_contention() {
        let (_d, inbox, dest) = setup();
        let err = move_file(&MoveRequest::new(inbox.join("gone.pdf"), &dest)).unwrap_err();
        assert!(matches!(err, MoveError::SourceMissing(_)));
        assert!(!err.is_contention());
    }

    #[test]
    fn contention_detection() {
        assert!(is_contention(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_contention(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(is_contention(&io::Error::from_raw_os_error(CONTENTION_CODES[0])));
        assert!(classify(io::Error::from(io::ErrorKind::PermissionDenied)).is_contention());
    }

    #[test]
    fn restore_refuses_to_overwrite() {
        let (_d, inbox, dest) = setup();
        fs::create_dir_all(&dest).unwrap();
        let moved = dest.join("a.pdf");
        fs::write(&moved, b"x").unwrap();
        let back = inbox.join("a.pdf");
        fs::write(&back, b"y").unwrap();
        assert!(matches!(restore(&moved, &back), Err(MoveError::Occupied(_))));

        fs::remove_file(&back).unwrap();
        restore(&moved, &back).unwrap();
        assert!(back.exists() && !moved.exists());
    }
}

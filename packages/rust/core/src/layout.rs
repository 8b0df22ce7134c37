//! Where document files live on disk and how they are found again.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use lawledger_shared::{Category, DocumentRecord, LawLedgerError, Result, candidate_stems};

use crate::classify::classify;

/// Directories to try when writing a record's source file, in order:
/// the classified directory, a sibling named by the category table, the root.
pub fn write_chain(root: &Path, category: Category, record: &DocumentRecord) -> Vec<PathBuf> {
    let classified = classify(root, category, record);
    let sibling = classified
        .parent()
        .unwrap_or(root)
        .join(category.table());
    dedup(vec![classified, sibling, root.to_path_buf()])
}

/// Directories searched for an existing file: the write chain plus the bare
/// category folder.
pub fn search_chain(root: &Path, category: Category, record: &DocumentRecord) -> Vec<PathBuf> {
    let mut dirs = write_chain(root, category, record);
    dirs.insert(1, category.dir(root));
    dedup(dirs)
}

fn dedup(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::with_capacity(dirs.len());
    for dir in dirs {
        if !out.contains(&dir) {
            out.push(dir);
        }
    }
    out
}

/// First directory of `chain` that can be created and written to.
pub fn first_writable(chain: &[PathBuf]) -> Result<PathBuf> {
    for dir in chain {
        match probe_writable(dir) {
            Ok(()) => return Ok(dir.clone()),
            Err(e) => debug!(dir = %dir.display(), error = %e, "directory not writable"),
        }
    }
    Err(LawLedgerError::validation(format!(
        "no writable directory among {} candidates",
        chain.len()
    )))
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(".write-test");
    fs::write(&probe, b"")?;
    fs::remove_file(&probe)
}

/// Join a single file name onto `dir`, refusing anything that could leave it.
pub fn safe_join(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(dir.join(file_name)),
        _ => Err(LawLedgerError::validation(format!(
            "file name {file_name:?} escapes {}",
            dir.display()
        ))),
    }
}

/// A regular, non-empty file.
pub fn is_nonempty_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

/// First non-empty file named `{stem}.{ext}` across `dirs`.
pub fn find_file(dirs: &[PathBuf], stems: &[String], extensions: &[&str]) -> Option<PathBuf> {
    dirs.iter()
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| {
            stems.iter().flat_map(move |stem| {
                extensions
                    .iter()
                    .filter_map(move |ext| safe_join(dir, &format!("{stem}.{ext}")).ok())
            })
        })
        .find(|path| is_nonempty_file(path))
}

/// The downloaded source document of a record, if any.
pub fn find_source(root: &Path, category: Category, record: &DocumentRecord) -> Option<PathBuf> {
    find_file(
        &search_chain(root, category, record),
        &candidate_stems(&record.title, &record.id),
        lawledger_markdown::SOURCE_EXTENSIONS,
    )
}

/// The rendered markdown of a record, if any.
pub fn find_output(root: &Path, category: Category, record: &DocumentRecord) -> Option<PathBuf> {
    find_file(
        &search_chain(root, category, record),
        &candidate_stems(&record.title, &record.id),
        &["md"],
    )
}

/// Dot-prefixed names are probes and in-flight temporary files.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

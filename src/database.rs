use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use anyhow::Result;

use crate::errors::BenchError;
use crate::types::{CompilationUnit, CompileCommandRecord};

/// Load and validate the compilation database at `path`.
///
/// Relative `directory` entries are resolved against the database's parent
/// directory, which is also the root that unit names are reported relative to.
/// The whole database is rejected if any record is malformed.
pub fn load_database(path: &Path) -> Result<Vec<CompilationUnit>> {
    let path = std::path::absolute(path).map_err(|source| BenchError::UnreadableDatabase {
        path: path.to_path_buf(),
        source,
    })?;

    let content =
        std::fs::read_to_string(&path).map_err(|source| BenchError::UnreadableDatabase {
            path: path.clone(),
            source,
        })?;

    parse_database(&content, &path)
}

/// Parse database JSON that was read from `db_path` (must be absolute).
pub fn parse_database(content: &str, db_path: &Path) -> Result<Vec<CompilationUnit>> {
    let malformed = |detail: String| BenchError::MalformedDatabase {
        path: db_path.to_path_buf(),
        detail,
    };

    let records: Vec<CompileCommandRecord> =
        serde_json::from_str(content).map_err(|e| malformed(e.to_string()))?;

    let root = normalize_path(db_path.parent().unwrap_or(Path::new("/")));
    let mut seen_stems = HashSet::new();
    let mut units = Vec::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        let directory = record
            .directory
            .filter(|d| !d.is_empty())
            .ok_or_else(|| malformed(format!("entry {index}: missing \"directory\"")))?;

        let file = record
            .file
            .filter(|f| !f.is_empty())
            .ok_or_else(|| malformed(format!("entry {index}: missing \"file\"")))?;

        let command = match (record.arguments, record.command) {
            (Some(arguments), _) => arguments,
            (None, Some(command)) => split_command(&command)
                .map_err(|detail| malformed(format!("entry {index}: {detail}")))?,
            (None, None) => {
                return Err(malformed(format!(
                    "entry {index}: missing \"arguments\" or \"command\""
                ))
                .into());
            }
        };

        if command.is_empty() {
            return Err(malformed(format!("entry {index}: empty command")).into());
        }

        let working_directory = normalize_path(&root.join(&directory));
        let source_path = normalize_path(&working_directory.join(&file));

        if !source_path.is_file() {
            return Err(malformed(format!(
                "entry {index}: source file {} does not exist",
                source_path.display()
            ))
            .into());
        }

        let name = relative_name(&source_path, &root);
        let output_stem = unique_stem(Path::new(&name), &mut seen_stems);

        units.push(CompilationUnit {
            name,
            source_path,
            working_directory,
            command,
            output_stem,
        });
    }

    Ok(units)
}

/// Split a shell-style command string into tokens.
///
/// Honors single quotes, double quotes, and backslash escapes. No expansion
/// of any kind is performed.
pub fn split_command(command: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err("unterminated single quote in command".to_string()),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => {
                                return Err("unterminated double quote in command".to_string());
                            }
                        },
                        Some(inner) => current.push(inner),
                        None => return Err("unterminated double quote in command".to_string()),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => current.push('\\'),
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

/// Remove `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Name a source file relative to `root`, or by its rootless absolute path
/// when it lives outside `root`.
fn relative_name(source: &Path, root: &Path) -> String {
    match source.strip_prefix(root) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => source
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
    }
}

/// Strip the extension from `name` and append `_` until the stem is unused.
fn unique_stem(name: &Path, seen: &mut HashSet<PathBuf>) -> PathBuf {
    let mut stem = name.with_extension("");
    while seen.contains(&stem) {
        let mut file_name = stem.file_name().map(OsString::from).unwrap_or_default();
        file_name.push("_");
        stem.set_file_name(file_name);
    }
    seen.insert(stem.clone());
    stem
}

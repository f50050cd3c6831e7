// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Project file discovery and feature-unit grouping

use glob::Pattern;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::Result;

/// Files that belong to one feature (e.g. `UserController.java`,
/// `UserService.java` and `UserMapper.xml` all land in `User`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureUnit {
    pub name: String,
    pub files: Vec<PathBuf>,
}

/// Recursively collect files whose name ends with one of `extensions`.
///
/// Suffix matching is case sensitive and the extensions carry their dot.
/// Paths matching any `exclude` glob are skipped, directories included.
/// The result is sorted.
pub fn find_project_files(root: &Path, extensions: &[String], exclude: &[String]) -> Result<Vec<PathBuf>> {
    let patterns = exclude
        .iter()
        .map(|p| Pattern::new(p))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut files = Vec::new();
    walk(root, extensions, &patterns, &mut files)?;
    files.sort();

    debug!("Found {} matching files under {:?}", files.len(), root);
    Ok(files)
}

fn walk(dir: &Path, extensions: &[String], exclude: &[Pattern], out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if exclude.iter().any(|p| p.matches_path(&path)) {
            debug!("Excluded: {:?}", path);
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if let Err(e) = walk(&path, extensions, exclude, out) {
                warn!("Skipping unreadable directory {:?}: {}", path, e);
            }
        } else if path.is_file() && has_extension(&path, extensions) {
            out.push(path);
        }
    }

    Ok(())
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| extensions.iter().any(|ext| name.ends_with(ext.as_str())))
        .unwrap_or(false)
}

/// Derive the feature name from a file path.
///
/// The stem is everything before the first `.` of the file name; every
/// occurrence of each strip word is then removed, in order.
pub fn feature_name(path: &Path, strip_suffixes: &[String]) -> String {
    let file_name = path.file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();

    let mut name = file_name.split('.').next().unwrap_or("").to_string();
    for suffix in strip_suffixes.iter().filter(|s| !s.is_empty()) {
        name = name.replace(suffix.as_str(), "");
    }
    name
}

/// Group files into feature units, keeping first-seen order
pub fn group_by_feature(files: &[PathBuf], strip_suffixes: &[String]) -> Vec<FeatureUnit> {
    let mut units: Vec<FeatureUnit> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for file in files {
        let name = feature_name(file, strip_suffixes);
        match index.get(&name) {
            Some(&i) => units[i].files.push(file.clone()),
            None => {
                index.insert(name.clone(), units.len());
                units.push(FeatureUnit { name, files: vec![file.clone()] });
            }
        }
    }

    units
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use riskscan::scanner::{feature_name, group_by_feature};
use std::path::PathBuf;

#[derive(Arbitrary, Debug)]
struct Input {
    names: Vec<String>,
    strip: Vec<String>,
}

fuzz_target!(|input: Input| {
    let files: Vec<PathBuf> = input.names.iter().map(PathBuf::from).collect();
    for file in &files {
        let _ = feature_name(file, &input.strip);
    }

    let units = group_by_feature(&files, &input.strip);
    let grouped: usize = units.iter().map(|u| u.files.len()).sum();
    assert_eq!(grouped, files.len());
});

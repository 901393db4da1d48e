//! Running the interceptor over class files on disk

use hyfix_classfile::ClassFile;
use hyfix_pipeline::{DiagnosticRecord, LoadInterceptor, LoadStats, Outcome};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const CLASS_EXT: &str = "class";

/// Summary printed with `--json`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Report {
    pub(crate) version: &'static str,
    pub(crate) stats: LoadStats,
    pub(crate) records: Vec<DiagnosticRecord>,
}

/// One processed file
#[derive(Debug)]
pub(crate) struct FileResult {
    pub(crate) unit: String,
    pub(crate) outcome: Outcome,
    pub(crate) changed: bool,
}

/// Every `.class` file under `root`, sorted
pub(crate) fn class_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == CLASS_EXT) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Unit name for a class file: the name it declares, else its path under `root`
pub(crate) fn unit_name(bytes: &[u8], path: &Path, root: Option<&Path>) -> String {
    if let Ok(class) = ClassFile::parse(bytes) {
        if let Ok(name) = class.name() {
            return name.to_owned();
        }
    }
    let relative = root
        .and_then(|root| path.strip_prefix(root).ok())
        .unwrap_or(path)
        .with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Load `input` through the interceptor and write the delivered bytes to `output`
pub(crate) fn process_file(
    interceptor: &LoadInterceptor,
    input: &Path,
    output: Option<&Path>,
    root: Option<&Path>,
) -> io::Result<FileResult> {
    let bytes = fs::read(input)?;
    let unit = unit_name(&bytes, input, root);
    let delivery = interceptor.intercept(&unit, &bytes);
    let changed = !delivery.is_original();
    if let Some(output) = output {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(output, &delivery.bytes)?;
    }
    Ok(FileResult {
        unit: delivery.unit,
        outcome: delivery.outcome,
        changed,
    })
}

use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::model::FileFormat;

/// Finds importable files (`csv`, `xlsx`, `xls`, `xml`, `pdf`) under a directory.
pub struct DirectoryScanner {
    input_directory: PathBuf,
    recursive: bool,
}

impl DirectoryScanner {
    pub fn new<P: AsRef<Path>>(input_directory: P) -> Self {
        Self {
            input_directory: input_directory.as_ref().to_path_buf(),
            recursive: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn input_directory(&self) -> &Path {
        &self.input_directory
    }

    /// Supported files in path order. Hidden files are skipped.
    pub fn scan(&self) -> Vec<PathBuf> {
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.input_directory)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }

            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if FileFormat::from_extension(ext).is_some() {
                    debug!("Found import file: {}", path.display());
                    files.push(path.to_path_buf());
                }
            }
        }

        info!(
            "Scanned {} import files in {}",
            files.len(),
            self.input_directory.display()
        );
        files
    }
}

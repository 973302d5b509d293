//! Rotating log files
//!
//! Size- and count-bounded file sets named by a pattern where `%g` is the
//! generation (0 is the file currently written) and `%u` a unique number.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Appends records to a rotating set of files.
#[derive(Debug)]
pub struct RotatingFileWriter {
    pattern: String,
    limit_bytes: u64,
    count: u32,
    file: Option<File>,
    written: u64,
}

impl RotatingFileWriter {
    /// Open generation 0 of `pattern` for appending.
    ///
    /// A `limit_bytes` of 0 disables rotation.
    pub fn open(pattern: impl Into<String>, limit_bytes: u64, count: u32) -> io::Result<Self> {
        let mut writer = Self {
            pattern: pattern.into(),
            limit_bytes,
            count: count.max(1),
            file: None,
            written: 0,
        };
        let current = writer.path(0);
        if let Some(parent) = current.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&current)?;
        writer.written = file.metadata()?.len();
        writer.file = Some(file);
        Ok(writer)
    }

    /// Path of a generation.
    pub fn path(&self, generation: u32) -> PathBuf {
        file_path(&self.pattern, generation)
    }

    /// Write one record, rotating first if it would exceed the size limit.
    pub fn write_record(&mut self, record: &str) -> io::Result<()> {
        let len = record.len() as u64;
        if self.limit_bytes > 0 && self.written > 0 && self.written + len > self.limit_bytes {
            self.rotate()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file is closed"))?;
        file.write_all(record.as_bytes())?;
        file.flush()?;
        self.written += len;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file = None;
        for generation in (1..self.count).rev() {
            let from = self.path(generation - 1);
            if from.exists() {
                fs::rename(&from, self.path(generation))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.path(0))?;
        self.file = Some(file);
        self.written = 0;
        Ok(())
    }

    /// Existing files, generation 0 first.
    pub fn files(&self) -> Vec<PathBuf> {
        existing_files(&self.pattern, self.count)
    }

    /// Flush and close the current file.
    pub fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
    }
}

impl Drop for RotatingFileWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Path of generation `generation` of `pattern`.
pub fn file_path(pattern: &str, generation: u32) -> PathBuf {
    PathBuf::from(
        pattern
            .replace("%u", "0")
            .replace("%g", &generation.to_string()),
    )
}

/// Existing files of `pattern` below generation `count`, generation 0 first.
pub fn existing_files(pattern: &str, count: u32) -> Vec<PathBuf> {
    (0..count.max(1))
        .map(|g| file_path(pattern, g))
        .filter(|p| p.exists())
        .collect()
}

/// Delete the files of generation `count` and above.
pub fn remove_generations_from(pattern: &str, count: u32) -> io::Result<usize> {
    let mut removed = 0;
    let mut generation = count;
    loop {
        let path = file_path(pattern, generation);
        if !Path::new(&path).exists() {
            break;
        }
        fs::remove_file(&path)?;
        removed += 1;
        generation += 1;
    }
    Ok(removed)
}

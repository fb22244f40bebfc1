//! Narrow filesystem capability for the loader.
//!
//! The loader reads exactly one file; this trait is the whole surface it may
//! touch, which keeps the decision table testable without a real disk.

use std::io;
use std::path::Path;
use std::time::SystemTime;

pub trait FileReader {
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
}

/// Production reader backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReader;

impl FileReader for FsReader {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }
}

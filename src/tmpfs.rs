use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::filename::{table_file_name, table_sub_file_name};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn unique_suffix() -> String {
    format!(
        "{}_{}",
        std::process::id(),
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    )
}

/// A scratch directory for table fixtures. A column table is never a single
/// file — every main file has `.C<i>` siblings — so fixtures are
/// directory-scoped and dropping the directory sweeps the whole family.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new() -> std::io::Result<Self> {
        let base = PathBuf::from("/tmp/shaledb_tests");
        fs::create_dir_all(&base)?;

        let path = base.join(format!("test_{}", unique_suffix()));
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir(&path)?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the main file of table `number` inside this directory. The
    /// builder derives the subcolumn siblings from it.
    pub fn table_path(&self, number: u64) -> PathBuf {
        table_file_name(&self.path, number)
    }

    /// Path of subcolumn `column` (1-based) of table `number`.
    pub fn sub_table_path(&self, number: u64, column: u32) -> PathBuf {
        table_sub_file_name(&self.table_path(number), column)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

pub struct NamedTempFile {
    path: PathBuf,
}

impl NamedTempFile {
    pub fn new() -> std::io::Result<Self> {
        let dir = PathBuf::from("/tmp/shaledb_tests");
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("file_{}", unique_suffix()));
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reopen(&self) -> std::io::Result<fs::File> {
        fs::File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
    }
}

impl Drop for NamedTempFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_paths_name_the_column_family() {
        let dir = TempDir::new().unwrap();
        let main = dir.table_path(7);
        assert_eq!(main, dir.path().join("000007.sst"));
        assert_eq!(
            dir.sub_table_path(7, 2),
            dir.path().join("000007.sst.C2")
        );
    }

    #[test]
    fn test_drop_sweeps_main_and_siblings() {
        let main;
        let sub;
        {
            let dir = TempDir::new().unwrap();
            main = dir.table_path(1);
            sub = dir.sub_table_path(1, 1);
            fs::write(&main, b"main").unwrap();
            fs::write(&sub, b"sub").unwrap();
        }
        assert!(!main.exists());
        assert!(!sub.exists());
    }
}

//! Table file naming.
//!
//! A table is materialized as one main file `<dbname>/<NNNNNN>.sst` plus one
//! sibling `<dbname>/<NNNNNN>.sst.C<i>` per subcolumn, `i` counted from 1.

use std::path::{Path, PathBuf};

/// Path of the main table file for `number` under `dbname`.
pub fn table_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.sst"))
}

/// Path of subcolumn `column` (1-based) of the table at `main_path`.
pub fn table_sub_file_name(main_path: &Path, column: u32) -> PathBuf {
    debug_assert!(column >= 1);
    let mut name = main_path.as_os_str().to_os_string();
    name.push(format!(".C{column}"));
    PathBuf::from(name)
}

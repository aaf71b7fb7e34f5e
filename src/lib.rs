pub mod cache;
pub mod comparator;
pub mod config;
pub mod error;
pub mod file_iter;
pub mod filename;
pub mod key;
pub mod splitter;
pub mod sstable;
pub mod tmpfs;

pub use cache::BlockCache;
pub use config::{ReadOptions, TableOptions};
pub use error::{Error, Result};
pub use file_iter::FileIter;
pub use sstable::builder::ColumnTableBuilder;
pub use sstable::reader::ColumnTableReader;
pub use sstable::InternalIterator;

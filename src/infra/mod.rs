pub mod file_batch_source;
pub mod fs_archiver;
pub mod json_file_sink;

pub use file_batch_source::FileBatchSource;
pub use fs_archiver::FsArchiver;
pub use json_file_sink::JsonFileSink;

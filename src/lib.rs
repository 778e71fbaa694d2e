pub mod table;
pub mod codec;
pub mod classify;
pub mod index;
pub mod perf;
pub mod io_stream;
pub mod export;
pub mod archive;

pub use table::{CharTable, IndexWidth, LabelGenerator, LabelPolicy, TableError};
pub use codec::{encode_text, decode_text, CodecError};
pub use classify::{Classifier, Classification};
pub use index::{FileRecord, Manifest};
pub use io_stream::{BundleReader, BundleWriter, ExtractReport};
pub use export::ExportSnapshot;

mod header;

pub use header::{get_record, insert_record, update_record, MAX_HEADER_RECORDS};

pub mod checksum;
pub mod ingest;
pub mod lookup;
pub mod nearest;

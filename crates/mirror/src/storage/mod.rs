//! On-disk state for a sync target
//!
//! Each output directory carries a hidden `.data` directory holding the
//! document database and the last-sync marker.

mod state_dir;

pub use state_dir::{DATA_DIR, DATABASE_FILE, MARKER_FILE, PersistenceStore};

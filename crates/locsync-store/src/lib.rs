mod cms;
mod composite;
mod file;

pub use cms::{CmsStore, METADATA_CONTENT_TYPE};
pub use composite::CompositeStore;
pub use file::FileStore;

mod deepl;
pub mod markdown;

pub use deepl::DeepLClient;

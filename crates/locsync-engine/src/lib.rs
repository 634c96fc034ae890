mod clone;
mod incremental;
mod text;

pub use clone::{CloneEngine, CloneRequest, EngineOptions};
pub use incremental::UpdateOptions;
pub use text::translate_field_text;

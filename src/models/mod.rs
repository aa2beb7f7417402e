pub mod agent_result;
pub mod enums;
pub mod ontology;
pub mod record;
pub mod span;

pub use agent_result::*;
pub use enums::*;
pub use ontology::*;
pub use record::*;
pub use span::*;

/// Clamp a confidence or similarity score into [0, 1]. NaN maps to 0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

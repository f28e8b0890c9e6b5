pub mod displacement;
pub mod mapping;

pub use displacement::DisplacementField;
pub use mapping::CompositeMapping;

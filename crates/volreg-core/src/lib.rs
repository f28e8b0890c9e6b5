pub mod consts;
pub mod error;
pub mod field;
pub mod filters;
pub mod interpolation;
pub mod io;
pub mod pipeline;
pub mod pyramid;
pub mod register;
pub mod transform;
pub mod volume;

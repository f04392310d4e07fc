//! trainbox-entrypoint validation and rendering library.
//!
//! Pure logic for the container bootstrap binary, split out so unit tests
//! can exercise it without root or a running container.

pub mod render;
pub mod validate;

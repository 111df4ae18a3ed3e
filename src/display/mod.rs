pub mod canvas;
pub mod fade;
pub mod font;
pub mod layout;
#[cfg(feature = "window")]
pub mod window;

pub mod commands;
pub mod error;
pub mod events;
pub mod images;
pub mod session;

pub use error::StudioError;
pub use images::EncodedImage;

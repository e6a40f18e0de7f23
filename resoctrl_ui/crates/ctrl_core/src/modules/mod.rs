pub mod client;
pub mod controller;
pub mod image;
pub mod preview;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod settings;
pub mod thumbnails;
pub mod view;

//! Upload session notifications.

pub mod observer;

pub use observer::UploadEventObserver;

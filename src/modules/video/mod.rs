pub mod events;
pub mod model;
pub mod repository;
pub mod service;

pub use model::{ProcessedVideo, ProcessingStatus, Video};
pub use repository::{PersistenceError, PgVideoRepository, VideoRepository};

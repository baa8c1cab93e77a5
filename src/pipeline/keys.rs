//! Object store key layout for a video's HLS output.

use crate::media::playlist::MASTER_PLAYLIST_NAME;
use crate::modules::video::Video;

pub const MASTER_DIR: &str = "master";

/// `courses/{courseId}/chapters/{chapterId}/videos/{videoId}/` for chapter
/// videos, `courses/{courseId}/demo/videos/{videoId}/` for a course demo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoKeyspace {
    prefix: String,
}

impl VideoKeyspace {
    pub fn for_video(video: &Video) -> Self {
        let owner = match &video.chapter_id {
            Some(chapter_id) => format!("courses/{}/chapters/{}", video.course_id, chapter_id),
            None => format!("courses/{}/demo", video.course_id),
        };
        Self {
            prefix: format!("{}/videos/{}/", owner, video.id),
        }
    }

    /// Always ends in `/` so one video's prefix never matches a sibling whose
    /// id merely starts with the same characters.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn rendition_key(&self, rendition: &str, file_name: &str) -> String {
        format!("{}{}/{}", self.prefix, rendition, file_name)
    }

    pub fn master_key(&self) -> String {
        self.rendition_key(MASTER_DIR, MASTER_PLAYLIST_NAME)
    }
}

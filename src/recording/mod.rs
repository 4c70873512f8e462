mod recorder;
mod state;

pub use recorder::RoomRecorder;
pub use state::RecordingState;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::RecordingConfig;
use crate::error::GroupCallError;

/// Container/profile the media server writes recordings with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaProfile {
    Webm,
    Mp4,
    WebmAudioOnly,
    Mp4AudioOnly,
}

impl MediaProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webm => "WEBM",
            Self::Mp4 => "MP4",
            Self::WebmAudioOnly => "WEBM_AUDIO_ONLY",
            Self::Mp4AudioOnly => "MP4_AUDIO_ONLY",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Webm | Self::WebmAudioOnly => "webm",
            Self::Mp4 | Self::Mp4AudioOnly => "mp4",
        }
    }
}

impl FromStr for MediaProfile {
    type Err = GroupCallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WEBM" => Ok(Self::Webm),
            "MP4" => Ok(Self::Mp4),
            "WEBM_AUDIO_ONLY" => Ok(Self::WebmAudioOnly),
            "MP4_AUDIO_ONLY" => Ok(Self::Mp4AudioOnly),
            other => Err(GroupCallError::InvalidConfiguration(format!(
                "unknown recording profile '{}'",
                other
            ))),
        }
    }
}

/// Destination of a room's recording: one file per room name, so a reused
/// name overwrites the previous recording.
pub fn recording_uri(config: &RecordingConfig, room_name: &str) -> String {
    let dir = config.output_dir.trim_end_matches('/');
    format!(
        "file://{}/{}.{}",
        dir,
        urlencoding::encode(room_name),
        config.profile.extension()
    )
}

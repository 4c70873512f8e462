use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{GroupCallError, Result};

/// Rejects offers that are not well-formed session descriptions
pub fn validate_offer(sdp_offer: &str) -> Result<()> {
    if sdp_offer.trim().is_empty() {
        return Err(GroupCallError::InvalidSdp("empty offer".to_string()));
    }

    RTCSessionDescription::offer(sdp_offer.to_string())?;
    Ok(())
}

/// Minimal audio-only offer, for command-line joins that have no browser
/// to produce one
pub const SAMPLE_OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=sendrecv\r\n";

#[cfg(test)]
pub(crate) const TEST_OFFER: &str = SAMPLE_OFFER;

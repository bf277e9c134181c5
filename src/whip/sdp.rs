//! Minimal SDP inspection for the pre-flight codec check.

/// Video codecs the ingestion server accepts.
pub const SUPPORTED_VIDEO_CODECS: [&str; 2] = ["H264", "VP8"];

/// Encoding names of every `a=rtpmap` line, in order of appearance.
pub fn rtpmap_codecs(sdp: &str) -> impl Iterator<Item = &str> {
    sdp.lines().filter_map(|line| {
        let mapping = line.trim().strip_prefix("a=rtpmap:")?;
        // a=rtpmap:<pt> <encoding>/<clock rate>[/<channels>]
        let (_, encoding) = mapping.split_once(' ')?;
        encoding.split('/').next()
    })
}

/// Whether the description offers at least one supported video codec.
pub fn has_supported_video_codec(sdp: &str) -> bool {
    rtpmap_codecs(sdp).any(|codec| {
        SUPPORTED_VIDEO_CODECS
            .iter()
            .any(|supported| codec.eq_ignore_ascii_case(supported))
    })
}

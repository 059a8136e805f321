//! SDP codec filter: strips named codecs (VP8, AV1 by default) from the
//! SDP transmitted to the sink, per §4.5's filter algorithm. Only the
//! outgoing text is touched; the locally set description is never
//! filtered, so the local encoder remains free to choose any codec it
//! advertised.

/// Removes `a=rtpmap`/`a=rtcp-fb`/`a=fmtp` lines and `m=video` payload
/// numbers for any codec named in `blocked_codecs` (case-insensitive,
/// matched against the codec name before the `/` in `a=rtpmap:<pt>
/// <codec>/<clock>`).
pub fn filter_codecs(sdp: &str, blocked_codecs: &[String]) -> String {
    let blocked_lower: Vec<String> = blocked_codecs.iter().map(|c| c.to_lowercase()).collect();

    let lines: Vec<&str> = sdp.lines().collect();
    let mut blocked_payload_types: Vec<String> = Vec::new();

    for line in &lines {
        if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            if let Some((pt, codec_clock)) = rest.split_once(' ') {
                if let Some((codec, _clock)) = codec_clock.split_once('/') {
                    if blocked_lower.contains(&codec.to_lowercase()) {
                        blocked_payload_types.push(pt.to_string());
                    }
                }
            }
        }
    }

    if blocked_payload_types.is_empty() {
        return sdp.to_string();
    }

    let mut out_lines: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            if pt_matches(rest, &blocked_payload_types) {
                continue;
            }
        }
        if let Some(rest) = line.strip_prefix("a=rtcp-fb:") {
            if pt_matches(rest, &blocked_payload_types) {
                continue;
            }
        }
        if let Some(rest) = line.strip_prefix("a=fmtp:") {
            if pt_matches(rest, &blocked_payload_types) {
                continue;
            }
        }
        if line.starts_with("m=video") {
            out_lines.push(filter_mline(line, &blocked_payload_types));
            continue;
        }
        out_lines.push(line.to_string());
    }

    out_lines.join("\r\n")
}

fn pt_matches(rest: &str, blocked: &[String]) -> bool {
    let pt = rest.split(|c: char| c == ' ' || c == ':').next().unwrap_or("");
    blocked.iter().any(|b| b == pt)
}

fn filter_mline(line: &str, blocked: &[String]) -> String {
    let mut fields: Vec<&str> = line.split(' ').collect();
    fields.retain(|f| !blocked.iter().any(|b| b == f));
    fields.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96 97 98\r\na=rtpmap:96 VP8/90000\r\na=rtcp-fb:96 nack\r\na=fmtp:96 x=1\r\na=rtpmap:97 H264/90000\r\na=fmtp:97 packetization-mode=1\r\na=rtpmap:98 AV1/90000\r\na=rtcp-fb:98 nack\r\n";

    #[test]
    fn removes_vp8_and_av1_but_keeps_h264() {
        let filtered = filter_codecs(SAMPLE_SDP, &["VP8".to_string(), "AV1".to_string()]);
        assert!(!filtered.contains("VP8"));
        assert!(!filtered.contains("AV1"));
        assert!(filtered.contains("H264"));
        assert!(!filtered.contains("a=rtpmap:96"));
        assert!(!filtered.contains("a=rtpmap:98"));
        assert!(filtered.contains("a=rtpmap:97"));
    }

    #[test]
    fn mline_no_longer_lists_removed_payload_types() {
        let filtered = filter_codecs(SAMPLE_SDP, &["VP8".to_string(), "AV1".to_string()]);
        let mline = filtered.lines().find(|l| l.starts_with("m=video")).unwrap();
        assert!(!mline.split(' ').any(|f| f == "96"));
        assert!(!mline.split(' ').any(|f| f == "98"));
        assert!(mline.split(' ').any(|f| f == "97"));
    }

    #[test]
    fn other_lines_preserved_verbatim() {
        let filtered = filter_codecs(SAMPLE_SDP, &["VP8".to_string(), "AV1".to_string()]);
        assert!(filtered.contains("o=- 0 0 IN IP4 127.0.0.1"));
    }

    #[test]
    fn no_blocked_codecs_present_leaves_sdp_unchanged() {
        let sdp = "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 97\r\na=rtpmap:97 H264/90000\r\n";
        assert_eq!(filter_codecs(sdp, &["VP8".to_string()]), sdp);
    }
}

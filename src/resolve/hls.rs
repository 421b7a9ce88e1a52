//! M3U8/HLS playlist expansion.
//!
//! A playlist becomes one fetch unit per segment, in playlist order. Segments
//! are later concatenated byte for byte, so only clear, finished (VOD)
//! playlists of whole-file segments are accepted. An fMP4 initialization
//! section is fetched first so the concatenation starts with it.

use m3u8_rs::{KeyMethod, Map, MasterPlaylist, MediaPlaylist, MediaPlaylistType, Playlist, VariantStream};

use crate::config::VariantPreference;
use crate::error::{Error, Result};
use crate::job::FetchUnit;
use crate::resolve::client::HttpClient;

/// Fetch the playlist at `url` and expand it into fetch units.
///
/// Master playlists are followed one level to the preferred variant.
pub async fn resolve_playlist(
    http: &HttpClient,
    url: &str,
    preference: VariantPreference,
) -> Result<Vec<FetchUnit>> {
    let content = http.get_text(url).await?;

    match parse(&content)? {
        Playlist::MasterPlaylist(master) => {
            let variant = select_variant(&master, preference)?;
            let variant_url = resolve_url(url, &variant.uri)?;
            tracing::debug!(
                bandwidth = variant.bandwidth,
                url = %variant_url,
                "Selected HLS variant"
            );

            let media_content = http.get_text(&variant_url).await?;
            match parse(&media_content)? {
                Playlist::MediaPlaylist(media) => extract_segments(&variant_url, &media),
                Playlist::MasterPlaylist(_) => Err(Error::UnresolvableSource(
                    "variant playlist is itself a master playlist".into(),
                )),
            }
        }
        Playlist::MediaPlaylist(media) => extract_segments(url, &media),
    }
}

fn parse(content: &str) -> Result<Playlist> {
    m3u8_rs::parse_playlist_res(content.as_bytes())
        .map_err(|e| Error::UnresolvableSource(format!("Failed to parse playlist: {:?}", e)))
}

/// Pick a variant by advertised bandwidth, ignoring I-frame-only streams.
pub fn select_variant(
    master: &MasterPlaylist,
    preference: VariantPreference,
) -> Result<&VariantStream> {
    let candidates = master.variants.iter().filter(|v| !v.is_i_frame);
    let chosen = match preference {
        VariantPreference::Highest => candidates.max_by_key(|v| v.bandwidth),
        VariantPreference::Lowest => candidates.min_by_key(|v| v.bandwidth),
    };
    chosen.ok_or_else(|| Error::UnresolvableSource("No variants in master playlist".into()))
}

/// Turn a media playlist into fetch units.
///
/// An `#EXT-X-MAP` initialization section becomes the first unit, ahead of
/// the media segments it applies to. Byte-range addressing cannot be
/// expressed as whole-file transfers and is rejected.
pub fn extract_segments(base_url: &str, playlist: &MediaPlaylist) -> Result<Vec<FetchUnit>> {
    let finished = playlist.end_list || playlist.playlist_type == Some(MediaPlaylistType::Vod);
    if !finished {
        return Err(Error::UnresolvableSource(
            "live playlists without #EXT-X-ENDLIST are not supported".into(),
        ));
    }

    let mut encrypted = false;
    let mut init: Option<&Map> = None;
    let mut units = Vec::with_capacity(playlist.segments.len() + 1);
    for (i, segment) in playlist.segments.iter().enumerate() {
        // A key tag applies to every segment after it until the next one.
        if let Some(key) = &segment.key {
            encrypted = key.method != KeyMethod::None;
        }
        if encrypted {
            return Err(Error::UnresolvableSource(format!(
                "segment {} is encrypted",
                i
            )));
        }
        if segment.byte_range.is_some() {
            return Err(Error::UnresolvableSource(format!(
                "segment {} uses #EXT-X-BYTERANGE",
                i
            )));
        }

        if let Some(map) = &segment.map {
            match init {
                None => {
                    if map.byte_range.is_some() {
                        return Err(Error::UnresolvableSource(
                            "#EXT-X-MAP with a byte range is not supported".into(),
                        ));
                    }
                    units.push(FetchUnit::new(0, resolve_url(base_url, &map.uri)?));
                    init = Some(map);
                }
                Some(first) if first.uri != map.uri || first.byte_range != map.byte_range => {
                    return Err(Error::UnresolvableSource(format!(
                        "segment {} switches to a second #EXT-X-MAP",
                        i
                    )));
                }
                Some(_) => {}
            }
        } else if init.is_some() {
            return Err(Error::UnresolvableSource(format!(
                "segment {} follows an #EXT-X-MAP but has none",
                i
            )));
        }

        let index = units.len() as u32;
        units.push(FetchUnit::new(index, resolve_url(base_url, &segment.uri)?));
    }

    if units.len() <= usize::from(init.is_some()) {
        return Err(Error::UnresolvableSource("No segments found in playlist".into()));
    }

    Ok(units)
}

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &str, path: &str) -> Result<String> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Ok(path.to_string());
    }

    let base_url = url::Url::parse(base)?;
    let resolved = base_url.join(path)?;
    Ok(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720
hi/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1400000,RESOLUTION=842x480
mid/index.m3u8
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:10.0,
seg0.ts
#EXTINF:10.0,
https://other.example/abs/seg1.ts
#EXTINF:4.5,
../seg2.ts
#EXT-X-ENDLIST
";

    fn media(content: &str) -> MediaPlaylist {
        match m3u8_rs::parse_playlist_res(content.as_bytes()).unwrap() {
            Playlist::MediaPlaylist(m) => m,
            _ => panic!("expected media playlist"),
        }
    }

    fn master(content: &str) -> MasterPlaylist {
        match m3u8_rs::parse_playlist_res(content.as_bytes()).unwrap() {
            Playlist::MasterPlaylist(m) => m,
            _ => panic!("expected master playlist"),
        }
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://example.com/path/playlist.m3u8", "segment.ts").unwrap(),
            "https://example.com/path/segment.ts"
        );
        assert_eq!(
            resolve_url("https://example.com/path/playlist.m3u8", "/root/seg.ts").unwrap(),
            "https://example.com/root/seg.ts"
        );
        assert_eq!(
            resolve_url("https://example.com/p.m3u8", "https://cdn.example.com/s.ts").unwrap(),
            "https://cdn.example.com/s.ts"
        );
    }

    #[test]
    fn test_segments_in_order() {
        let units = extract_segments("https://example.com/v/hi/index.m3u8", &media(MEDIA)).unwrap();
        let locators: Vec<_> = units.iter().map(|u| u.remote_locator.as_str()).collect();
        assert_eq!(
            locators,
            vec![
                "https://example.com/v/hi/seg0.ts",
                "https://other.example/abs/seg1.ts",
                "https://example.com/v/seg2.ts",
            ]
        );
        assert!(units.iter().enumerate().all(|(i, u)| u.sequence_index == i as u32));
    }

    #[test]
    fn test_variant_preference() {
        let m = master(MASTER);
        assert_eq!(select_variant(&m, VariantPreference::Highest).unwrap().uri, "hi/index.m3u8");
        assert_eq!(select_variant(&m, VariantPreference::Lowest).unwrap().uri, "low/index.m3u8");
    }

    #[test]
    fn test_live_playlist_rejected() {
        let live = MEDIA.replace("#EXT-X-ENDLIST\n", "");
        assert!(extract_segments("https://example.com/a.m3u8", &media(&live)).is_err());
    }

    #[test]
    fn test_encrypted_playlist_rejected() {
        let encrypted = MEDIA.replace(
            "#EXTINF:10.0,\nseg0.ts",
            "#EXT-X-KEY:METHOD=AES-128,URI=\"https://example.com/key\"\n#EXTINF:10.0,\nseg0.ts",
        );
        let err = extract_segments("https://example.com/a.m3u8", &media(&encrypted)).unwrap_err();
        assert!(matches!(err, Error::UnresolvableSource(_)));
    }

    #[test]
    fn test_empty_playlist_rejected() {
        let empty = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-ENDLIST\n";
        assert!(extract_segments("https://example.com/a.m3u8", &media(empty)).is_err());
    }

    #[test]
    fn test_byte_range_segments_rejected() {
        let ranged = MEDIA.replace(
            "#EXTINF:10.0,\nseg0.ts",
            "#EXTINF:10.0,\n#EXT-X-BYTERANGE:1000@0\nseg0.ts",
        );
        let err = extract_segments("https://example.com/a.m3u8", &media(&ranged)).unwrap_err();
        assert!(matches!(err, Error::UnresolvableSource(ref m) if m.contains("BYTERANGE")));
    }

    #[test]
    fn test_init_map_becomes_first_unit() {
        let fmp4 = "#EXTM3U
#EXT-X-VERSION:7
#EXT-X-TARGETDURATION:6
#EXT-X-MAP:URI=\"init.mp4\"
#EXTINF:6.0,
part0.m4s
#EXTINF:6.0,
part1.m4s
#EXT-X-ENDLIST
";
        let units = extract_segments("https://example.com/v/index.m3u8", &media(fmp4)).unwrap();
        let locators: Vec<_> = units.iter().map(|u| u.remote_locator.as_str()).collect();
        assert_eq!(
            locators,
            vec![
                "https://example.com/v/init.mp4",
                "https://example.com/v/part0.m4s",
                "https://example.com/v/part1.m4s",
            ]
        );
        assert!(units.iter().enumerate().all(|(i, u)| u.sequence_index == i as u32));
    }

    #[test]
    fn test_second_init_map_rejected() {
        let switching = "#EXTM3U
#EXT-X-VERSION:7
#EXT-X-TARGETDURATION:6
#EXT-X-MAP:URI=\"init-a.mp4\"
#EXTINF:6.0,
part0.m4s
#EXT-X-MAP:URI=\"init-b.mp4\"
#EXTINF:6.0,
part1.m4s
#EXT-X-ENDLIST
";
        assert!(extract_segments("https://example.com/a.m3u8", &media(switching)).is_err());
    }

    #[test]
    fn test_ranged_init_map_rejected() {
        let ranged = "#EXTM3U
#EXT-X-VERSION:7
#EXT-X-TARGETDURATION:6
#EXT-X-MAP:URI=\"main.mp4\",BYTERANGE=\"720@0\"
#EXTINF:6.0,
part0.m4s
#EXT-X-ENDLIST
";
        assert!(extract_segments("https://example.com/a.m3u8", &media(ranged)).is_err());
    }
}

//! Metadata path of a numeric content identifier.

/// Lifetime used when none is configured.
pub const DEFAULT_LIFETIME: u64 = 86400;

/// Build `/api/json/video/<lifetime>/<shardA>/<shardB>/<id>.<ext>`.
///
/// `shardA` rounds `id` down to a multiple of 1,000,000 and `shardB` to a
/// multiple of 1,000. A lifetime of zero selects the `jsond` variant.
pub fn video_path(lifetime: Option<u64>, video_id: u64) -> String {
    let lifetime = lifetime.unwrap_or(DEFAULT_LIFETIME);
    let ext = if lifetime != 0 { "json" } else { "jsond" };
    let shard_a = video_id - video_id % 1_000_000;
    let shard_b = video_id - video_id % 1_000;
    format!(
        "/api/json/video/{}/{}/{}/{}.{}",
        lifetime, shard_a, shard_b, video_id, ext
    )
}

/// Endpoint returning the obfuscated file locator of a video.
pub fn videofile_path(lifetime: Option<u64>, video_id: u64) -> String {
    let lifetime = lifetime.unwrap_or(DEFAULT_LIFETIME);
    format!(
        "/api/videofile.php?video_id={}&lifetime={}00",
        video_id, lifetime
    )
}

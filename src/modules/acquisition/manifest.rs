use super::model::Artifact;

pub const MANIFEST_NAME: &str = "manifest.m3u8";
pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Extended M3U playlist listing every published artifact, relative to the
/// manifest's own prefix.
pub fn render(artifacts: &[Artifact]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for artifact in artifacts {
        out.push_str(&format!("#EXTINF:-1,{}\n{}\n", artifact.label, artifact.file_name));
    }
    out
}

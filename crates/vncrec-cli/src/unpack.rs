// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::info;
use vncrec_recorder::package::read_container;
use vncrec_recorder::RecorderConfig;

#[derive(Args)]
pub struct UnpackArgs {
    /// Container package to split
    pub input: PathBuf,

    /// Directory for the extracted files (default: next to the input)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

impl UnpackArgs {
    pub async fn run(self, _config: RecorderConfig) -> anyhow::Result<()> {
        let bytes = tokio::fs::read(&self.input)
            .await
            .with_context(|| format!("Failed to read {}", self.input.display()))?;
        let (metadata, video) = read_container(&bytes)?;

        let (json_path, video_path) = output_paths(&self.input, self.output_dir.as_deref());
        if let Some(parent) = json_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&json_path, serde_json::to_vec_pretty(&metadata)?)
            .await
            .with_context(|| format!("Failed to write {}", json_path.display()))?;
        tokio::fs::write(&video_path, video)
            .await
            .with_context(|| format!("Failed to write {}", video_path.display()))?;

        info!(
            metadata = %json_path.display(),
            video = %video_path.display(),
            width = metadata.video.width,
            height = metadata.video.height,
            duration_ms = metadata.video.duration_ms,
            events = metadata.events.len(),
            "Unpacked container"
        );
        Ok(())
    }
}

fn output_paths(input: &Path, output_dir: Option<&Path>) -> (PathBuf, PathBuf) {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "package".to_string());
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    (
        dir.join(format!("{}.json", stem)),
        dir.join(format!("{}.video", stem)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vncrec_recorder::format::pack_container;
    use vncrec_recorder::package::ContainerMetadata;

    #[test]
    fn test_output_paths() {
        let (json, video) = output_paths(Path::new("out/upload-1.vncpkg"), None);
        assert_eq!(json, PathBuf::from("out/upload-1.json"));
        assert_eq!(video, PathBuf::from("out/upload-1.video"));

        let (json, _) = output_paths(Path::new("upload-1.vncpkg"), Some(Path::new("/tmp/x")));
        assert_eq!(json, PathBuf::from("/tmp/x/upload-1.json"));
    }

    #[tokio::test]
    async fn test_unpack_splits_container() {
        let dir = tempfile::TempDir::new().unwrap();
        let metadata = serde_json::json!({
            "version": 1,
            "createdAt": "2025-01-01T00:00:00Z",
            "video": {
                "width": 8,
                "height": 6,
                "durationMs": 130,
                "frameRate": 24,
                "startTimestampOffsetMs": 20,
                "framesEncoded": 4,
                "size": 3
            },
            "events": []
        });
        let json = serde_json::to_vec(&metadata).unwrap();
        let input = dir.path().join("upload.vncpkg");
        std::fs::write(&input, pack_container(&json, &[7, 8, 9]).unwrap()).unwrap();

        let args = UnpackArgs {
            input,
            output_dir: None,
        };
        args.run(RecorderConfig::default()).await.unwrap();

        let video = std::fs::read(dir.path().join("upload.video")).unwrap();
        assert_eq!(video, vec![7, 8, 9]);
        let parsed: ContainerMetadata =
            serde_json::from_slice(&std::fs::read(dir.path().join("upload.json")).unwrap()).unwrap();
        assert_eq!(parsed.video.start_timestamp_offset_ms, 20);
    }
}

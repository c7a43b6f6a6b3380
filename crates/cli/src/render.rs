//! `clipline export`: run the full export loop against a digesting muxer.
//!
//! Nothing is encoded. Every composed frame and audio span is folded into
//! an FNV-1a digest so two runs can be compared for determinism.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cl_audio::{AssetAudioDecoderFactory, AudioBuffer, AudioTimeline};
use cl_common::{AssetStore, AudioConfig, DirAssetStore, EngineConfig, ExportSettings, TimeMs};
use cl_decoder::{AssetSessionFactory, VideoCacheManager};
use cl_export::{
    ExportConfig, ExportJob, ExportPipeline, ExportProgress, ExportSummary, MediaMuxer, MuxError,
    StackCompositor,
};
use cl_timeline_eval::Project;
use parking_lot::Mutex;
use tracing::info;

/// Outcome of a dry run.
#[derive(Debug)]
pub struct RenderReport {
    pub summary: ExportSummary,
    pub digest: u64,
}

impl fmt::Display for RenderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, {} audio frames in {:.2}s, digest {:016x}",
            self.summary.frames, self.summary.audio_frames, self.summary.duration_secs, self.digest
        )
    }
}

pub fn dry_run(
    project: Project,
    assets: &Path,
    config: &EngineConfig,
    include_audio: bool,
) -> Result<RenderReport> {
    let store: Arc<dyn AssetStore> = Arc::new(DirAssetStore::new(assets));
    let caches = VideoCacheManager::new(
        Arc::new(AssetSessionFactory::raw(Arc::clone(&store))),
        &config.decoder,
    );
    let settings = ExportSettings {
        include_audio: include_audio && config.export.include_audio,
    };
    let export_config = ExportConfig::from_project(&project, &settings);
    let tree = Arc::new(project.tree);

    let digest = Digest::default();
    let mut job = ExportJob::new(
        Arc::clone(&tree),
        export_config,
        caches,
        Box::new(StackCompositor::new()),
        Box::new(DigestMuxer {
            digest: digest.clone(),
        }),
    );
    if settings.include_audio {
        let audio = AudioTimeline::new(
            Arc::new(AssetAudioDecoderFactory::new(store)),
            &AudioConfig {
                sample_rate: project.audio_sample_rate,
                channels: config.audio.channels,
            },
        );
        audio
            .build_timeline(&tree)
            .context("Failed to build audio timeline")?;
        job = job.with_audio(Arc::new(audio));
    }

    let handle = ExportPipeline::start(job)?;
    while let Some(update) = handle.recv_progress() {
        if let ExportProgress::FrameWritten { frame, total, time } = &update {
            if (frame + 1) % 25 == 0 || frame + 1 == *total {
                info!(frame = frame + 1, total, time = %time, "Rendered");
            }
        }
        if update.is_finished() {
            break;
        }
    }
    let summary = handle.wait().context("Export failed")?;

    Ok(RenderReport {
        summary,
        digest: digest.value(),
    })
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Running FNV-1a hash shared between the muxer and the caller.
#[derive(Clone, Debug)]
struct Digest(Arc<Mutex<u64>>);

impl Default for Digest {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(FNV_OFFSET)))
    }
}

impl Digest {
    fn update(&self, bytes: &[u8]) {
        let mut hash = self.0.lock();
        for &byte in bytes {
            *hash ^= byte as u64;
            *hash = hash.wrapping_mul(FNV_PRIME);
        }
    }

    fn value(&self) -> u64 {
        *self.0.lock()
    }
}

/// Muxer that hashes what it is given.
struct DigestMuxer {
    digest: Digest,
}

impl MediaMuxer for DigestMuxer {
    fn add_video_frame(
        &mut self,
        pixels: &[u8],
        timestamp: TimeMs,
        duration: TimeMs,
    ) -> Result<(), MuxError> {
        self.digest.update(&timestamp.as_millis().to_le_bytes());
        self.digest.update(&duration.as_millis().to_le_bytes());
        self.digest.update(pixels);
        Ok(())
    }

    fn add_audio_buffer(&mut self, samples: &AudioBuffer) -> Result<(), MuxError> {
        for sample in &samples.samples {
            self.digest.update(&sample.to_le_bytes());
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), MuxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_fnv1a() {
        let digest = Digest::default();
        assert_eq!(digest.value(), FNV_OFFSET);
        digest.update(b"a");
        assert_eq!(digest.value(), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn digest_depends_on_frame_order() {
        let a = Digest::default();
        let mut muxer = DigestMuxer { digest: a.clone() };
        muxer.add_video_frame(&[1, 2], TimeMs(0.0), TimeMs(40.0)).unwrap();
        muxer.add_video_frame(&[3, 4], TimeMs(40.0), TimeMs(40.0)).unwrap();

        let b = Digest::default();
        let mut muxer = DigestMuxer { digest: b.clone() };
        muxer.add_video_frame(&[3, 4], TimeMs(0.0), TimeMs(40.0)).unwrap();
        muxer.add_video_frame(&[1, 2], TimeMs(40.0), TimeMs(40.0)).unwrap();

        assert_ne!(a.value(), b.value());
    }

    #[test]
    fn report_display() {
        let report = RenderReport {
            summary: ExportSummary {
                frames: 11,
                audio_frames: 52_800,
                duration_secs: 0.5,
            },
            digest: 0xabc,
        };
        assert_eq!(
            report.to_string(),
            "11 frames, 52800 audio frames in 0.50s, digest 0000000000000abc"
        );
    }
}

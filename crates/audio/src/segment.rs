//! Audio segments flattened from the timeline tree.

use cl_common::SourceId;
use cl_timeline_eval::{flatten, NodeId, TimelineEvalError, TimelineTree};

/// Stable identity of a segment across rebuilds: the leaf it comes from
/// and the audio file it plays.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId {
    pub node: NodeId,
    pub source: SourceId,
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node, self.source)
    }
}

/// A span of the timeline that plays audio from one source.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSegment {
    pub id: SegmentId,
    /// Absolute timeline start (ms).
    pub start: f64,
    /// Offset into the source at which the segment starts (ms).
    pub audio_start: f64,
    pub duration: f64,
    pub source: SourceId,
    /// Inside a disabled subtree; never scheduled.
    pub disabled: bool,
}

impl AudioSegment {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Half-open overlap with `[start, start + duration)`.
    pub fn overlaps(&self, start: f64, duration: f64) -> bool {
        self.start < start + duration && self.end() > start
    }
}

/// One segment per audio-capable leaf with an effective audio source, in
/// tree order.
pub fn build_segments(tree: &TimelineTree) -> Result<Vec<AudioSegment>, TimelineEvalError> {
    let mut segments = Vec::new();
    for resolved in flatten(tree)? {
        let Some(leaf) = tree.node(resolved.node)?.as_leaf() else {
            continue;
        };
        let Some(source) = leaf.effective_audio_source() else {
            continue;
        };
        segments.push(AudioSegment {
            id: SegmentId {
                node: resolved.node,
                source: source.clone(),
            },
            start: resolved.window.start,
            audio_start: leaf.media_start,
            duration: resolved.window.duration(),
            source,
            disabled: resolved.disabled,
        });
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_timeline_eval::{AudioSource, MediaKind, TimelineNode};

    fn segment(start: f64, duration: f64) -> AudioSegment {
        AudioSegment {
            id: SegmentId {
                node: NodeId(0),
                source: SourceId::new("a.mp4"),
            },
            start,
            audio_start: 0.0,
            duration,
            source: SourceId::new("a.mp4"),
            disabled: false,
        }
    }

    #[test]
    fn overlap_is_half_open() {
        assert!(segment(0.0, 1000.0).overlaps(400.0, 200.0));
        assert!(segment(500.0, 1000.0).overlaps(400.0, 200.0));
        assert!(!segment(2000.0, 500.0).overlaps(400.0, 200.0));
        assert!(!segment(600.0, 100.0).overlaps(400.0, 200.0));
        assert!(!segment(0.0, 400.0).overlaps(400.0, 200.0));
    }

    #[test]
    fn builds_from_nested_containers() {
        let mut tree = TimelineTree::with_end(10_000.0);
        let scene = tree.add_root(TimelineNode::container().with_start(1000.0).with_duration(4000.0));
        let clip = tree
            .add_child(scene, TimelineNode::video("a.mp4").with_start(2000.0).with_media_start(300.0))
            .unwrap();
        tree.add_child(
            scene,
            TimelineNode::leaf(MediaKind::Image, Some(SourceId::new("still.png"))),
        )
        .unwrap();
        tree.add_child(
            scene,
            TimelineNode::video("b.mp4").with_audio_source(AudioSource::Muted),
        )
        .unwrap();

        let segments = build_segments(&tree).unwrap();
        assert_eq!(segments.len(), 1);
        let seg = &segments[0];
        assert_eq!(seg.id.node, clip);
        assert_eq!(seg.start, 2000.0);
        // inherits the container's end
        assert_eq!(seg.end(), 5000.0);
        assert_eq!(seg.audio_start, 300.0);
        assert!(!seg.disabled);
    }

    #[test]
    fn alternate_audio_source_and_disabled_subtrees() {
        let mut tree = TimelineTree::with_end(3000.0);
        tree.add_root(
            TimelineNode::video("a.mp4").with_audio_source(AudioSource::Path("voice.m4a".into())),
        );
        let off = tree.add_root(TimelineNode::container().with_disabled(true));
        tree.add_child(off, TimelineNode::video("c.mp4")).unwrap();
        tree.add_root(TimelineNode::leaf(MediaKind::Audio, Some(SourceId::new("music.mp3"))));

        let segments = build_segments(&tree).unwrap();
        let sources: Vec<&str> = segments.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(sources, ["voice.m4a", "c.mp4", "music.mp3"]);
        assert!(segments[1].disabled);
        assert!(!segments[2].disabled);
    }
}

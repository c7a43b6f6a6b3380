//! Timeline data model: an arena of leaf and container nodes.
//!
//! Nodes are addressed by [`NodeId`]; containers hold their children's ids in
//! document order. There are no parent back-references: bounds flow down the
//! recursion as plain values (see [`crate::interval`]).

use std::fmt;

use cl_common::{Rational, Resolution, SourceId, TimeMs};
use serde::{Deserialize, Serialize};

use crate::error::TimelineEvalError;

/// Index of a node in its [`TimelineTree`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Media kind of a leaf, matching the `type` tag of the project document.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
    Title,
    Code,
    Demo,
    Subtitles,
    Support,
    Mouse,
}

impl MediaKind {
    pub fn from_type_name(name: &str) -> Option<Self> {
        Some(match name {
            "video" => Self::Video,
            "audio" => Self::Audio,
            "image" => Self::Image,
            "title" => Self::Title,
            "code" => Self::Code,
            "demo" => Self::Demo,
            "subtitles" => Self::Subtitles,
            "support" => Self::Support,
            "mouse" => Self::Mouse,
            _ => return None,
        })
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Title => "title",
            Self::Code => "code",
            Self::Demo => "demo",
            Self::Subtitles => "subtitles",
            Self::Support => "support",
            Self::Mouse => "mouse",
        }
    }

    /// Kinds that decode video frames through the frame cache.
    pub fn has_video(self) -> bool {
        matches!(self, Self::Video)
    }

    /// Kinds that contribute a segment to the audio timeline.
    pub fn has_audio(self) -> bool {
        matches!(self, Self::Video | Self::Audio)
    }
}

/// Where a leaf's audio comes from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AudioSource {
    /// Field omitted: use the leaf's primary source.
    #[default]
    Inherit,
    /// Explicit `null`: the leaf is silent.
    Muted,
    /// A separate audio file.
    Path(String),
}

/// A media leaf.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafNode {
    pub kind: MediaKind,
    pub source: Option<SourceId>,
    pub audio_source: AudioSource,
    /// Offset into the source media at which playback starts (ms).
    pub media_start: f64,
    /// Kind-specific fields the engine does not interpret (text, styles, ...).
    pub props: serde_json::Map<String, serde_json::Value>,
}

impl LeafNode {
    /// The audio file this leaf plays, if any.
    pub fn effective_audio_source(&self) -> Option<SourceId> {
        if !self.kind.has_audio() {
            return None;
        }
        match &self.audio_source {
            AudioSource::Inherit => self.source.clone(),
            AudioSource::Muted => None,
            AudioSource::Path(path) => Some(SourceId::new(path.as_str())),
        }
    }
}

/// Leaf or container payload of a node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Leaf(LeafNode),
    Container { children: Vec<NodeId> },
}

/// One entry of the timeline. Time attributes are milliseconds.
#[derive(Clone, Debug, PartialEq)]
pub struct TimelineNode {
    pub start: Option<f64>,
    pub duration: Option<f64>,
    pub end: Option<f64>,
    pub disabled: bool,
    pub kind: NodeKind,
}

impl TimelineNode {
    pub fn leaf(kind: MediaKind, source: impl Into<Option<SourceId>>) -> Self {
        Self::with_kind(NodeKind::Leaf(LeafNode {
            kind,
            source: source.into(),
            audio_source: AudioSource::Inherit,
            media_start: 0.0,
            props: serde_json::Map::new(),
        }))
    }

    pub fn video(source: &str) -> Self {
        Self::leaf(MediaKind::Video, Some(SourceId::new(source)))
    }

    pub fn container() -> Self {
        Self::with_kind(NodeKind::Container {
            children: Vec::new(),
        })
    }

    fn with_kind(kind: NodeKind) -> Self {
        Self {
            start: None,
            duration: None,
            end: None,
            disabled: false,
            kind,
        }
    }

    pub fn with_start(mut self, ms: f64) -> Self {
        self.start = Some(ms);
        self
    }

    pub fn with_duration(mut self, ms: f64) -> Self {
        self.duration = Some(ms);
        self
    }

    pub fn with_end(mut self, ms: f64) -> Self {
        self.end = Some(ms);
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_media_start(mut self, ms: f64) -> Self {
        if let NodeKind::Leaf(leaf) = &mut self.kind {
            leaf.media_start = ms;
        }
        self
    }

    pub fn with_audio_source(mut self, audio: AudioSource) -> Self {
        if let NodeKind::Leaf(leaf) = &mut self.kind {
            leaf.audio_source = audio;
        }
        self
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match &self.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            NodeKind::Container { .. } => None,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container { .. })
    }

    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Container { children } => children,
            NodeKind::Leaf(_) => &[],
        }
    }
}

/// Arena-backed timeline tree.
///
/// The root level behaves like an implicit container spanning
/// `[0, end)`; `end` is the project end when known.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimelineTree {
    nodes: Vec<TimelineNode>,
    roots: Vec<NodeId>,
    end: Option<f64>,
}

impl TimelineTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_end(end_ms: f64) -> Self {
        Self {
            end: Some(end_ms),
            ..Self::default()
        }
    }

    /// Append a node at the root level.
    pub fn add_root(&mut self, node: TimelineNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.roots.push(id);
        id
    }

    /// Append a node as the last child of `parent`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        node: TimelineNode,
    ) -> Result<NodeId, TimelineEvalError> {
        let id = NodeId(self.nodes.len());
        match self.nodes.get_mut(parent.0).map(|p| &mut p.kind) {
            Some(NodeKind::Container { children }) => children.push(id),
            Some(NodeKind::Leaf(_)) => return Err(TimelineEvalError::NotAContainer(parent)),
            None => return Err(TimelineEvalError::NodeNotFound(parent)),
        }
        self.nodes.push(node);
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&TimelineNode> {
        self.nodes.get(id.0)
    }

    pub fn node(&self, id: NodeId) -> Result<&TimelineNode, TimelineEvalError> {
        self.get(id).ok_or(TimelineEvalError::NodeNotFound(id))
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Root-level end bound, if the tree has one.
    pub fn end(&self) -> Option<f64> {
        self.end
    }

    pub fn set_end(&mut self, end_ms: Option<f64>) {
        self.end = end_ms;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in arena order with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TimelineNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }
}

/// A loaded project: output format plus the timeline tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    pub resolution: Resolution,
    pub fps: Rational,
    pub audio_sample_rate: u32,
    /// Export duration.
    pub end: TimeMs,
    pub tree: TimelineTree,
}

//! `cl-timeline-eval` — Timeline evaluation for the Clipline engine.
//!
//! This crate answers "what is on screen at time T". It handles:
//!
//! - **Time values**: clock-notation parsing and formatting
//! - **Interval resolution**: start/end/duration with parent inheritance
//! - **Activation**: the ordered set of nodes whose window contains T
//! - **Project loading**: JSON project documents into an arena tree
//!
//! # Usage
//!
//! ```rust
//! use cl_timeline_eval::{resolve, TimelineNode, TimelineTree};
//!
//! let mut tree = TimelineTree::with_end(10_000.0);
//! let clip = tree.add_root(TimelineNode::video("intro.mp4").with_start(1000.0).with_duration(500.0));
//! let active = resolve(&tree, 1200.0).unwrap();
//! assert!(active.contains(clip));
//! ```

pub mod error;
pub mod evaluator;
pub mod interval;
pub mod schema;
pub mod time;
pub mod types;

// Re-export primary API
pub use error::TimelineEvalError;
pub use evaluator::{
    flatten, media_time, resolve, timeline_duration, ActivationEntry, ActivationSet, ResolvedNode,
    MAX_NESTING_DEPTH,
};
pub use interval::{duration, end_time, resolve_window, start_time, ParentBounds, Window};
pub use time::{format_time, parse_time, parse_time_str, FormatTimeOptions, TimeValue};
pub use types::{
    AudioSource, LeafNode, MediaKind, NodeId, NodeKind, Project, TimelineNode, TimelineTree,
};

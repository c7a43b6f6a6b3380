//! Scene compositor seam.
//!
//! A [`SceneCompositor`] receives the resolved scene at one instant, the
//! activation set plus the frame currently displayed for each active video
//! node, and returns the composed RGBA pixels the export loop hands to the
//! muxer. Styling of titles, code and other kinds is the compositor's
//! business; the engine only guarantees the scene is complete.
//!
//! [`StackCompositor`] is a plain CPU implementation that stacks video
//! frames in document order.

use std::collections::HashMap;

use cl_common::{Resolution, TimeMs, VideoFrame};
use cl_timeline_eval::{ActivationSet, NodeId};
use tracing::trace;

use crate::error::CompositorError;

/// Everything needed to draw one output frame.
#[derive(Clone, Copy, Debug)]
pub struct Scene<'a> {
    pub time: TimeMs,
    pub resolution: Resolution,
    pub activation: &'a ActivationSet,
    /// Frame displayed for each active video node. Nodes whose first decode
    /// has not succeeded yet are absent.
    pub frames: &'a HashMap<NodeId, VideoFrame>,
}

/// Composed output frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ComposedFrame {
    pub resolution: Resolution,
    /// RGBA8 pixels, row-major.
    pub pixels: Vec<u8>,
}

/// Draws scenes into pixel buffers.
pub trait SceneCompositor: Send {
    fn compose(&mut self, scene: &Scene<'_>) -> Result<ComposedFrame, CompositorError>;

    /// Block until any compositor-owned animation state has caught up with
    /// the last scene.
    fn settle(&mut self) -> Result<(), CompositorError> {
        Ok(())
    }
}

/// CPU compositor: opaque black background, then every active video frame
/// stretched to the output and alpha-blended over it, bottom to top in
/// document order.
#[derive(Debug, Default)]
pub struct StackCompositor {
    scratch: Vec<u8>,
}

impl StackCompositor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SceneCompositor for StackCompositor {
    fn compose(&mut self, scene: &Scene<'_>) -> Result<ComposedFrame, CompositorError> {
        let Resolution { width, height } = scene.resolution;
        if width == 0 || height == 0 {
            return Err(CompositorError::InvalidResolution { width, height });
        }

        self.scratch.clear();
        self.scratch.resize(scene.resolution.rgba_byte_size(), 0);
        for pixel in self.scratch.chunks_exact_mut(4) {
            pixel[3] = 255;
        }

        let mut layers = 0usize;
        for entry in scene.activation.leaves() {
            let Some(frame) = scene.frames.get(&entry.node) else {
                continue;
            };
            if !draw_stretched(&mut self.scratch, scene.resolution, frame) {
                return Err(CompositorError::Failed {
                    time: scene.time,
                    reason: format!(
                        "frame for node {} has {} bytes, expected {}",
                        entry.node,
                        frame.data.len(),
                        frame.resolution.rgba_byte_size()
                    ),
                });
            }
            layers += 1;
        }
        trace!(time = %scene.time, layers, "Composed scene");

        Ok(ComposedFrame {
            resolution: scene.resolution,
            pixels: self.scratch.clone(),
        })
    }
}

/// Nearest-neighbor stretch of `frame` over `output` with source-over
/// blending. Returns false if the frame's buffer does not match its size.
fn draw_stretched(output: &mut [u8], out_res: Resolution, frame: &VideoFrame) -> bool {
    let src_res = frame.resolution;
    if src_res.width == 0 || src_res.height == 0 {
        return true;
    }
    if frame.data.len() != src_res.rgba_byte_size() {
        return false;
    }

    let (ow, oh) = (out_res.width as usize, out_res.height as usize);
    let (sw, sh) = (src_res.width as usize, src_res.height as usize);
    for y in 0..oh {
        let sy = y * sh / oh;
        for x in 0..ow {
            let sx = x * sw / ow;
            let s = (sy * sw + sx) * 4;
            let d = (y * ow + x) * 4;
            blend_over(&mut output[d..d + 4], &frame.data[s..s + 4]);
        }
    }
    true
}

fn blend_over(dst: &mut [u8], src: &[u8]) {
    let alpha = src[3] as u32;
    if alpha == 255 {
        dst.copy_from_slice(src);
        return;
    }
    let inv = 255 - alpha;
    for c in 0..3 {
        dst[c] = ((src[c] as u32 * alpha + dst[c] as u32 * inv + 127) / 255) as u8;
    }
    dst[3] = (alpha + dst[3] as u32 * inv / 255).min(255) as u8;
}

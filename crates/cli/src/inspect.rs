//! Read-only project inspection: activation, duration, audio segments and
//! time formatting.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use cl_audio::build_segments;
use cl_timeline_eval::{
    format_time, media_time, parse_time_str, resolve, timeline_duration, FormatTimeOptions,
    Project,
};
use serde_json::json;

const CLOCK: FormatTimeOptions = FormatTimeOptions {
    force_minutes: true,
    force_seconds: true,
    milli_decimal_places: Some(3),
};

pub fn load_project(path: &Path) -> Result<Project> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read project {}", path.display()))?;
    Project::from_json(&json).with_context(|| format!("Invalid project {}", path.display()))
}

/// Plain numbers are milliseconds; anything else is clock notation.
pub fn parse_time_arg(text: &str) -> Result<f64> {
    if let Ok(ms) = text.trim().parse::<f64>() {
        return Ok(ms);
    }
    parse_time_str(text).with_context(|| format!("Invalid time {text:?}"))
}

pub fn format_time_arg(text: &str, options: &FormatTimeOptions) -> Result<String> {
    Ok(format_time(parse_time_arg(text)?, options))
}

/// Active nodes at `at`, containers before their children.
pub fn describe_activation(project: &Project, at: f64, as_json: bool) -> Result<String> {
    let activation = resolve(&project.tree, at)?;

    let mut rows = Vec::with_capacity(activation.len());
    for entry in activation.iter() {
        let node = project.tree.node(entry.node)?;
        let leaf = node.as_leaf();
        rows.push(json!({
            "node": entry.node.0,
            "type": leaf.map_or("container", |l| l.kind.type_name()),
            "depth": entry.depth,
            "start": entry.absolute_start,
            "end": entry.absolute_end,
            "localTime": entry.local_time,
            "mediaTime": leaf.map(|l| media_time(entry, l)),
            "source": leaf.and_then(|l| l.source.as_ref()).map(|s| s.as_str()),
        }));
    }

    if as_json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&rows)?));
    }

    let mut out = String::new();
    if rows.is_empty() {
        writeln!(out, "nothing active at {}", format_time(at, &CLOCK))?;
    }
    for row in &rows {
        let depth = row["depth"].as_u64().unwrap_or(0) as usize;
        write!(
            out,
            "{:indent$}#{} {} [{}, {})",
            "",
            row["node"],
            row["type"].as_str().unwrap_or("?"),
            format_time(row["start"].as_f64().unwrap_or(0.0), &CLOCK),
            format_time(row["end"].as_f64().unwrap_or(0.0), &CLOCK),
            indent = depth * 2
        )?;
        if let Some(source) = row["source"].as_str() {
            write!(out, " {source}")?;
        }
        if let Some(media) = row["mediaTime"].as_f64() {
            write!(out, " @ {}", format_time(media, &CLOCK))?;
        }
        writeln!(out)?;
    }
    Ok(out)
}

pub fn describe_duration(project: &Project) -> Result<String> {
    let ms = timeline_duration(&project.tree)?;
    Ok(format!(
        "{} ({} ms, project end {} ms, {} frames at {} fps)",
        format_time(ms, &CLOCK),
        ms,
        project.end.as_millis(),
        (project.end.as_millis() / project.fps.frame_interval().as_millis() + 1e-9).floor() as u64
            + 1,
        project.fps
    ))
}

pub fn describe_segments(project: &Project, as_json: bool) -> Result<String> {
    let segments = build_segments(&project.tree)?;
    if as_json {
        let rows: Vec<_> = segments
            .iter()
            .map(|s| {
                json!({
                    "id": s.id.to_string(),
                    "source": s.source.as_str(),
                    "start": s.start,
                    "end": s.end(),
                    "audioStart": s.audio_start,
                    "disabled": s.disabled,
                })
            })
            .collect();
        return Ok(format!("{}\n", serde_json::to_string_pretty(&rows)?));
    }

    let mut out = String::new();
    for s in &segments {
        writeln!(
            out,
            "{:<8} {:>12} {:>12} {:>12}  {}{}",
            s.id.to_string(),
            format_time(s.start, &CLOCK),
            format_time(s.end(), &CLOCK),
            format_time(s.audio_start, &CLOCK),
            s.source,
            if s.disabled { " (disabled)" } else { "" }
        )?;
    }
    if segments.is_empty() {
        writeln!(out, "no audio segments")?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"{
        "width": 640, "height": 360, "fps": 25, "end": "0:04",
        "childrenTimeline": [
            { "type": "container", "start": 1000, "duration": 2000, "childrenTimeline": [
                { "type": "video", "source": "clip.mp4", "videoStart": 500 }
            ]},
            { "type": "audio", "source": "music.mp3", "duration": 3000 },
            { "type": "title", "text": "Hi", "start": 3000, "disabled": true }
        ]
    }"#;

    fn project() -> Project {
        Project::from_json(PROJECT).unwrap()
    }

    // ── Time arguments ──

    #[test]
    fn numbers_are_milliseconds() {
        assert_eq!(parse_time_arg("1500").unwrap(), 1500.0);
        assert_eq!(parse_time_arg("1:02.5").unwrap(), 62_500.0);
        assert!(parse_time_arg("soon").is_err());
    }

    #[test]
    fn formats_with_forced_fields() {
        assert_eq!(format_time_arg("0:01:02.500", &CLOCK).unwrap(), "01:02.500");
    }

    // ── Activation ──

    #[test]
    fn activation_lists_nested_leaf_with_media_time() {
        let out = describe_activation(&project(), 1500.0, false).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("#0 container"));
        assert!(lines[1].starts_with("  #1 video"));
        assert!(lines[1].ends_with("clip.mp4 @ 00:01.000"));
        assert!(lines[2].starts_with("#2 audio"));
    }

    #[test]
    fn activation_json_has_every_entry() {
        let out = describe_activation(&project(), 3500.0, true).unwrap();
        let rows: serde_json::Value = serde_json::from_str(&out).unwrap();
        // Only the disabled title would start here.
        assert_eq!(rows.as_array().unwrap().len(), 0);
    }

    #[test]
    fn empty_activation_says_so() {
        let out = describe_activation(&project(), 3999.0, false).unwrap();
        assert!(out.starts_with("nothing active"));
    }

    // ── Duration and segments ──

    #[test]
    fn duration_uses_enabled_roots() {
        let out = describe_duration(&project()).unwrap();
        assert!(out.starts_with("00:03.000 (3000 ms"), "{out}");
        assert!(out.contains("101 frames at 25 fps"), "{out}");
    }

    #[test]
    fn segments_cover_video_and_audio() {
        let out = describe_segments(&project(), true).unwrap();
        let rows: serde_json::Value = serde_json::from_str(&out).unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["source"], "clip.mp4");
        assert_eq!(rows[0]["start"], 1000.0);
        assert_eq!(rows[0]["audioStart"], 500.0);
        assert_eq!(rows[1]["source"], "music.mp3");
    }
}

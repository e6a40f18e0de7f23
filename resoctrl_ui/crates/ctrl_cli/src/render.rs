use ctrl_core::view::SessionView;
use std::fmt::Write;

pub fn render(view: &SessionView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", view.status_line());

    let Some(name) = view.composition_name() else {
        return out;
    };
    let preview = match &view.preview {
        Some(p) => format!("preview {} ({} bytes)", p.uri(), p.len()),
        None => "no preview".to_string(),
    };
    let clips = view.composition.as_deref().map_or(0, |c| c.clip_count());
    let _ = writeln!(
        out,
        "{name}  [{} columns, {clips} clips, {preview}]",
        view.column_count()
    );

    for row in view.rows() {
        let _ = write!(
            out,
            "{:>2}. {:<16} {:>3}% |",
            row.index + 1,
            row.name,
            row.opacity_percent()
        );
        if row.clips.is_empty() {
            out.push_str(" no clips in this layer\n");
            continue;
        }
        for clip in &row.clips {
            let marker = if clip.active { '*' } else { ' ' };
            let thumb = if clip.thumbnail_uri.is_some() { "" } else { " (no thumb)" };
            let _ = write!(out, " {}{marker}{}{thumb} |", clip.index + 1, clip.name);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrl_core::protocol::{Clip, Composition, Layer};
    use ctrl_core::settings::ConnectionSettings;
    use ctrl_core::view::LinkState;
    use std::sync::Arc;

    #[test]
    fn renders_rows_with_active_marker() {
        let view = SessionView {
            link: LinkState::Connected,
            composition: Some(Arc::new(Composition {
                name: "Gig".to_string(),
                layers: vec![Layer {
                    id: 1,
                    name: String::new(),
                    opacity: 0.5,
                    connected: None,
                    clips: vec![
                        Clip {
                            id: 2,
                            name: "Intro".to_string(),
                            connected: true,
                            position: None,
                        },
                        Clip {
                            id: 3,
                            name: "Loop".to_string(),
                            connected: false,
                            position: None,
                        },
                    ],
                }],
            })),
            ..SessionView::default()
        };
        let text = render(&view);
        assert!(text.starts_with("== Connected =="));
        assert!(text.contains("Gig  [2 columns, 2 clips, no preview]"));
        assert!(text.contains(" 1. Layer 1"));
        assert!(text.contains(" 50% |"));
        assert!(text.contains(" 1*Intro (no thumb) |"));
        assert!(text.contains(" 2 Loop (no thumb) |"));
    }

    #[test]
    fn empty_layer_shows_placeholder() {
        let view = SessionView {
            link: LinkState::Connected,
            composition: Some(Arc::new(Composition {
                name: "Gig".to_string(),
                layers: vec![Layer {
                    id: 4,
                    name: "Backdrop".to_string(),
                    opacity: 1.0,
                    connected: None,
                    clips: vec![],
                }],
            })),
            ..SessionView::default()
        };
        let text = render(&view);
        assert!(text.contains("Gig  [0 columns, 0 clips, no preview]"));
        assert!(text.contains(" 1. Backdrop         100% | no clips in this layer\n"));
    }

    #[test]
    fn disconnected_without_composition_shows_status_only() {
        let view = SessionView {
            settings: ConnectionSettings::new("192.168.1.20", 8080),
            link: LinkState::Disconnected,
            ..SessionView::default()
        };
        assert_eq!(
            render(&view),
            "== Attempting connection to 192.168.1.20:8080... ==\n"
        );
    }
}

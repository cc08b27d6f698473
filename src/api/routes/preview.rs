//! Social preview card for shared links.
//!
//! `GET /preview-image?word=&era=` renders a 1200x630 SVG naming the word
//! and the era, suitable for `og:image` tags.

use std::fmt::Write as _;

use axum::extract::Query;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 630;
const MAX_WORD_CHARS: usize = 100;
const DEFAULT_TITLE: &str = "Etymology Explainer";
const DEFAULT_ERA_LABEL: &str = "History";

#[derive(Debug, Default, Deserialize)]
pub struct PreviewParams {
    pub word: Option<String>,
    pub era: Option<String>,
}

impl PreviewParams {
    /// Text shown in the headline. An explicitly empty `word` stays empty.
    fn headline(&self) -> String {
        match &self.word {
            Some(word) => word.chars().take(MAX_WORD_CHARS).collect(),
            None => DEFAULT_TITLE.to_string(),
        }
    }

    fn era_label(&self) -> &str {
        match self.era.as_deref() {
            Some(era) if !era.is_empty() => era,
            _ => DEFAULT_ERA_LABEL,
        }
    }
}

pub async fn get_preview_image(Query(params): Query<PreviewParams>) -> Response {
    match render_preview_svg(&params.headline(), params.era_label()) {
        Ok(svg) => (
            [
                (header::CONTENT_TYPE, "image/svg+xml"),
                (header::CACHE_CONTROL, "public, max-age=86400"),
            ],
            svg,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render preview image");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate the image").into_response()
        }
    }
}

/// Upper-case the first letter of every whitespace-separated word.
fn capitalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if at_word_start && !c.is_whitespace() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    out
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Render the preview card.
pub fn render_preview_svg(word: &str, era: &str) -> Result<String, std::fmt::Error> {
    let word = xml_escape(&capitalize(word));
    let era = xml_escape(era);
    let mut svg = String::with_capacity(2048);

    writeln!(
        svg,
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"##
    )?;
    writeln!(
        svg,
        r##"  <defs>
    <linearGradient id="bg" x1="0" y1="0" x2="1" y2="1">
      <stop offset="0%" stop-color="#0a0a0a"/>
      <stop offset="100%" stop-color="#171717"/>
    </linearGradient>
    <linearGradient id="headline" x1="0" y1="0" x2="1" y2="1">
      <stop offset="0%" stop-color="#ffffff"/>
      <stop offset="100%" stop-color="#a3a3a3"/>
    </linearGradient>
  </defs>"##
    )?;
    writeln!(svg, r##"  <rect width="100%" height="100%" fill="url(#bg)"/>"##)?;
    writeln!(
        svg,
        r##"  <rect x="150" y="145" width="900" height="340" rx="20" fill="rgba(23,23,23,0.5)" stroke="#404040"/>"##
    )?;
    writeln!(
        svg,
        r##"  <text x="600" y="215" text-anchor="middle" font-family="sans-serif" font-size="24" font-weight="600" fill="#818cf8">{DEFAULT_TITLE}</text>"##
    )?;
    writeln!(
        svg,
        r##"  <text x="600" y="330" text-anchor="middle" font-family="sans-serif" font-size="80" font-weight="900" fill="url(#headline)">{word}</text>"##
    )?;
    writeln!(
        svg,
        r##"  <text x="600" y="420" text-anchor="middle" font-family="sans-serif" font-size="30" fill="#a3a3a3">Time Capsule: <tspan fill="#818cf8" dx="8">{era}</tspan></text>"##
    )?;
    write!(svg, "</svg>")?;
    Ok(svg)
}

//! Colour and font harvesting from raw CSS text.

use std::sync::LazyLock;

use regex::Regex;

use super::{ColourPalette, FontAsset, FontSource};

const PALETTE_SLOTS: usize = 5;

static RE_COLOUR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#[0-9a-fA-F]{3,6}|rgba?\([^)]+\)|hsla?\([^)]+\)").expect("valid colour regex")
});
static RE_FONT_FACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@font-face\s*\{[^}]*\}").expect("valid font-face regex"));
static RE_FONT_FAMILY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"font-family:\s*['"]([^'"]+)['"]"#).expect("valid font-family regex")
});
static RE_FONT_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"src:\s*url\(['"]?([^'")]+)['"]?\)"#).expect("valid src regex"));
static RE_FONT_WEIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"font-weight:\s*([^;}\s]+)").expect("valid weight regex"));
static RE_FONT_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"font-style:\s*([^;}\s]+)").expect("valid style regex"));
static RE_GOOGLE_FAMILY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"family=([^&]+)").expect("valid google family regex"));

/// Every colour literal in `css`, in order of appearance.
pub fn extract_colours(css: &str) -> Vec<String> {
    RE_COLOUR
        .find_iter(css)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Buckets colours by loose lightness and brand heuristics.
pub fn categorise(colours: Vec<String>) -> ColourPalette {
    let mut palette = ColourPalette::default();
    for colour in &colours {
        let lower = colour.to_lowercase();
        let bucket = if contains_any(&lower, &["fff", "white", "f5f5f5", "fafafa"]) {
            &mut palette.background
        } else if contains_any(&lower, &["000", "333", "666", "999"]) {
            &mut palette.text
        } else if contains_any(&lower, &["007", "006", "005", "004"]) {
            &mut palette.primary
        } else if contains_any(&lower, &["28a745", "ffc107", "dc3545", "6c757d"]) {
            &mut palette.secondary
        } else {
            &mut palette.accent
        };
        if bucket.len() < PALETTE_SLOTS {
            bucket.push(colour.clone());
        }
    }
    palette.all = colours;
    palette
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Self-hosted fonts declared through `@font-face` rules.
pub fn font_faces(css: &str) -> Vec<FontAsset> {
    RE_FONT_FACE
        .find_iter(css)
        .filter_map(|rule| {
            let rule = rule.as_str();
            let family = RE_FONT_FAMILY.captures(rule)?[1].to_string();
            let url = RE_FONT_SRC.captures(rule)?[1].to_string();
            let filename = url
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('/').next())
                .filter(|name| !name.is_empty())
                .map(str::to_string);
            Some(FontAsset {
                family,
                weight: RE_FONT_WEIGHT.captures(rule).map(|c| c[1].to_string()),
                style: RE_FONT_STYLE.captures(rule).map(|c| c[1].to_string()),
                source: FontSource::SelfHosted,
                url: Some(url),
                filename,
            })
        })
        .collect()
}

/// First family named in a Google Fonts stylesheet URL.
pub fn google_font_family(url: &str) -> Option<String> {
    let raw = RE_GOOGLE_FAMILY.captures(url)?.get(1)?.as_str();
    let family = raw.split(':').next()?.replace('+', " ");
    let family = url::form_urlencoded::parse(format!("f={family}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or(family);
    (!family.is_empty()).then_some(family)
}

/// Splits a `font-family` declaration value into family names.
pub fn font_family_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|family| family.trim().replace(['\'', '"'], ""))
        .filter(|family| !family.is_empty())
        .collect()
}

//! Brand asset harvesting from a mirrored site.
//!
//! Extraction is a pure function of the mirror directory and the original
//! target URL: it locates the entry document, parses it once, and reads any
//! stylesheets it links that exist locally.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use scraper::Html;
use serde::Serialize;
use tracing::*;
use walkdir::WalkDir;

use crate::ExtractionError;

pub mod css;
pub mod html;

const INDEX_CANDIDATES: [&str; 4] = ["index.html", "index.htm", "default.html", "default.htm"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandAssets {
    pub logos: Vec<LogoAsset>,
    pub colours: ColourPalette,
    pub fonts: Vec<FontAsset>,
    pub layout: LayoutStructure,
    pub metadata: SiteMetadata,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogoKind {
    Header,
    Footer,
    Favicon,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoAsset {
    #[serde(rename = "type")]
    pub kind: LogoKind,
    pub src: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub filename: String,
    pub local_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColourPalette {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
    pub background: Vec<String>,
    pub text: Vec<String>,
    pub accent: Vec<String>,
    pub all: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontSource {
    Google,
    SelfHosted,
    System,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FontAsset {
    pub family: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub source: FontSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Reference to the element that matched a layout region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementInfo {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub selector: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutStructure {
    pub header: Option<ElementInfo>,
    pub footer: Option<ElementInfo>,
    pub navigation: Option<ElementInfo>,
    pub main_content: Option<ElementInfo>,
    pub sidebar: Option<ElementInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteMetadata {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_color: Option<String>,
}

/// Turns a mirror directory into a brand asset bundle.
///
/// Implementations are synchronous and may block on file I/O; callers run
/// them on the blocking pool.
pub trait AssetExtractor: Send + Sync {
    fn extract(&self, output_dir: &Path, target_url: &str) -> Result<BrandAssets, ExtractionError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlAssetExtractor;

impl AssetExtractor for HtmlAssetExtractor {
    fn extract(&self, output_dir: &Path, target_url: &str) -> Result<BrandAssets, ExtractionError> {
        extract_assets(output_dir, target_url)
    }
}

#[instrument(skip_all, fields(output_dir = %output_dir.display()))]
pub fn extract_assets(output_dir: &Path, target_url: &str) -> Result<BrandAssets, ExtractionError> {
    let index = find_index_file(output_dir)
        .ok_or_else(|| ExtractionError::NoEntryDocument(output_dir.to_path_buf()))?;
    debug!(index = %index.display(), "Parsing entry document");

    let source = std::fs::read_to_string(&index)?;
    let document = Html::parse_document(&source);
    let base_dir = index.parent().unwrap_or(output_dir);
    let cx = html::DocumentContext {
        base_dir,
        download_root: output_dir,
        base_url: target_url,
    };

    let stylesheets = html::local_stylesheets(&document, &cx)
        .into_iter()
        .filter_map(|path| match std::fs::read_to_string(&path) {
            Ok(sheet) => Some(sheet),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Skipping unreadable stylesheet");
                None
            }
        })
        .collect::<Vec<_>>();

    let logos = html::extract_logos(&document, &cx);
    let colours = extract_colours(&document, &stylesheets);
    let fonts = extract_fonts(&document, &stylesheets);
    let layout = html::extract_layout(&document);
    let metadata = html::extract_metadata(&document);

    info!(
        logos = logos.len(),
        colours = colours.all.len(),
        fonts = fonts.len(),
        "Extracted brand assets"
    );

    Ok(BrandAssets {
        logos,
        colours,
        fonts,
        layout,
        metadata,
        extracted_at: Utc::now(),
    })
}

fn extract_colours(document: &Html, stylesheets: &[String]) -> ColourPalette {
    let mut seen = HashSet::new();
    let colours = html::inline_css(document)
        .iter()
        .chain(stylesheets)
        .flat_map(|sheet| css::extract_colours(sheet))
        .filter(|colour| seen.insert(colour.clone()))
        .collect();
    css::categorise(colours)
}

fn extract_fonts(document: &Html, stylesheets: &[String]) -> Vec<FontAsset> {
    let mut fonts: Vec<FontAsset> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut insert = |font: FontAsset, replace: bool| match index.get(&font.family) {
        Some(&at) if replace => fonts[at] = font,
        Some(_) => {}
        None => {
            index.insert(font.family.clone(), fonts.len());
            fonts.push(font);
        }
    };

    for font in html::google_fonts(document) {
        insert(font, true);
    }
    for sheet in html::style_blocks(document).iter().chain(stylesheets) {
        for font in css::font_faces(sheet) {
            insert(font, true);
        }
    }
    for family in html::body_font_families(document) {
        insert(
            FontAsset {
                family,
                weight: None,
                style: None,
                source: FontSource::System,
                url: None,
                filename: None,
            },
            false,
        );
    }

    fonts
}

/// The mirror's entry document: a well-known name at the root, otherwise the
/// first `index.htm(l)` found walking the tree.
pub fn find_index_file(output_dir: &Path) -> Option<PathBuf> {
    INDEX_CANDIDATES
        .iter()
        .map(|name| output_dir.join(name))
        .find(|path| path.is_file())
        .or_else(|| {
            WalkDir::new(output_dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .find(|entry| {
                    let name = entry.file_name().to_string_lossy().to_lowercase();
                    name == "index.html" || name == "index.htm"
                })
                .map(|entry| entry.into_path())
        })
}

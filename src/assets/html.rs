//! DOM heuristics over the parsed entry document.

use std::{
    collections::HashSet,
    path::{Component, Path, PathBuf},
    sync::LazyLock,
};

use scraper::{ElementRef, Html, Selector};

use super::{css, ElementInfo, FontAsset, FontSource, LayoutStructure, LogoAsset, LogoKind, SiteMetadata};

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector parses")
}

static FAVICON: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"link[rel="icon"], link[rel="shortcut icon"]"#));
static LOGO_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        r#"header img[src*="logo"], header img[alt*="logo"], header img[alt*="Logo"]"#,
        r#"footer img[src*="logo"], footer img[alt*="logo"], footer img[alt*="Logo"]"#,
        r#".logo img, #logo img, [class*="logo"] img"#,
        r#"img[src*="logo"], img[alt*="logo"], img[alt*="Logo"]"#,
    ]
    .into_iter()
    .map(selector)
    .collect()
});
static STYLED: LazyLock<Selector> = LazyLock::new(|| selector("[style]"));
static STYLE_TAGS: LazyLock<Selector> = LazyLock::new(|| selector("style"));
static STYLESHEETS: LazyLock<Selector> = LazyLock::new(|| selector(r#"link[rel="stylesheet"]"#));
static GOOGLE_FONTS: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"link[href*="fonts.googleapis.com"]"#));
static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static FONT_FAMILY_DECL: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"font-family:\s*([^;]+)").expect("valid font-family decl regex")
});

/// Where a mirrored document lives, used to map references to local files.
pub struct DocumentContext<'a> {
    /// Directory of the entry document.
    pub base_dir: &'a Path,
    /// Root of the whole mirror.
    pub download_root: &'a Path,
    /// Original target URL of the crawl.
    pub base_url: &'a str,
}

impl DocumentContext<'_> {
    /// Maps a document reference to a path inside the mirror, if it points there.
    pub fn resolve_local_path(&self, reference: &str) -> Option<PathBuf> {
        let reference = reference.split(['?', '#']).next()?.trim();
        if reference.is_empty() || reference.starts_with("data:") {
            return None;
        }

        let base = self.base_url.trim_end_matches('/');
        let (root, relative) = if let Some(rest) = reference.strip_prefix(base) {
            (self.download_root, rest.trim_start_matches('/'))
        } else if reference.starts_with("http://")
            || reference.starts_with("https://")
            || reference.starts_with("//")
        {
            return None;
        } else if let Some(rest) = reference.strip_prefix('/') {
            (self.download_root, rest)
        } else {
            (self.base_dir, reference)
        };

        let path = normalize(&root.join(relative));
        path.starts_with(self.download_root).then_some(path)
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn extract_logos(document: &Html, cx: &DocumentContext<'_>) -> Vec<LogoAsset> {
    let mut logos = Vec::new();

    if let Some(href) = document
        .select(&FAVICON)
        .find_map(|link| link.value().attr("href"))
    {
        if let Some(path) = cx.resolve_local_path(href).filter(|path| path.is_file()) {
            logos.push(LogoAsset {
                kind: LogoKind::Favicon,
                src: href.to_string(),
                alt: None,
                width: None,
                height: None,
                filename: file_name(&path),
                local_path: path.display().to_string(),
            });
        }
    }

    for selector in LOGO_SELECTORS.iter() {
        for img in document.select(selector) {
            let Some(src) = img.value().attr("src") else {
                continue;
            };
            let Some(path) = cx.resolve_local_path(src).filter(|path| path.is_file()) else {
                continue;
            };
            logos.push(LogoAsset {
                kind: logo_kind(&img),
                src: src.to_string(),
                alt: img.value().attr("alt").filter(|alt| !alt.is_empty()).map(str::to_string),
                width: dimension(&img, "width"),
                height: dimension(&img, "height"),
                filename: file_name(&path),
                local_path: path.display().to_string(),
            });
        }
    }

    let mut seen = HashSet::new();
    logos.retain(|logo| seen.insert(logo.local_path.clone()));
    logos
}

fn logo_kind(img: &ElementRef<'_>) -> LogoKind {
    img.ancestors()
        .filter_map(ElementRef::wrap)
        .find_map(|el| match el.value().name() {
            "header" => Some(LogoKind::Header),
            "footer" => Some(LogoKind::Footer),
            _ => None,
        })
        .unwrap_or(LogoKind::Other)
}

fn dimension(img: &ElementRef<'_>, attr: &str) -> Option<u32> {
    img.value()
        .attr(attr)
        .and_then(|value| value.trim().trim_end_matches("px").parse().ok())
        .filter(|value| *value > 0)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Inline style attributes and `<style>` blocks, in document order.
pub fn inline_css(document: &Html) -> Vec<String> {
    document
        .select(&STYLED)
        .filter_map(|el| el.value().attr("style").map(str::to_string))
        .chain(document.select(&STYLE_TAGS).map(|el| el.text().collect()))
        .collect()
}

/// Contents of `<style>` blocks only.
pub fn style_blocks(document: &Html) -> Vec<String> {
    document
        .select(&STYLE_TAGS)
        .map(|el| el.text().collect())
        .collect()
}

/// Linked stylesheets that exist inside the mirror.
pub fn local_stylesheets(document: &Html, cx: &DocumentContext<'_>) -> Vec<PathBuf> {
    document
        .select(&STYLESHEETS)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| cx.resolve_local_path(href))
        .filter(|path| path.is_file())
        .collect()
}

pub fn google_fonts(document: &Html) -> Vec<FontAsset> {
    document
        .select(&GOOGLE_FONTS)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| {
            css::google_font_family(href).map(|family| FontAsset {
                family,
                weight: None,
                style: None,
                source: FontSource::Google,
                url: Some(href.to_string()),
                filename: None,
            })
        })
        .collect()
}

/// Families named in the body's own `style` attribute.
pub fn body_font_families(document: &Html) -> Vec<String> {
    document
        .select(&BODY)
        .next()
        .and_then(|body| body.value().attr("style"))
        .and_then(|style| FONT_FAMILY_DECL.captures(style))
        .map(|caps| css::font_family_list(&caps[1]))
        .unwrap_or_default()
}

const HEADER: &[&str] = &["header", ".header", "#header"];
const FOOTER: &[&str] = &["footer", ".footer", "#footer"];
const NAVIGATION: &[&str] = &["nav", ".nav", "#nav", ".navigation", "#navigation"];
const MAIN_CONTENT: &[&str] = &["main", ".main", "#main", ".content", "#content"];
const SIDEBAR: &[&str] = &["aside", ".sidebar", "#sidebar"];

pub fn extract_layout(document: &Html) -> LayoutStructure {
    LayoutStructure {
        header: first_match(document, HEADER),
        footer: first_match(document, FOOTER),
        navigation: first_match(document, NAVIGATION),
        main_content: first_match(document, MAIN_CONTENT),
        sidebar: first_match(document, SIDEBAR),
    }
}

fn first_match(document: &Html, candidates: &[&str]) -> Option<ElementInfo> {
    candidates.iter().find_map(|candidate| {
        let element = document.select(&selector(candidate)).next()?;
        let value = element.value();
        Some(ElementInfo {
            tag: value.name().to_string(),
            id: value.id().map(str::to_string),
            classes: value.classes().map(str::to_string).collect(),
            selector: candidate.to_string(),
        })
    })
}

pub fn extract_metadata(document: &Html) -> SiteMetadata {
    let meta = |name: &str| {
        let selector = selector(&format!(r#"meta[name="{name}"]"#));
        document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(str::to_string)
    };

    SiteMetadata {
        title: document
            .select(&TITLE)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default(),
        description: meta("description"),
        keywords: meta("keywords").map(|keywords| {
            keywords
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        }),
        viewport: meta("viewport"),
        theme_color: meta("theme-color"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<!doctype html>
<html><head>
  <title> Acme Corp </title>
  <meta name="description" content="Widgets for everyone">
  <meta name="keywords" content="widgets, acme , ">
  <meta name="theme-color" content="#0055aa">
</head>
<body style="font-family: 'Inter', Arial, sans-serif">
  <header class="site-header top" id="top"><img src="img/logo.png" alt="Acme Logo" width="120" height="40px"></header>
  <nav class="navigation"></nav>
  <div id="content"></div>
  <footer><img src="img/logo-small.png" alt="logo"></footer>
</body></html>"##;

    #[test]
    fn reads_metadata() {
        let metadata = extract_metadata(&Html::parse_document(PAGE));
        assert_eq!(metadata.title, "Acme Corp");
        assert_eq!(metadata.description.as_deref(), Some("Widgets for everyone"));
        assert_eq!(
            metadata.keywords,
            Some(vec!["widgets".to_string(), "acme".to_string()])
        );
        assert_eq!(metadata.theme_color.as_deref(), Some("#0055aa"));
        assert_eq!(metadata.viewport, None);
    }

    #[test]
    fn finds_layout_regions() {
        let layout = extract_layout(&Html::parse_document(PAGE));
        let header = layout.header.unwrap();
        assert_eq!(header.tag, "header");
        assert_eq!(header.id.as_deref(), Some("top"));
        assert!(header.classes.contains(&"site-header".to_string()));

        assert_eq!(layout.navigation.unwrap().selector, ".navigation");
        assert_eq!(layout.main_content.unwrap().selector, "#content");
        assert!(layout.footer.is_some());
        assert!(layout.sidebar.is_none());
    }

    #[test]
    fn reads_body_fonts() {
        assert_eq!(
            body_font_families(&Html::parse_document(PAGE)),
            vec!["Inter", "Arial", "sans-serif"]
        );
    }

    #[test]
    fn resolves_references_inside_the_mirror_only() {
        let root = Path::new("/mirror");
        let cx = DocumentContext {
            base_dir: &root.join("example.com"),
            download_root: root,
            base_url: "https://example.com",
        };
        assert_eq!(
            cx.resolve_local_path("img/logo.png?v=1"),
            Some(PathBuf::from("/mirror/example.com/img/logo.png"))
        );
        assert_eq!(
            cx.resolve_local_path("https://example.com/a/b.png"),
            Some(PathBuf::from("/mirror/a/b.png"))
        );
        assert_eq!(cx.resolve_local_path("https://cdn.other.net/x.png"), None);
        assert_eq!(cx.resolve_local_path("../../etc/passwd"), None);
        assert_eq!(cx.resolve_local_path("data:image/png;base64,AAAA"), None);
    }
}

//! Reference extraction and offline rewriting for HTML and CSS.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use scraper::{Html, Selector};
use url::Url;

use super::ResourceKind;

const INDEX: &str = "index.html";

static CSS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]*))\s*\)"#).expect("valid regex")
});

static CSS_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"@import\s+(?:"([^"]*)"|'([^']*)')"#).expect("valid regex"));

/// Bodies of inline scripts, which are never rewritten.
static SCRIPT_BODY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>(?P<body>.*?)</script\s*>").expect("valid regex")
});

/// Quoted values of the attributes in [`ATTRIBUTE_RULES`].
static ATTR_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\s(?:href|src|srcset|poster)\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid regex")
});

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#([0-9]{1,7})|#[xX]([0-9a-fA-F]{1,6})|(amp|quot|apos|lt|gt));")
        .expect("valid regex")
});

/// A resolved reference found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Absolute URL, without fragment.
    pub url: Url,
    /// How the reference should be fetched and stored.
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, Copy)]
enum AttrKind {
    Single(ResourceKind),
    SrcSet,
    LinkTag,
}

const ATTRIBUTE_RULES: &[(&str, &str, AttrKind)] = &[
    ("a[href]", "href", AttrKind::Single(ResourceKind::Page)),
    ("iframe[src]", "src", AttrKind::Single(ResourceKind::Page)),
    ("link[href]", "href", AttrKind::LinkTag),
    ("script[src]", "src", AttrKind::Single(ResourceKind::Asset)),
    ("img[src]", "src", AttrKind::Single(ResourceKind::Asset)),
    ("source[src]", "src", AttrKind::Single(ResourceKind::Asset)),
    ("video[src]", "src", AttrKind::Single(ResourceKind::Asset)),
    ("video[poster]", "poster", AttrKind::Single(ResourceKind::Asset)),
    ("audio[src]", "src", AttrKind::Single(ResourceKind::Asset)),
    ("img[srcset]", "srcset", AttrKind::SrcSet),
    ("source[srcset]", "srcset", AttrKind::SrcSet),
];

static SELECTORS: LazyLock<Vec<(Selector, &'static str, AttrKind)>> = LazyLock::new(|| {
    ATTRIBUTE_RULES
        .iter()
        .map(|&(css, attr, kind)| (Selector::parse(css).expect("valid selector"), attr, kind))
        .collect()
});

/// Classifies a `<link>` tag by its `rel`; `None` for links that are not fetched.
fn link_tag_kind(rel: &str) -> Option<ResourceKind> {
    let rel = rel.to_ascii_lowercase();
    if rel.split_whitespace().any(|r| r == "stylesheet") {
        Some(ResourceKind::Stylesheet)
    } else if rel
        .split_whitespace()
        .any(|r| matches!(r, "icon" | "apple-touch-icon" | "preload" | "manifest"))
    {
        Some(ResourceKind::Asset)
    } else {
        None
    }
}

/// Calls `f` with every fetchable attribute value, grouped by selector.
///
/// `<link>` tags are classified by `rel` here, so `f` never sees `LinkTag`.
fn visit_attributes(html: &str, mut f: impl FnMut(&str, AttrKind)) {
    let document = Html::parse_document(html);
    for (selector, attr, kind) in SELECTORS.iter() {
        for element in document.select(selector) {
            let element = element.value();
            let Some(value) = element.attr(attr) else {
                continue;
            };
            let kind = match kind {
                AttrKind::LinkTag => match link_tag_kind(element.attr("rel").unwrap_or("")) {
                    Some(kind) => AttrKind::Single(kind),
                    None => continue,
                },
                other => *other,
            };
            f(value, kind);
        }
    }
}

/// Resolves a raw reference against `base`, dropping non-HTTP schemes and fragments.
#[must_use]
pub fn resolve(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

fn srcset_candidates(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
}

/// Replaces quoted attribute values whose decoded text has a replacement.
fn replace_attribute_values(html: &str, replacements: &HashMap<String, String>) -> String {
    ATTR_VALUE_RE
        .replace_all(html, |caps: &Captures<'_>| {
            let (raw, quote) = match (caps.get(2), caps.get(3)) {
                (Some(value), _) => (value.as_str(), '"'),
                (None, Some(value)) => (value.as_str(), '\''),
                (None, None) => return caps[0].to_string(),
            };
            replacements.get(&*decode_entities(raw)).map_or_else(
                || caps[0].to_string(),
                |local| format!("{}{quote}{}{quote}", &caps[1], escape_attribute(local, quote)),
            )
        })
        .into_owned()
}

/// Decodes the character references that appear in URL attributes.
fn decode_entities(value: &str) -> std::borrow::Cow<'_, str> {
    ENTITY_RE.replace_all(value, |caps: &Captures<'_>| {
        let code = caps
            .get(1)
            .and_then(|d| d.as_str().parse().ok())
            .or_else(|| caps.get(2).and_then(|h| u32::from_str_radix(h.as_str(), 16).ok()));
        match (code, caps.get(3).map(|m| m.as_str())) {
            (Some(code), _) => char::from_u32(code).map_or_else(|| caps[0].to_string(), String::from),
            (None, Some("amp")) => "&".to_string(),
            (None, Some("quot")) => "\"".to_string(),
            (None, Some("apos")) => "'".to_string(),
            (None, Some("lt")) => "<".to_string(),
            (None, Some("gt")) => ">".to_string(),
            _ => caps[0].to_string(),
        }
    })
}

fn escape_attribute(value: &str, quote: char) -> String {
    let escaped = value.replace('&', "&amp;");
    match quote {
        '"' => escaped.replace('"', "&quot;"),
        _ => escaped.replace('\'', "&#39;"),
    }
}

/// Returns every fetchable reference in an HTML document.
#[must_use]
pub fn html_references(html: &str, base: &Url) -> Vec<Reference> {
    let mut refs = Vec::new();
    visit_attributes(html, |value, kind| match kind {
        AttrKind::Single(kind) => {
            refs.extend(resolve(base, value).map(|url| Reference { url, kind }));
        }
        AttrKind::SrcSet => {
            refs.extend(
                srcset_candidates(value)
                    .filter_map(|candidate| resolve(base, candidate))
                    .map(|url| Reference {
                        url,
                        kind: ResourceKind::Asset,
                    }),
            );
        }
        AttrKind::LinkTag => {}
    });
    refs
}

fn css_kind(url: &Url) -> ResourceKind {
    if url.path().to_ascii_lowercase().ends_with(".css") {
        ResourceKind::Stylesheet
    } else {
        ResourceKind::Asset
    }
}

fn first_group<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    (1..caps.len()).find_map(|i| caps.get(i)).map(|m| m.as_str())
}

/// Returns every `url(...)` and `@import` reference in a stylesheet.
#[must_use]
pub fn css_references(css: &str, base: &Url) -> Vec<Reference> {
    let urls = CSS_URL_RE.captures_iter(css).filter_map(|caps| {
        let url = resolve(base, first_group(&caps)?)?;
        Some(Reference {
            kind: css_kind(&url),
            url,
        })
    });
    let imports = CSS_IMPORT_RE.captures_iter(css).filter_map(|caps| {
        Some(Reference {
            url: resolve(base, first_group(&caps)?)?,
            kind: ResourceKind::Stylesheet,
        })
    });
    urls.chain(imports).collect()
}

/// Replaces one path segment's unsafe characters with `_`.
fn sanitize_segment(segment: &str) -> String {
    if segment == "." || segment == ".." {
        return "_".to_string();
    }
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Maps a URL to its file path below the output directory.
///
/// The layout follows the site structure. Directory URLs and pages without
/// an extension become `<path>/index.html`; query strings are dropped.
#[must_use]
pub fn local_path(url: &Url, kind: ResourceKind) -> PathBuf {
    let mut segments: Vec<String> = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(sanitize_segment)
                .collect()
        })
        .unwrap_or_default();

    let needs_index = match segments.last() {
        None => true,
        Some(_) if url.path().ends_with('/') => true,
        Some(last) => kind == ResourceKind::Page && !last.contains('.'),
    };
    if needs_index {
        segments.push(INDEX.to_string());
    }
    segments.iter().collect()
}

/// Returns the `/`-separated path from the file `from` to the file `to`.
///
/// Both paths are relative to the same root.
#[must_use]
pub fn relative_path(from: &Path, to: &Path) -> String {
    let from_dir: Vec<Component<'_>> = from
        .parent()
        .map(|p| p.components().collect())
        .unwrap_or_default();
    let to_parts: Vec<Component<'_>> = to.components().collect();

    let common = from_dir
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count()
        .min(to_parts.len().saturating_sub(1));

    let mut parts = vec!["..".to_string(); from_dir.len() - common];
    parts.extend(
        to_parts[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}

/// Builds the link written into `from` for a resource stored at `to`.
fn local_link(from: &Path, to: &Path, prettify: bool, fragment: Option<&str>) -> String {
    let mut link = relative_path(from, to);
    if prettify && (link == INDEX || link.ends_with("/index.html")) {
        link.truncate(link.len() - INDEX.len());
        if link.is_empty() {
            link.push_str("./");
        }
    }
    if let Some(fragment) = fragment {
        link.push('#');
        link.push_str(fragment);
    }
    link
}

/// Decides where an accepted reference is stored, or `None` to leave it untouched.
pub type LocalResolver<'a> = dyn Fn(&Url, ResourceKind) -> Option<PathBuf> + 'a;

/// Rewrites references in a document saved at `from` to relative local links.
pub struct Rewriter<'a> {
    base: &'a Url,
    from: &'a Path,
    resolver: &'a LocalResolver<'a>,
    prettify: bool,
}

impl<'a> Rewriter<'a> {
    /// Creates a rewriter for a document fetched from `base` and saved at `from`.
    #[must_use]
    pub fn new(base: &'a Url, from: &'a Path, resolver: &'a LocalResolver<'a>, prettify: bool) -> Self {
        Self {
            base,
            from,
            resolver,
            prettify,
        }
    }

    fn rewrite_one(&self, raw: &str, kind: ResourceKind) -> Option<String> {
        let url = resolve(self.base, raw)?;
        let to = (self.resolver)(&url, kind)?;
        let fragment = self.base.join(raw.trim()).ok();
        let fragment = fragment.as_ref().and_then(Url::fragment);
        Some(local_link(self.from, &to, self.prettify, fragment))
    }

    fn rewrite_srcset(&self, value: &str) -> Option<String> {
        let mut changed = false;
        let candidates: Vec<String> = value
            .split(',')
            .map(|candidate| {
                let mut words = candidate.split_whitespace();
                let Some(url) = words.next() else {
                    return candidate.trim().to_string();
                };
                let url = match self.rewrite_one(url, ResourceKind::Asset) {
                    Some(local) => {
                        changed = true;
                        local
                    }
                    None => url.to_string(),
                };
                std::iter::once(url)
                    .chain(words.map(str::to_string))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        changed.then(|| candidates.join(", "))
    }

    /// Rewrites attribute values of an HTML document.
    ///
    /// Only quoted `href`, `src`, `srcset` and `poster` values change; they
    /// are compared after decoding character references. Inline script
    /// bodies are copied as they are.
    #[must_use]
    pub fn rewrite_html(&self, html: &str) -> String {
        let mut replacements: HashMap<String, String> = HashMap::new();
        visit_attributes(html, |value, kind| {
            let rewritten = match kind {
                AttrKind::Single(kind) => self.rewrite_one(value, kind),
                AttrKind::SrcSet => self.rewrite_srcset(value),
                AttrKind::LinkTag => None,
            };
            if let Some(rewritten) = rewritten.filter(|r| r != value) {
                replacements.insert(value.to_string(), rewritten);
            }
        });

        if replacements.is_empty() {
            return html.to_string();
        }

        let mut result = String::with_capacity(html.len());
        let mut last = 0;
        for script in SCRIPT_BODY_RE.captures_iter(html) {
            let (Some(whole), Some(body)) = (script.get(0), script.name("body")) else {
                continue;
            };
            result.push_str(&replace_attribute_values(&html[last..body.start()], &replacements));
            result.push_str(&html[body.start()..whole.end()]);
            last = whole.end();
        }
        result.push_str(&replace_attribute_values(&html[last..], &replacements));
        result
    }

    /// Rewrites `url(...)` and `@import` references of a stylesheet.
    #[must_use]
    pub fn rewrite_css(&self, css: &str) -> String {
        let css = CSS_URL_RE.replace_all(css, |caps: &Captures<'_>| {
            let raw = first_group(caps).unwrap_or("");
            resolve(self.base, raw)
                .and_then(|url| self.rewrite_one(raw, css_kind(&url)))
                .map_or_else(|| caps[0].to_string(), |local| format!("url(\"{local}\")"))
        });
        CSS_IMPORT_RE
            .replace_all(&css, |caps: &Captures<'_>| {
                let raw = first_group(caps).unwrap_or("");
                self.rewrite_one(raw, ResourceKind::Stylesheet)
                    .map_or_else(|| caps[0].to_string(), |local| format!("@import \"{local}\""))
            })
            .into_owned()
    }
}

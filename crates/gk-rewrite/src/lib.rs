//! Document rewriting: absolute links and a single UTF-8 charset declaration.

use gk_core::RelayError;
use gk_core::RelayResult;
use gk_dom::Attribute;
use gk_dom::Document;
use gk_dom::NodeId;
use url::Url;

/// An attribute that may carry a URL reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteRule {
    pub tag: &'static str,
    pub attribute: &'static str,
}

const fn rule(tag: &'static str, attribute: &'static str) -> RewriteRule {
    RewriteRule { tag, attribute }
}

pub const REWRITE_TABLE: &[RewriteRule] = &[
    rule("a", "href"),
    rule("applet", "codebase"),
    rule("area", "href"),
    rule("blockquote", "cite"),
    rule("body", "background"),
    rule("td", "background"),
    rule("del", "cite"),
    rule("form", "action"),
    rule("frame", "longdesc"),
    rule("frame", "src"),
    rule("iframe", "longdesc"),
    rule("iframe", "src"),
    rule("head", "profile"),
    rule("img", "longdesc"),
    rule("img", "src"),
    rule("img", "usemap"),
    rule("input", "src"),
    rule("input", "usemap"),
    rule("ins", "cite"),
    rule("link", "href"),
    rule("object", "classid"),
    rule("object", "codebase"),
    rule("object", "data"),
    rule("object", "usemap"),
    rule("q", "cite"),
    rule("script", "src"),
    rule("param", "value"),
    rule("embed", "src"),
];

/// Parses `decoded_text`, absolutizes every table attribute against
/// `base_url`, and replaces the charset declaration.
pub fn rewrite(decoded_text: &str, base_url: &str) -> RelayResult<Document> {
    let base = Url::parse(base_url).map_err(|error| {
        RelayError::malformed_document(
            "rewrite.base_url_invalid",
            format!("invalid base URL `{base_url}`: {error}"),
        )
    })?;

    let mut doc = gk_html::parse_document(decoded_text)?;
    let rewritten = rewrite_links(&mut doc, &base)?;
    replace_charset(&mut doc)?;
    tracing::debug!(base = base.as_str(), rewritten, "rewrote document links");
    Ok(doc)
}

/// Resolves `value` against `base`. Values that already parse as absolute
/// URLs come back untouched; unresolvable ones yield `None`.
pub fn absolutize(base: &Url, value: &str) -> Option<String> {
    if Url::parse(value).is_ok() {
        return Some(value.to_owned());
    }

    base.join(value).ok().map(String::from)
}

/// Rewrites every non-empty table attribute; returns how many changed.
pub fn rewrite_links(doc: &mut Document, base: &Url) -> RelayResult<usize> {
    let mut rewritten = 0_usize;

    for rule in REWRITE_TABLE {
        for element in doc.elements_by_tag_name(rule.tag) {
            let Some(value) = doc.attribute(element, rule.attribute) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }

            let Some(absolute) = absolutize(base, value) else {
                continue;
            };
            if absolute != value {
                doc.set_attribute(element, rule.attribute, &absolute)?;
                rewritten += 1;
            }
        }
    }

    Ok(rewritten)
}

/// Drops every existing charset declaration and puts `<meta charset="utf-8">`
/// first in `head`.
pub fn replace_charset(doc: &mut Document) -> RelayResult<()> {
    let head = doc.first_element_by_tag_name("head").ok_or_else(|| {
        RelayError::malformed_document("rewrite.head_missing", "document has no head element")
    })?;

    let declarations: Vec<NodeId> = doc
        .elements_by_tag_name("meta")
        .into_iter()
        .filter(|meta| declares_charset(doc, *meta))
        .collect();
    for meta in declarations {
        doc.detach(meta)?;
    }

    let charset = doc.create_element("meta", vec![Attribute::new("charset", "utf-8")]);
    doc.prepend_child(head, charset)
}

fn declares_charset(doc: &Document, meta: NodeId) -> bool {
    let http_equiv = doc
        .attribute(meta, "http-equiv")
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("content-type"));
    http_equiv || doc.attribute(meta, "charset").is_some()
}

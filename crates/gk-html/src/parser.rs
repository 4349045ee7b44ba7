//! Error-tolerant tree construction.
//!
//! Follows the shape of the browser algorithm without its full state
//! machine: implied `html`/`head`/`body`, head-only elements, implicit
//! closing of paragraphs, list items, options and table cells, and
//! end tags that never escape their scoping element.

use crate::tokenizer::Token;
use crate::tokenizer::Tokenizer;
use gk_core::RelayResult;
use gk_dom::Attribute;
use gk_dom::Document;
use gk_dom::NodeId;

pub(crate) const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

const HEAD_ELEMENTS: &[&str] = &[
    "base", "basefont", "bgsound", "link", "meta", "noframes", "noscript", "script", "style",
    "template", "title",
];

const CLOSES_PARAGRAPH: &[&str] = &[
    "address", "article", "aside", "blockquote", "center", "dd", "details", "dialog", "dir",
    "div", "dl", "dt", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "hgroup", "hr", "li", "listing", "main", "menu", "nav", "ol",
    "p", "plaintext", "pre", "section", "summary", "table", "ul", "xmp",
];

const HEADINGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

/// Elements an end tag or scope search never looks past.
const SCOPE_BOUNDARIES: &[&str] = &[
    "applet", "body", "button", "caption", "head", "html", "marquee", "object", "table", "td",
    "template", "th",
];

const LIST_ITEM_BOUNDARIES: &[&str] = &[
    "body", "dl", "html", "menu", "ol", "table", "tbody", "td", "template", "tfoot", "th",
    "thead", "tr", "ul",
];

const TABLE_SCOPE_BOUNDARIES: &[&str] = &["html", "table", "template"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    BeforeHtml,
    BeforeHead,
    InHead,
    AfterHead,
    InBody,
    InFrameset,
    AfterFrameset,
}

/// Parses `input` into a document that always has `html`, `head`, and either
/// `body` or `frameset`.
pub fn parse_document(input: &str) -> RelayResult<Document> {
    let mut builder = TreeBuilder::new();
    for token in Tokenizer::new(input) {
        builder.process(token)?;
    }
    builder.finish()
}

struct TreeBuilder {
    doc: Document,
    stack: Vec<NodeId>,
    mode: Mode,
    html: Option<NodeId>,
    head: Option<NodeId>,
    body: Option<NodeId>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            doc: Document::new(),
            stack: Vec::new(),
            mode: Mode::BeforeHtml,
            html: None,
            head: None,
            body: None,
        }
    }

    fn finish(mut self) -> RelayResult<Document> {
        if !matches!(self.mode, Mode::InFrameset | Mode::AfterFrameset) {
            self.ensure_body()?;
        }
        Ok(self.doc)
    }

    fn process(&mut self, token: Token) -> RelayResult<()> {
        match token {
            Token::Doctype(doctype) => {
                if self.mode == Mode::BeforeHtml && self.doc.children(self.doc.root()).is_empty()
                {
                    let doctype = self.doc.create_doctype(doctype);
                    self.doc.append_child(self.doc.root(), doctype)?;
                }
                Ok(())
            }
            Token::Comment(text) => {
                let comment = self.doc.create_comment(text);
                self.doc.append_child(self.current(), comment)
            }
            Token::Text(text) => self.text(&text),
            Token::StartTag {
                name,
                attrs,
                self_closing,
            } => match self.mode {
                Mode::BeforeHtml | Mode::BeforeHead | Mode::InHead | Mode::AfterHead => {
                    self.start_tag_before_body(&name, attrs, self_closing)
                }
                Mode::InBody => self.start_tag_in_body(&name, attrs, self_closing),
                Mode::InFrameset => self.start_tag_in_frameset(&name, attrs),
                Mode::AfterFrameset => Ok(()),
            },
            Token::EndTag(name) => match self.mode {
                Mode::BeforeHtml | Mode::BeforeHead | Mode::InHead | Mode::AfterHead => {
                    self.end_tag_before_body(&name)
                }
                Mode::InBody => self.end_tag_in_body(&name),
                Mode::InFrameset => {
                    if name == "frameset" && self.current_name() == Some("frameset") {
                        self.stack.pop();
                        if self.current_name() != Some("frameset") {
                            self.mode = Mode::AfterFrameset;
                        }
                    } else if name == "noframes" {
                        self.close_element(&name);
                    }
                    Ok(())
                }
                Mode::AfterFrameset => Ok(()),
            },
        }
    }

    fn text(&mut self, text: &str) -> RelayResult<()> {
        match self.mode {
            Mode::InBody => self.doc.append_text(self.current(), text),
            // Inside `title`, `script`, `style` and friends in the head.
            Mode::InHead if Some(self.current()) != self.head => {
                self.doc.append_text(self.current(), text)
            }
            Mode::InFrameset | Mode::AfterFrameset => {
                let whitespace: String = text.chars().filter(|ch| is_space(*ch)).collect();
                if self.mode == Mode::InFrameset {
                    self.doc.append_text(self.current(), &whitespace)?;
                }
                Ok(())
            }
            Mode::BeforeHtml | Mode::BeforeHead | Mode::InHead | Mode::AfterHead => {
                let content_start = text
                    .char_indices()
                    .find(|(_, ch)| !is_space(*ch))
                    .map_or(text.len(), |(idx, _)| idx);
                let (leading, content) = text.split_at(content_start);

                if matches!(self.mode, Mode::InHead | Mode::AfterHead) {
                    self.doc.append_text(self.current(), leading)?;
                }

                if content.is_empty() {
                    return Ok(());
                }

                self.ensure_body()?;
                self.doc.append_text(self.current(), content)
            }
        }
    }

    fn start_tag_before_body(
        &mut self,
        name: &str,
        attrs: Vec<Attribute>,
        self_closing: bool,
    ) -> RelayResult<()> {
        match name {
            "html" => {
                let html = self.ensure_html()?;
                self.merge_attributes(html, attrs)
            }
            "head" => {
                if self.head.is_some() {
                    return Ok(());
                }
                let head = self.ensure_head()?;
                self.merge_attributes(head, attrs)
            }
            "body" => {
                let body = self.ensure_body()?;
                self.merge_attributes(body, attrs)
            }
            "frameset" => {
                self.ensure_head()?;
                self.close_head();
                let frameset = self.insert_element(name, attrs)?;
                self.stack.push(frameset);
                self.mode = Mode::InFrameset;
                Ok(())
            }
            _ if HEAD_ELEMENTS.contains(&name) => {
                let head = self.ensure_head()?;
                if !self.stack.contains(&head) {
                    self.stack.push(head);
                }
                self.mode = Mode::InHead;
                let element = self.insert_element(name, attrs)?;
                if !VOID_ELEMENTS.contains(&name) {
                    self.stack.push(element);
                }
                Ok(())
            }
            _ => {
                self.ensure_body()?;
                self.start_tag_in_body(name, attrs, self_closing)
            }
        }
    }

    fn start_tag_in_body(
        &mut self,
        name: &str,
        attrs: Vec<Attribute>,
        self_closing: bool,
    ) -> RelayResult<()> {
        match name {
            "html" => {
                if let Some(html) = self.html {
                    self.merge_attributes(html, attrs)?;
                }
                return Ok(());
            }
            "body" => {
                if let Some(body) = self.body {
                    self.merge_attributes(body, attrs)?;
                }
                return Ok(());
            }
            "head" | "frameset" => return Ok(()),
            _ => {}
        }

        if CLOSES_PARAGRAPH.contains(&name) && self.in_scope("p") {
            self.close_element("p");
        }

        match name {
            _ if HEADINGS.contains(&name) => {
                if self.current_name().is_some_and(|current| HEADINGS.contains(&current)) {
                    self.stack.pop();
                }
            }
            "li" => self.close_list_item(&["li"]),
            "dd" | "dt" => self.close_list_item(&["dd", "dt"]),
            "option" => {
                if self.current_name() == Some("option") {
                    self.stack.pop();
                }
            }
            "optgroup" => {
                if self.current_name() == Some("option") {
                    self.stack.pop();
                }
                if self.current_name() == Some("optgroup") {
                    self.stack.pop();
                }
            }
            "tr" => {
                self.close_in_table_scope(&["td", "th"]);
                self.close_in_table_scope(&["tr"]);
            }
            "td" | "th" => self.close_in_table_scope(&["td", "th"]),
            "tbody" | "thead" | "tfoot" => {
                self.close_in_table_scope(&["td", "th"]);
                self.close_in_table_scope(&["tr"]);
                self.close_in_table_scope(&["tbody", "thead", "tfoot"]);
            }
            "a" => {
                if self.in_scope("a") {
                    self.close_element("a");
                }
            }
            _ => {}
        }

        let foreign = self_closing && self.in_foreign_content();
        let element = self.insert_element(name, attrs)?;
        if !VOID_ELEMENTS.contains(&name) && !foreign && !is_foreign_leaf(name, self_closing) {
            self.stack.push(element);
        }
        Ok(())
    }

    fn start_tag_in_frameset(&mut self, name: &str, attrs: Vec<Attribute>) -> RelayResult<()> {
        match name {
            "frame" => {
                self.insert_element(name, attrs)?;
            }
            "frameset" | "noframes" => {
                let element = self.insert_element(name, attrs)?;
                self.stack.push(element);
            }
            _ => {}
        }
        Ok(())
    }

    fn end_tag_before_body(&mut self, name: &str) -> RelayResult<()> {
        match name {
            "head" => {
                if self.mode == Mode::InHead {
                    self.close_head();
                }
                Ok(())
            }
            "br" => {
                self.ensure_body()?;
                self.end_tag_in_body(name)
            }
            "html" | "body" => Ok(()),
            _ => {
                if self.mode == Mode::InHead {
                    self.close_element(name);
                }
                Ok(())
            }
        }
    }

    fn end_tag_in_body(&mut self, name: &str) -> RelayResult<()> {
        match name {
            "html" | "body" => Ok(()),
            "p" => {
                if self.in_scope("p") {
                    self.close_element("p");
                } else {
                    self.insert_element("p", Vec::new())?;
                }
                Ok(())
            }
            "br" => {
                self.insert_element("br", Vec::new())?;
                Ok(())
            }
            "table" | "caption" | "tbody" | "thead" | "tfoot" | "tr" | "td" | "th" => {
                self.close_in_table_scope(&[name]);
                Ok(())
            }
            _ => {
                self.close_element(name);
                Ok(())
            }
        }
    }

    fn current(&self) -> NodeId {
        self.stack.last().copied().unwrap_or_else(|| self.doc.root())
    }

    fn current_name(&self) -> Option<&str> {
        self.stack.last().and_then(|id| self.doc.element_name(*id))
    }

    fn insert_element(&mut self, name: &str, attrs: Vec<Attribute>) -> RelayResult<NodeId> {
        let element = self.doc.create_element(name, attrs);
        self.doc.append_child(self.current(), element)?;
        Ok(element)
    }

    fn merge_attributes(&mut self, id: NodeId, attrs: Vec<Attribute>) -> RelayResult<()> {
        for attr in attrs {
            if self.doc.attribute(id, &attr.name).is_none() {
                self.doc.set_attribute(id, &attr.name, &attr.value)?;
            }
        }
        Ok(())
    }

    fn ensure_html(&mut self) -> RelayResult<NodeId> {
        if let Some(html) = self.html {
            return Ok(html);
        }

        let html = self.doc.create_element("html", Vec::new());
        self.doc.append_child(self.doc.root(), html)?;
        self.stack.push(html);
        self.html = Some(html);
        self.mode = Mode::BeforeHead;
        Ok(html)
    }

    fn ensure_head(&mut self) -> RelayResult<NodeId> {
        if let Some(head) = self.head {
            return Ok(head);
        }

        self.ensure_html()?;
        let head = self.insert_element("head", Vec::new())?;
        self.stack.push(head);
        self.head = Some(head);
        self.mode = Mode::InHead;
        Ok(head)
    }

    fn close_head(&mut self) {
        if let Some(position) = self.head.and_then(|head| self.position_of(head)) {
            self.stack.truncate(position);
        }
        self.mode = Mode::AfterHead;
    }

    fn ensure_body(&mut self) -> RelayResult<NodeId> {
        if let Some(body) = self.body {
            return Ok(body);
        }

        self.ensure_head()?;
        self.close_head();
        let body = self.insert_element("body", Vec::new())?;
        self.stack.push(body);
        self.body = Some(body);
        self.mode = Mode::InBody;
        Ok(body)
    }

    fn position_of(&self, id: NodeId) -> Option<usize> {
        self.stack.iter().rposition(|candidate| *candidate == id)
    }

    fn name_at(&self, position: usize) -> &str {
        self.stack
            .get(position)
            .and_then(|id| self.doc.element_name(*id))
            .unwrap_or_default()
    }

    fn in_scope(&self, name: &str) -> bool {
        self.find_in_scope(&[name], SCOPE_BOUNDARIES).is_some()
    }

    fn in_foreign_content(&self) -> bool {
        (0..self.stack.len()).any(|position| matches!(self.name_at(position), "svg" | "math"))
    }

    /// Topmost open element named in `names`, unless a boundary comes first.
    fn find_in_scope(&self, names: &[&str], boundaries: &[&str]) -> Option<usize> {
        for position in (0..self.stack.len()).rev() {
            let current = self.name_at(position);
            if names.contains(&current) {
                return Some(position);
            }
            if boundaries.contains(&current) {
                return None;
            }
        }
        None
    }

    /// Pops up to and including the matching element, if it is in scope.
    fn close_element(&mut self, name: &str) {
        if let Some(position) = self.find_in_scope(&[name], SCOPE_BOUNDARIES) {
            self.stack.truncate(position);
        }
    }

    fn close_list_item(&mut self, names: &[&str]) {
        if let Some(position) = self.find_in_scope(names, LIST_ITEM_BOUNDARIES) {
            self.stack.truncate(position);
        }
    }

    fn close_in_table_scope(&mut self, names: &[&str]) {
        if let Some(position) = self.find_in_scope(names, TABLE_SCOPE_BOUNDARIES) {
            self.stack.truncate(position);
        }
    }
}

fn is_space(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r' | '\u{0c}')
}

fn is_foreign_leaf(name: &str, self_closing: bool) -> bool {
    self_closing && matches!(name, "svg" | "math")
}

#[cfg(test)]
mod tests {
    use super::parse_document;
    use gk_dom::Document;
    use gk_dom::NodeData;

    fn parse(input: &str) -> Document {
        match parse_document(input) {
            Ok(doc) => doc,
            Err(error) => panic!("{error}"),
        }
    }

    fn child_names(doc: &Document, tag: &str) -> Vec<String> {
        let Some(parent) = doc.first_element_by_tag_name(tag) else {
            panic!("missing <{tag}>");
        };
        doc.children(parent)
            .iter()
            .map(|id| match doc.node(*id).map(|node| &node.data) {
                Some(NodeData::Element(element)) => element.name.clone(),
                Some(NodeData::Text(_)) => "#text".to_owned(),
                Some(NodeData::Comment(_)) => "#comment".to_owned(),
                _ => "?".to_owned(),
            })
            .collect()
    }

    #[test]
    fn synthesizes_document_skeleton() {
        let doc = parse("<title>x</title><p>hello");
        assert_eq!(child_names(&doc, "html"), vec!["head", "body"]);
        assert_eq!(child_names(&doc, "head"), vec!["title"]);
        assert_eq!(child_names(&doc, "body"), vec!["p"]);
    }

    #[test]
    fn empty_input_still_has_head_and_body() {
        let doc = parse("");
        assert!(doc.first_element_by_tag_name("head").is_some());
        assert!(doc.first_element_by_tag_name("body").is_some());
    }

    #[test]
    fn head_elements_after_head_close_return_to_head() {
        let doc = parse("<html><head></head><meta charset=x><body>b</body></html>");
        assert_eq!(child_names(&doc, "head"), vec!["meta"]);
    }

    #[test]
    fn text_before_body_opens_body() {
        let doc = parse("<head><meta name=a></head>  plain");
        assert_eq!(child_names(&doc, "head"), vec!["meta"]);
        let Some(body) = doc.first_element_by_tag_name("body") else {
            panic!("missing body");
        };
        assert_eq!(doc.text_content(body), "plain");
    }

    #[test]
    fn paragraphs_and_list_items_close_implicitly() {
        let doc = parse("<body><p>one<p>two<ul><li>a<li>b</ul>");
        assert_eq!(child_names(&doc, "body"), vec!["p", "p", "ul"]);
        assert_eq!(child_names(&doc, "ul"), vec!["li", "li"]);
    }

    #[test]
    fn table_cells_close_implicitly() {
        let doc = parse("<table><tr><td>1<td>2<tr><td>3</table>");
        let rows = doc.elements_by_tag_name("tr");
        assert_eq!(rows.len(), 2);
        assert_eq!(doc.children(rows[0]).len(), 2);
        assert_eq!(doc.elements_by_tag_name("td").len(), 3);
    }

    #[test]
    fn stray_end_tags_are_ignored() {
        let doc = parse("<div><span>a</div></span><b>c</i></b>");
        assert_eq!(child_names(&doc, "body"), vec!["div", "b"]);
        assert_eq!(child_names(&doc, "div"), vec!["span"]);
    }

    #[test]
    fn end_tag_does_not_escape_table_cell() {
        let doc = parse("<div><table><tr><td></div>cell</td></tr></table>after</div>");
        let Some(cell) = doc.first_element_by_tag_name("td") else {
            panic!("missing td");
        };
        assert_eq!(doc.text_content(cell), "cell");
    }

    #[test]
    fn frameset_replaces_body() {
        let doc = parse("<frameset cols=\"50%,50%\"><frame src=a.html><frame src=b.html></frameset>");
        assert!(doc.first_element_by_tag_name("body").is_none());
        assert_eq!(child_names(&doc, "frameset"), vec!["frame", "frame"]);
    }

    #[test]
    fn body_attributes_merge_into_existing_body() {
        let doc = parse("<p>x<body background=bg.png>");
        let Some(body) = doc.first_element_by_tag_name("body") else {
            panic!("missing body");
        };
        assert_eq!(doc.attribute(body, "background"), Some("bg.png"));
    }

    #[test]
    fn head_keeps_its_attributes() {
        let doc = parse("<html><head profile=\"meta/profile.xml\" lang=th><title>t</title></head><head id=late>");
        let Some(head) = doc.first_element_by_tag_name("head") else {
            panic!("missing head");
        };
        assert_eq!(doc.attribute(head, "profile"), Some("meta/profile.xml"));
        assert_eq!(doc.attribute(head, "lang"), Some("th"));
        assert_eq!(doc.attribute(head, "id"), None);
        assert_eq!(doc.elements_by_tag_name("head").len(), 1);
    }

    #[test]
    fn self_closing_svg_children_do_not_swallow_siblings() {
        let doc = parse("<svg><path d=\"M0\"/><circle r=1 /></svg><p>after");
        assert_eq!(child_names(&doc, "svg"), vec!["path", "circle"]);
        assert_eq!(child_names(&doc, "body"), vec!["svg", "p"]);
    }
}

//! Document to UTF-8 HTML text.

use crate::parser::VOID_ELEMENTS;
use gk_dom::DoctypeData;
use gk_dom::Document;
use gk_dom::NodeData;
use gk_dom::NodeId;

/// Elements whose text children are written without escaping.
const RAW_TEXT_PARENTS: &[&str] = &[
    "iframe", "noembed", "noframes", "noscript", "plaintext", "script", "style", "xmp",
];

enum Step {
    Enter(NodeId),
    Close(NodeId),
}

/// Serializes the whole document in document order.
pub fn serialize(doc: &Document) -> Vec<u8> {
    serialize_to_string(doc).into_bytes()
}

pub fn serialize_to_string(doc: &Document) -> String {
    let mut out = String::new();
    // Explicit stack: deeply nested markup must not exhaust the call stack.
    let mut steps: Vec<Step> = doc
        .children(doc.root())
        .iter()
        .rev()
        .map(|id| Step::Enter(*id))
        .collect();

    while let Some(step) = steps.pop() {
        match step {
            Step::Enter(id) => {
                let Some(node) = doc.node(id) else {
                    continue;
                };

                match &node.data {
                    NodeData::Document => {}
                    NodeData::Doctype(doctype) => write_doctype(&mut out, doctype),
                    NodeData::Comment(text) => {
                        out.push_str("<!--");
                        out.push_str(text);
                        out.push_str("-->");
                    }
                    NodeData::Text(text) => {
                        if parent_is_raw_text(doc, id) {
                            out.push_str(text);
                        } else {
                            out.push_str(&html_escape::encode_text(text));
                        }
                    }
                    NodeData::Element(element) => {
                        out.push('<');
                        out.push_str(&element.name);
                        for attr in &element.attrs {
                            out.push(' ');
                            out.push_str(&attr.name);
                            out.push_str("=\"");
                            out.push_str(&html_escape::encode_double_quoted_attribute(
                                &attr.value,
                            ));
                            out.push('"');
                        }
                        out.push('>');

                        if !VOID_ELEMENTS.contains(&element.name.as_str()) {
                            steps.push(Step::Close(id));
                            steps.extend(node.children.iter().rev().map(|child| Step::Enter(*child)));
                        }
                    }
                }
            }
            Step::Close(id) => {
                if let Some(name) = doc.element_name(id) {
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                }
            }
        }
    }

    out
}

fn write_doctype(out: &mut String, doctype: &DoctypeData) {
    out.push_str("<!DOCTYPE ");
    out.push_str(&doctype.name);

    if !doctype.public_id.is_empty() {
        out.push_str(" PUBLIC \"");
        out.push_str(&doctype.public_id);
        out.push('"');
    } else if !doctype.system_id.is_empty() {
        out.push_str(" SYSTEM");
    }

    if !doctype.system_id.is_empty() {
        // The tokenizer never lets an identifier contain its own quote.
        let quote = if doctype.system_id.contains('"') { '\'' } else { '"' };
        out.push(' ');
        out.push(quote);
        out.push_str(&doctype.system_id);
        out.push(quote);
    }

    out.push('>');
}

fn parent_is_raw_text(doc: &Document, id: NodeId) -> bool {
    doc.parent(id)
        .and_then(|parent| doc.element_name(parent))
        .is_some_and(|name| RAW_TEXT_PARENTS.contains(&name))
}

//! Arena-backed document tree.
//!
//! Nodes live in a single `Vec` owned by the [`Document`] and are addressed
//! by [`NodeId`]. Removing a node detaches it from its parent; the slot stays
//! allocated so outstanding ids never dangle, and detached subtrees are
//! invisible to traversal from the root.

use gk_core::RelayError;
use gk_core::RelayResult;

/// Index of a node in its document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    /// Lower-case tag name.
    pub name: String,
    pub attrs: Vec<Attribute>,
}

impl ElementData {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
            .map(|attr| attr.value.as_str())
    }
}

/// `<!DOCTYPE name PUBLIC "public_id" "system_id">`; an empty identifier
/// is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoctypeData {
    pub name: String,
    pub public_id: String,
    pub system_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Doctype(DoctypeData),
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub data: NodeData,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            data,
        }
    }

    pub fn as_element(&self) -> Option<&ElementData> {
        match &self.data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeData::Document)],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |node| node.children.as_slice())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        self.node(id).and_then(Node::as_element)
    }

    pub fn element_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|element| element.name.as_str())
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|element| element.attribute(name))
    }

    pub fn create_element(&mut self, name: &str, attrs: Vec<Attribute>) -> NodeId {
        self.push(NodeData::Element(ElementData {
            name: name.to_ascii_lowercase(),
            attrs,
        }))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeData::Text(text.into()))
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeData::Comment(text.into()))
    }

    pub fn create_doctype(&mut self, doctype: DoctypeData) -> NodeId {
        self.push(NodeData::Doctype(doctype))
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node::new(data));
        NodeId(self.nodes.len() - 1)
    }

    /// Replaces an existing attribute's value or appends a new attribute.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> RelayResult<()> {
        let node = self.node_mut(id)?;
        let NodeData::Element(element) = &mut node.data else {
            return Err(RelayError::new(
                "dom.not_an_element",
                format!("node {} is not an element", id.0),
            ));
        };

        match element
            .attrs
            .iter_mut()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
        {
            Some(attr) => attr.value = value.to_owned(),
            None => element.attrs.push(Attribute::new(name, value)),
        }

        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> RelayResult<()> {
        let position = self.children(parent).len();
        self.insert_child(parent, position, child)
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> RelayResult<()> {
        self.insert_child(parent, 0, child)
    }

    /// Inserts a detached node at `position` among `parent`'s children.
    pub fn insert_child(&mut self, parent: NodeId, position: usize, child: NodeId) -> RelayResult<()> {
        self.node_mut(parent)?;
        if self.node_mut(child)?.parent.is_some() {
            return Err(RelayError::new(
                "dom.child_attached",
                format!("node {} already has a parent", child.0),
            ));
        }
        if child == self.root() || self.is_ancestor(child, parent) {
            return Err(RelayError::new(
                "dom.hierarchy_invalid",
                format!("node {} cannot be placed under node {}", child.0, parent.0),
            ));
        }

        let parent_node = self.node_mut(parent)?;
        let position = position.min(parent_node.children.len());
        parent_node.children.insert(position, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Appends text to `parent`, merging with a trailing text node.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> RelayResult<()> {
        if text.is_empty() {
            return Ok(());
        }

        if let Some(&last) = self.children(parent).last() {
            if let Some(Node {
                data: NodeData::Text(existing),
                ..
            }) = self.nodes.get_mut(last.0)
            {
                existing.push_str(text);
                return Ok(());
            }
        }

        let node = self.create_text(text);
        self.append_child(parent, node)
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> RelayResult<()> {
        let parent_node = self.node_mut(parent)?;
        let Some(position) = parent_node.children.iter().position(|id| *id == child) else {
            return Err(RelayError::new(
                "dom.child_missing",
                format!("node {} is not a child of node {}", child.0, parent.0),
            ));
        };

        parent_node.children.remove(position);
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    /// Detaches `id` from wherever it sits in the tree.
    pub fn detach(&mut self, id: NodeId) -> RelayResult<()> {
        match self.parent(id) {
            Some(parent) => self.remove_child(parent, id),
            None => Ok(()),
        }
    }

    /// Nodes reachable from `id`, in document (pre-)order, `id` included.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];

        while let Some(current) = stack.pop() {
            if self.node(current).is_none() {
                continue;
            }
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }

        out
    }

    /// Attached elements named `name`, in document order.
    pub fn elements_by_tag_name(&self, name: &str) -> Vec<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|id| {
                self.element_name(*id)
                    .is_some_and(|tag| tag.eq_ignore_ascii_case(name))
            })
            .collect()
    }

    pub fn first_element_by_tag_name(&self, name: &str) -> Option<NodeId> {
        self.elements_by_tag_name(name).into_iter().next()
    }

    /// Concatenated text of `id` and its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|node| match self.node(node).map(|node| &node.data) {
                Some(NodeData::Text(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn is_ancestor(&self, candidate: NodeId, mut id: NodeId) -> bool {
        loop {
            if id == candidate {
                return true;
            }
            match self.parent(id) {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }

    fn node_mut(&mut self, id: NodeId) -> RelayResult<&mut Node> {
        self.nodes.get_mut(id.0).ok_or_else(|| {
            RelayError::new("dom.node_missing", format!("node {} does not exist", id.0))
        })
    }
}
